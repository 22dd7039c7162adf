//! secp256k1 Diffie-Hellman shared-secret derivation.
//!
//! The shared secret is the X coordinate of the product point, exactly
//! as the protocol's ECIES envelope expects. Key derivation from the
//! secret (SHA-512 split into encryption and MAC halves) happens in
//! [`crate::cryptobox`].

use k256::elliptic_curve::ecdh::diffie_hellman;
use k256::{NonZeroScalar, PublicKey};
use zeroize::Zeroize;

use bitmsg_types::{BmError, Result};

use crate::ecdsa::parse_public_key;

/// Shared secret from an ECDH exchange. Zeroized on drop.
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    /// Returns the raw 32-byte X coordinate.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

// SharedSecret does not implement Clone/Debug to prevent leakage.

/// Computes `ECDH(private_scalar, public_point)`.
///
/// # Errors
///
/// Returns [`BmError::Crypto`] if the scalar is zero or invalid, or if
/// the public key coordinates are not a point on the curve.
pub fn shared_secret(private_scalar: &[u8; 32], public_key: &[u8; 64]) -> Result<SharedSecret> {
    let scalar =
        NonZeroScalar::try_from(&private_scalar[..]).map_err(|e| BmError::Crypto {
            reason: format!("invalid private scalar: {e}"),
        })?;
    let point = PublicKey::from(&parse_public_key(public_key)?);
    let shared = diffie_hellman(scalar, point.as_affine());
    let mut out = [0u8; 32];
    out.copy_from_slice(shared.raw_secret_bytes());
    Ok(SharedSecret(out))
}
