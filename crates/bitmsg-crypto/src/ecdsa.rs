//! secp256k1 ECDSA signing and verification.
//!
//! Signatures are DER-encoded on the wire. The digest applied to the
//! signing preimage depends on the address version: SHA-1 for v2 and
//! older, SHA-256 for v3 and newer. Both must match the network's
//! historical behavior exactly or signatures will not validate against
//! other implementations.
//!
//! Public keys cross this boundary as 64-byte uncompressed `X ‖ Y`
//! coordinates, the form the protocol puts on the wire (no SEC1 0x04
//! tag byte).

use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use bitmsg_types::{BmError, Result};

/// Byte length of an uncompressed public key without the SEC1 tag.
pub const PUBLIC_KEY_LEN: usize = 64;

// ---------------------------------------------------------------------------
// SigDigest
// ---------------------------------------------------------------------------

/// Digest applied to a signing preimage before the ECDSA operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SigDigest {
    /// Used by address versions 2 and older.
    Sha1,
    /// Used by address versions 3 and newer.
    Sha256,
}

impl SigDigest {
    /// Selects the digest for an address version.
    pub fn for_address_version(version: u64) -> Self {
        if version < 3 {
            Self::Sha1
        } else {
            Self::Sha256
        }
    }

    fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
        }
    }
}

// ---------------------------------------------------------------------------
// Key material
// ---------------------------------------------------------------------------

/// Generates a fresh random private scalar from OS entropy.
pub fn random_scalar() -> [u8; 32] {
    let key = SigningKey::random(&mut OsRng);
    let mut out = [0u8; 32];
    out.copy_from_slice(&key.to_bytes());
    out
}

/// Derives the 64-byte uncompressed public key for a private scalar.
///
/// # Errors
///
/// Returns [`BmError::Crypto`] if the scalar is zero or not a valid
/// field element.
pub fn derive_public_key(private_scalar: &[u8; 32]) -> Result<[u8; 64]> {
    let key = SigningKey::from_slice(private_scalar).map_err(|e| BmError::Crypto {
        reason: format!("invalid private scalar: {e}"),
    })?;
    let point = key.verifying_key().to_encoded_point(false);
    let mut out = [0u8; 64];
    out.copy_from_slice(&point.as_bytes()[1..65]);
    Ok(out)
}

/// Parses a 64-byte uncompressed `X ‖ Y` public key.
///
/// # Errors
///
/// Returns [`BmError::Crypto`] if the coordinates are not a point on
/// the curve.
pub fn parse_public_key(uncompressed: &[u8; 64]) -> Result<VerifyingKey> {
    let mut sec1 = [0u8; 65];
    sec1[0] = 0x04;
    sec1[1..].copy_from_slice(uncompressed);
    VerifyingKey::from_sec1_bytes(&sec1).map_err(|e| BmError::Crypto {
        reason: format!("invalid public key: {e}"),
    })
}

// ---------------------------------------------------------------------------
// Sign / verify
// ---------------------------------------------------------------------------

/// Signs `data` with the given private scalar, returning a DER signature.
///
/// # Errors
///
/// Returns [`BmError::Crypto`] if the scalar is invalid or the signing
/// operation fails.
pub fn sign(private_scalar: &[u8; 32], data: &[u8], digest: SigDigest) -> Result<Vec<u8>> {
    let key = SigningKey::from_slice(private_scalar).map_err(|e| BmError::Crypto {
        reason: format!("invalid private scalar: {e}"),
    })?;
    let prehash = digest.digest(data);
    let signature: Signature = key.sign_prehash(&prehash).map_err(|e| BmError::Crypto {
        reason: format!("signing failed: {e}"),
    })?;
    Ok(signature.to_der().as_bytes().to_vec())
}

/// Verifies a DER signature over `data` against a 64-byte public key.
///
/// Returns `false` for any malformed key, malformed signature, or
/// failed check; peers feed us arbitrary bytes here.
pub fn verify(public_key: &[u8; 64], data: &[u8], der_signature: &[u8], digest: SigDigest) -> bool {
    let Ok(key) = parse_public_key(public_key) else {
        return false;
    };
    let Ok(signature) = Signature::from_der(der_signature) else {
        return false;
    };
    // Other implementations may emit high-S signatures.
    let signature = signature.normalize_s().unwrap_or(signature);
    let prehash = digest.digest(data);
    key.verify_prehash(&prehash, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip_sha256() {
        let scalar = random_scalar();
        let public = derive_public_key(&scalar).expect("valid scalar");
        let sig = sign(&scalar, b"payload", SigDigest::Sha256).expect("sign");
        assert!(verify(&public, b"payload", &sig, SigDigest::Sha256));
    }

    #[test]
    fn sign_verify_roundtrip_sha1() {
        let scalar = random_scalar();
        let public = derive_public_key(&scalar).expect("valid scalar");
        let sig = sign(&scalar, b"payload", SigDigest::Sha1).expect("sign");
        assert!(verify(&public, b"payload", &sig, SigDigest::Sha1));
    }

    #[test]
    fn wrong_digest_fails() {
        let scalar = random_scalar();
        let public = derive_public_key(&scalar).expect("valid scalar");
        let sig = sign(&scalar, b"payload", SigDigest::Sha256).expect("sign");
        assert!(!verify(&public, b"payload", &sig, SigDigest::Sha1));
    }

    #[test]
    fn flipped_data_fails() {
        let scalar = random_scalar();
        let public = derive_public_key(&scalar).expect("valid scalar");
        let sig = sign(&scalar, b"payload", SigDigest::Sha256).expect("sign");
        assert!(!verify(&public, b"paxload", &sig, SigDigest::Sha256));
    }

    #[test]
    fn garbage_signature_fails() {
        let scalar = random_scalar();
        let public = derive_public_key(&scalar).expect("valid scalar");
        assert!(!verify(&public, b"payload", &[0u8; 70], SigDigest::Sha256));
    }

    #[test]
    fn digest_selection_by_version() {
        assert_eq!(SigDigest::for_address_version(2), SigDigest::Sha1);
        assert_eq!(SigDigest::for_address_version(3), SigDigest::Sha256);
        assert_eq!(SigDigest::for_address_version(4), SigDigest::Sha256);
    }

    #[test]
    fn zero_scalar_rejected() {
        assert!(derive_public_key(&[0u8; 32]).is_err());
    }
}
