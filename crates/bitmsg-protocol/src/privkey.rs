//! Identity key material.
//!
//! A [`PrivateKey`] holds the two secp256k1 scalars behind an address
//! — one for signing, one for decryption — plus the derived pubkey.
//! Generation for v3+ addresses retries with fresh seeds until the
//! RIPE digest starts with a zero byte, which shortens the Base58
//! string.
//!
//! WIF import/export follows the Bitcoin convention: Base58Check with
//! a `0x80` version byte and a double-SHA-256 checksum.

use zeroize::Zeroize;

use bitmsg_crypto::ecdsa::{derive_public_key, random_scalar};
use bitmsg_crypto::hash::double_sha256;
use bitmsg_types::{BmError, Result};

use crate::address::calculate_tag;
use crate::pubkey::{ripe_of, Pubkey, V3Pubkey, BEHAVIOR_DOES_ACK};

// ---------------------------------------------------------------------------
// PrivateKey
// ---------------------------------------------------------------------------

/// The secret half of an identity.
///
/// Cloneable because repositories hand identities out by value; the
/// scalars are zeroized when the last copy drops.
#[derive(Clone)]
pub struct PrivateKey {
    version: u64,
    stream: u64,
    private_signing_key: [u8; 32],
    private_encryption_key: [u8; 32],
    pubkey: Pubkey,
}

// PrivateKey intentionally does not implement Debug to prevent
// accidental leakage of the scalars in logs.

impl Drop for PrivateKey {
    fn drop(&mut self) {
        self.private_signing_key.zeroize();
        self.private_encryption_key.zeroize();
    }
}

impl PrivateKey {
    /// Generates a fresh identity for a v3 or v4 address.
    ///
    /// Retries key generation until the RIPE digest of the derived
    /// pubkeys begins with a zero byte.
    ///
    /// # Errors
    ///
    /// Returns [`BmError::InvalidAddress`] for versions other than 3
    /// or 4.
    pub fn new_random(
        version: u64,
        stream: u64,
        nonce_trials_per_byte: u64,
        extra_bytes: u64,
    ) -> Result<Self> {
        if !(3..=4).contains(&version) {
            return Err(BmError::InvalidAddress {
                reason: format!("cannot generate keys for address version {version}"),
            });
        }
        loop {
            let signing = random_scalar();
            let encryption = random_scalar();
            let signing_public = derive_public_key(&signing)?;
            let encryption_public = derive_public_key(&encryption)?;
            let ripe = ripe_of(&signing_public, &encryption_public);
            if ripe[0] != 0 {
                continue;
            }
            let inner = V3Pubkey {
                behavior_bitfield: BEHAVIOR_DOES_ACK,
                signing_key: signing_public,
                encryption_key: encryption_public,
                nonce_trials_per_byte,
                extra_bytes,
                signature: Vec::new(),
            };
            let pubkey = match version {
                3 => Pubkey::V3(inner),
                _ => Pubkey::V4 {
                    tag: calculate_tag(version, stream, &ripe),
                    inner,
                },
            };
            return Ok(Self {
                version,
                stream,
                private_signing_key: signing,
                private_encryption_key: encryption,
                pubkey,
            });
        }
    }

    /// Reconstructs an identity from two raw scalars.
    ///
    /// # Errors
    ///
    /// Returns [`BmError::Crypto`] if either scalar is invalid.
    pub fn from_scalars(
        version: u64,
        stream: u64,
        private_signing_key: [u8; 32],
        private_encryption_key: [u8; 32],
        nonce_trials_per_byte: u64,
        extra_bytes: u64,
    ) -> Result<Self> {
        let signing_public = derive_public_key(&private_signing_key)?;
        let encryption_public = derive_public_key(&private_encryption_key)?;
        let ripe = ripe_of(&signing_public, &encryption_public);
        let inner = V3Pubkey {
            behavior_bitfield: BEHAVIOR_DOES_ACK,
            signing_key: signing_public,
            encryption_key: encryption_public,
            nonce_trials_per_byte,
            extra_bytes,
            signature: Vec::new(),
        };
        let pubkey = match version {
            0..=2 => {
                return Err(BmError::InvalidAddress {
                    reason: format!("cannot rebuild identity for address version {version}"),
                })
            }
            3 => Pubkey::V3(inner),
            4 => Pubkey::V4 {
                tag: calculate_tag(version, stream, &ripe),
                inner,
            },
            v => {
                return Err(BmError::InvalidAddress {
                    reason: format!("unsupported address version {v}"),
                })
            }
        };
        Ok(Self {
            version,
            stream,
            private_signing_key,
            private_encryption_key,
            pubkey,
        })
    }

    /// Imports an identity from two WIF strings.
    pub fn from_wif(
        version: u64,
        stream: u64,
        signing_wif: &str,
        encryption_wif: &str,
        nonce_trials_per_byte: u64,
        extra_bytes: u64,
    ) -> Result<Self> {
        Self::from_scalars(
            version,
            stream,
            wif_to_scalar(signing_wif)?,
            wif_to_scalar(encryption_wif)?,
            nonce_trials_per_byte,
            extra_bytes,
        )
    }

    /// Address version this identity was generated for.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Stream this identity lives on.
    pub fn stream(&self) -> u64 {
        self.stream
    }

    /// The signing scalar.
    pub fn private_signing_key(&self) -> &[u8; 32] {
        &self.private_signing_key
    }

    /// The decryption scalar.
    pub fn private_encryption_key(&self) -> &[u8; 32] {
        &self.private_encryption_key
    }

    /// The derived pubkey, signature not yet attached.
    pub fn pubkey(&self) -> &Pubkey {
        &self.pubkey
    }
}

// ---------------------------------------------------------------------------
// WIF
// ---------------------------------------------------------------------------

/// Decodes a wallet-import-format private key to its raw scalar.
///
/// # Errors
///
/// Returns [`BmError::Decode`] for bad Base58, a wrong version byte,
/// a checksum mismatch, or an unexpected payload length.
pub fn wif_to_scalar(wif: &str) -> Result<[u8; 32]> {
    let data = bs58::decode(wif).into_vec().map_err(|e| BmError::Decode {
        reason: format!("invalid Base58 in WIF: {e}"),
    })?;
    if data.len() != 37 {
        return Err(BmError::Decode {
            reason: format!("WIF payload is {} bytes, expected 37", data.len()),
        });
    }
    let (body, checksum) = data.split_at(33);
    let expected = double_sha256(body);
    if checksum != &expected[..4] {
        return Err(BmError::Decode {
            reason: "WIF checksum mismatch".into(),
        });
    }
    if body[0] != 0x80 {
        return Err(BmError::Decode {
            reason: format!("WIF version byte {:#04x}, expected 0x80", body[0]),
        });
    }
    let mut scalar = [0u8; 32];
    scalar.copy_from_slice(&body[1..]);
    Ok(scalar)
}

/// Encodes a raw scalar as a wallet-import-format string.
pub fn scalar_to_wif(scalar: &[u8; 32]) -> String {
    let mut data = Vec::with_capacity(37);
    data.push(0x80);
    data.extend_from_slice(scalar);
    let checksum = double_sha256(&data);
    data.extend_from_slice(&checksum[..4]);
    bs58::encode(data).into_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wif_known_vector() {
        let scalar = wif_to_scalar("5HueCGU8rMjxEXxiPuD5BDku4MkFqeZyd4dZ1jvhTVqvbTLvyTJ")
            .expect("decode");
        assert_eq!(
            hex::encode(scalar).to_uppercase(),
            "0C28FCA386C7A227600B2FE50B7CAE11EC86D3BF1FBE471BE89827E19D72AA1D"
        );
    }

    #[test]
    fn wif_roundtrip() {
        let scalar = [0x5Au8; 32];
        let wif = scalar_to_wif(&scalar);
        assert_eq!(wif_to_scalar(&wif).expect("decode"), scalar);
    }

    #[test]
    fn wif_bad_checksum_rejected() {
        assert!(wif_to_scalar("5HueCGU8rMjxEXxiPuD5BDku4MkFqeZyd4dZ1jvhTVqvbTLvyTK").is_err());
    }

    #[test]
    fn generated_ripe_starts_with_zero() {
        let key = PrivateKey::new_random(4, 1, 1000, 1000).expect("generate");
        assert_eq!(key.pubkey().ripe()[0], 0);
    }

    #[test]
    fn generated_v4_key_carries_tag() {
        let key = PrivateKey::new_random(4, 1, 1000, 1000).expect("generate");
        let ripe = key.pubkey().ripe();
        match key.pubkey() {
            Pubkey::V4 { tag, .. } => {
                assert_eq!(tag, &calculate_tag(4, 1, &ripe));
            }
            other => panic!("expected v4 pubkey, got version {}", other.version()),
        }
    }

    #[test]
    fn version_2_generation_rejected() {
        assert!(PrivateKey::new_random(2, 1, 1000, 1000).is_err());
    }
}
