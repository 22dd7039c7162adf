//! Pubkey payloads, versions 2 through 4.
//!
//! A v2 pubkey is the bare keys. v3 adds the owner's proof-of-work
//! demands and a signature. v4 wraps a v3 body in an ECIES envelope
//! keyed so that only someone who already knows the address can read
//! it, and exposes only the routing tag — pubkeys become useless for
//! address harvesting.
//!
//! The stream number is not part of any pubkey body; it lives in the
//! enclosing object header.

use std::io::Read;

use bitmsg_crypto::cryptobox::CryptoBox;
use bitmsg_crypto::hash::{ripemd160, sha512_pair};
use bitmsg_types::{BmError, Result};

use crate::codec::{read_array, read_u32, read_var_bytes, read_var_int, write_u32, write_var_bytes, write_var_int};

/// Behavior bitfield flag: the receiving node sends acknowledgements.
pub const BEHAVIOR_DOES_ACK: u32 = 1;

/// Computes the RIPE digest of a signing/encryption key pair:
/// `RIPEMD-160(SHA-512(signing ‖ encryption))`.
pub fn ripe_of(signing_key: &[u8; 64], encryption_key: &[u8; 64]) -> [u8; 20] {
    ripemd160(&sha512_pair(signing_key, encryption_key))
}

// ---------------------------------------------------------------------------
// V2Pubkey
// ---------------------------------------------------------------------------

/// A version 2 pubkey: behavior bitfield and the two public keys,
/// nothing else. Unsigned by design of the era.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct V2Pubkey {
    /// Advertised node behavior flags.
    pub behavior_bitfield: u32,
    /// Uncompressed secp256k1 signing key, `X ‖ Y`.
    pub signing_key: [u8; 64],
    /// Uncompressed secp256k1 encryption key, `X ‖ Y`.
    pub encryption_key: [u8; 64],
}

impl V2Pubkey {
    /// Serializes the 132-byte body.
    pub fn write(&self, out: &mut Vec<u8>) {
        write_u32(out, self.behavior_bitfield);
        out.extend_from_slice(&self.signing_key);
        out.extend_from_slice(&self.encryption_key);
    }

    /// Parses the 132-byte body.
    pub fn read(reader: &mut impl Read) -> Result<Self> {
        Ok(Self {
            behavior_bitfield: read_u32(reader)?,
            signing_key: read_array(reader)?,
            encryption_key: read_array(reader)?,
        })
    }
}

// ---------------------------------------------------------------------------
// V3Pubkey
// ---------------------------------------------------------------------------

/// A version 3 pubkey: v2 fields plus the owner's proof-of-work
/// demands and a signature over the object preimage.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct V3Pubkey {
    /// Advertised node behavior flags.
    pub behavior_bitfield: u32,
    /// Uncompressed secp256k1 signing key, `X ‖ Y`.
    pub signing_key: [u8; 64],
    /// Uncompressed secp256k1 encryption key, `X ‖ Y`.
    pub encryption_key: [u8; 64],
    /// Difficulty-per-byte this address demands of senders.
    pub nonce_trials_per_byte: u64,
    /// Flat difficulty addend this address demands of senders.
    pub extra_bytes: u64,
    /// DER signature; empty until the object is signed.
    pub signature: Vec<u8>,
}

impl V3Pubkey {
    /// Serializes the full wire body, signature included.
    pub fn write(&self, out: &mut Vec<u8>) {
        self.write_signable(out);
        write_var_bytes(out, &self.signature);
    }

    /// Serializes the signing preimage portion (everything except the
    /// signature).
    pub fn write_signable(&self, out: &mut Vec<u8>) {
        write_u32(out, self.behavior_bitfield);
        out.extend_from_slice(&self.signing_key);
        out.extend_from_slice(&self.encryption_key);
        write_var_int(out, self.nonce_trials_per_byte);
        write_var_int(out, self.extra_bytes);
    }

    /// Parses the full wire body.
    pub fn read(reader: &mut impl Read) -> Result<Self> {
        Ok(Self {
            behavior_bitfield: read_u32(reader)?,
            signing_key: read_array(reader)?,
            encryption_key: read_array(reader)?,
            nonce_trials_per_byte: read_var_int(reader)?,
            extra_bytes: read_var_int(reader)?,
            signature: read_var_bytes(reader)?,
        })
    }

    /// RIPE digest of the embedded keys.
    pub fn ripe(&self) -> [u8; 20] {
        ripe_of(&self.signing_key, &self.encryption_key)
    }
}

// ---------------------------------------------------------------------------
// EncryptedV4Pubkey
// ---------------------------------------------------------------------------

/// A version 4 pubkey as it travels the network: the routing tag and
/// a sealed v3 body. Decryption is an explicit transition to
/// [`V3Pubkey`]; there is no half-decrypted state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EncryptedV4Pubkey {
    /// Routing tag, `double_sha512(version ‖ stream ‖ ripe)[32..64]`.
    pub tag: [u8; 32],
    /// The sealed v3 body.
    pub encrypted: CryptoBox,
}

impl EncryptedV4Pubkey {
    /// Serializes tag followed by the envelope.
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.tag);
        out.extend_from_slice(&self.encrypted.to_bytes());
    }

    /// Parses from a payload slice that spans exactly this pubkey.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 32 {
            return Err(BmError::Decode {
                reason: "v4 pubkey shorter than its tag".into(),
            });
        }
        let mut tag = [0u8; 32];
        tag.copy_from_slice(&data[..32]);
        Ok(Self {
            tag,
            encrypted: CryptoBox::from_bytes(&data[32..])?,
        })
    }

    /// Opens the envelope with the address's public decryption key and
    /// parses the v3 body inside.
    ///
    /// # Errors
    ///
    /// [`BmError::DecryptionFailed`] if the key does not match,
    /// [`BmError::Decode`] if the decrypted bytes are not a v3 body.
    pub fn decrypt(&self, public_decryption_key: &[u8; 32]) -> Result<V3Pubkey> {
        let plain = self.encrypted.decrypt(public_decryption_key)?;
        V3Pubkey::read(&mut plain.as_slice())
    }
}

// ---------------------------------------------------------------------------
// Pubkey
// ---------------------------------------------------------------------------

/// A usable (decrypted) pubkey of any version, as attached to an
/// address once known.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Pubkey {
    /// Version 2, unsigned.
    V2(V2Pubkey),
    /// Version 3.
    V3(V3Pubkey),
    /// Version 4 after decryption: the routing tag plus the v3 body.
    V4 {
        /// Routing tag carried on the wire.
        tag: [u8; 32],
        /// The decrypted body.
        inner: V3Pubkey,
    },
}

impl Pubkey {
    /// Address version this pubkey belongs to.
    pub fn version(&self) -> u64 {
        match self {
            Self::V2(_) => 2,
            Self::V3(_) => 3,
            Self::V4 { .. } => 4,
        }
    }

    /// Advertised behavior flags.
    pub fn behavior_bitfield(&self) -> u32 {
        match self {
            Self::V2(p) => p.behavior_bitfield,
            Self::V3(p) => p.behavior_bitfield,
            Self::V4 { inner, .. } => inner.behavior_bitfield,
        }
    }

    /// Uncompressed signing key.
    pub fn signing_key(&self) -> &[u8; 64] {
        match self {
            Self::V2(p) => &p.signing_key,
            Self::V3(p) => &p.signing_key,
            Self::V4 { inner, .. } => &inner.signing_key,
        }
    }

    /// Uncompressed encryption key.
    pub fn encryption_key(&self) -> &[u8; 64] {
        match self {
            Self::V2(p) => &p.encryption_key,
            Self::V3(p) => &p.encryption_key,
            Self::V4 { inner, .. } => &inner.encryption_key,
        }
    }

    /// Difficulty-per-byte demanded of senders; the network minimum
    /// for versions that predate the field.
    pub fn nonce_trials_per_byte(&self) -> u64 {
        match self {
            Self::V2(_) => 1000,
            Self::V3(p) => p.nonce_trials_per_byte,
            Self::V4 { inner, .. } => inner.nonce_trials_per_byte,
        }
    }

    /// Flat difficulty addend demanded of senders.
    pub fn extra_bytes(&self) -> u64 {
        match self {
            Self::V2(_) => 1000,
            Self::V3(p) => p.extra_bytes,
            Self::V4 { inner, .. } => inner.extra_bytes,
        }
    }

    /// DER signature, if this version carries one.
    pub fn signature(&self) -> Option<&[u8]> {
        match self {
            Self::V2(_) => None,
            Self::V3(p) => Some(&p.signature),
            Self::V4 { inner, .. } => Some(&inner.signature),
        }
    }

    /// RIPE digest of the embedded keys.
    pub fn ripe(&self) -> [u8; 20] {
        ripe_of(self.signing_key(), self.encryption_key())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use bitmsg_crypto::ecdsa::{derive_public_key, random_scalar};

    fn sample_v3() -> V3Pubkey {
        V3Pubkey {
            behavior_bitfield: BEHAVIOR_DOES_ACK,
            signing_key: derive_public_key(&random_scalar()).expect("valid"),
            encryption_key: derive_public_key(&random_scalar()).expect("valid"),
            nonce_trials_per_byte: 1000,
            extra_bytes: 1000,
            signature: vec![0x30, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x01],
        }
    }

    #[test]
    fn v2_roundtrip() {
        let pubkey = V2Pubkey {
            behavior_bitfield: 0,
            signing_key: [0x11; 64],
            encryption_key: [0x22; 64],
        };
        let mut bytes = Vec::new();
        pubkey.write(&mut bytes);
        assert_eq!(bytes.len(), 132);
        let parsed = V2Pubkey::read(&mut bytes.as_slice()).expect("parse");
        assert_eq!(parsed, pubkey);
    }

    #[test]
    fn v3_roundtrip() {
        let pubkey = sample_v3();
        let mut bytes = Vec::new();
        pubkey.write(&mut bytes);
        let parsed = V3Pubkey::read(&mut bytes.as_slice()).expect("parse");
        assert_eq!(parsed, pubkey);
    }

    #[test]
    fn v3_signable_excludes_signature() {
        let pubkey = sample_v3();
        let mut with_sig = Vec::new();
        pubkey.write(&mut with_sig);
        let mut without_sig = Vec::new();
        pubkey.write_signable(&mut without_sig);
        assert!(with_sig.len() > without_sig.len());
        assert_eq!(&with_sig[..without_sig.len()], &without_sig[..]);
    }

    #[test]
    fn v4_seal_open_roundtrip() {
        let decryption_key = random_scalar();
        let encryption_target = derive_public_key(&decryption_key).expect("valid");

        let inner = sample_v3();
        let mut body = Vec::new();
        inner.write(&mut body);
        let sealed = EncryptedV4Pubkey {
            tag: [0xAB; 32],
            encrypted: CryptoBox::encrypt(&body, &encryption_target).expect("seal"),
        };

        let mut wire = Vec::new();
        sealed.write(&mut wire);
        let parsed = EncryptedV4Pubkey::from_bytes(&wire).expect("parse");
        assert_eq!(parsed.tag, sealed.tag);

        let opened = parsed.decrypt(&decryption_key).expect("open");
        assert_eq!(opened, inner);
    }

    #[test]
    fn v4_wrong_key_fails() {
        let decryption_key = random_scalar();
        let encryption_target = derive_public_key(&decryption_key).expect("valid");
        let mut body = Vec::new();
        sample_v3().write(&mut body);
        let sealed = EncryptedV4Pubkey {
            tag: [0u8; 32],
            encrypted: CryptoBox::encrypt(&body, &encryption_target).expect("seal"),
        };
        assert!(sealed.decrypt(&random_scalar()).is_err());
    }

    #[test]
    fn ripe_is_stable() {
        let pubkey = sample_v3();
        assert_eq!(pubkey.ripe(), ripe_of(&pubkey.signing_key, &pubkey.encryption_key));
    }
}
