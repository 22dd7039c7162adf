//! Typed object payloads.
//!
//! The payload of an [`crate::object::ObjectMessage`] is discriminated
//! by the `(object_type, version)` pair of the header. Unknown
//! combinations parse into [`ObjectPayload::Generic`] so the bytes can
//! still be stored and relayed; they are never delivered to the
//! application.
//!
//! Encrypted payloads (msg, broadcast, v4 pubkey) stay encrypted in
//! this representation. Decryption is an explicit transition that
//! yields a different type.

use bitmsg_crypto::cryptobox::CryptoBox;
use bitmsg_types::{BmError, ObjectType, Result};

use crate::plaintext::{Plaintext, PlaintextKind};
use crate::pubkey::{EncryptedV4Pubkey, Pubkey, V2Pubkey, V3Pubkey};

// ---------------------------------------------------------------------------
// GetPubkey
// ---------------------------------------------------------------------------

/// Identifies the address whose pubkey is requested: by RIPE for
/// address versions up to 3, by tag from version 4 on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RipeOrTag {
    /// 20-byte RIPE digest.
    Ripe([u8; 20]),
    /// 32-byte routing tag.
    Tag([u8; 32]),
}

impl AsRef<[u8]> for RipeOrTag {
    fn as_ref(&self) -> &[u8] {
        match self {
            Self::Ripe(r) => r,
            Self::Tag(t) => t,
        }
    }
}

/// A request for somebody's pubkey.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GetPubkey {
    /// Whose pubkey is wanted.
    pub target: RipeOrTag,
}

impl GetPubkey {
    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.target.as_ref());
    }

    fn from_bytes(version: u64, data: &[u8]) -> Result<Self> {
        let target = if version < 4 {
            if data.len() != 20 {
                return Err(BmError::Decode {
                    reason: format!("getpubkey v{version} payload is {} bytes, expected 20", data.len()),
                });
            }
            let mut ripe = [0u8; 20];
            ripe.copy_from_slice(data);
            RipeOrTag::Ripe(ripe)
        } else {
            if data.len() != 32 {
                return Err(BmError::Decode {
                    reason: format!("getpubkey v{version} payload is {} bytes, expected 32", data.len()),
                });
            }
            let mut tag = [0u8; 32];
            tag.copy_from_slice(data);
            RipeOrTag::Tag(tag)
        };
        Ok(Self { target })
    }
}

// ---------------------------------------------------------------------------
// Pubkey payload
// ---------------------------------------------------------------------------

/// A pubkey as it appears in an object: plain for v2/v3, sealed for v4.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PubkeyPayload {
    /// v2 or v3, readable as-is.
    Plain(Pubkey),
    /// v4: only the holder of the address can open it.
    Encrypted(EncryptedV4Pubkey),
}

impl PubkeyPayload {
    fn write(&self, out: &mut Vec<u8>) {
        match self {
            Self::Plain(Pubkey::V2(p)) => p.write(out),
            Self::Plain(Pubkey::V3(p)) => p.write(out),
            // A decrypted v4 pubkey is never put back on the wire;
            // serialize its unencrypted form (tag ‖ v3 body) the way
            // repositories expect it.
            Self::Plain(Pubkey::V4 { tag, inner }) => {
                out.extend_from_slice(tag);
                inner.write(out);
            }
            Self::Encrypted(p) => p.write(out),
        }
    }
}

// ---------------------------------------------------------------------------
// Msg payload
// ---------------------------------------------------------------------------

/// A person-to-person message as flooded: an opaque envelope.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EncryptedMsg {
    /// The sealed [`Plaintext`].
    pub encrypted: CryptoBox,
}

impl EncryptedMsg {
    /// Attempts to open the envelope with an identity's private
    /// encryption scalar and parse the plaintext inside.
    pub fn decrypt(&self, private_encryption_key: &[u8; 32]) -> Result<Plaintext> {
        let plain = self.encrypted.decrypt(private_encryption_key)?;
        Plaintext::read(PlaintextKind::Msg, &mut plain.as_slice())
    }
}

// ---------------------------------------------------------------------------
// Broadcast payload
// ---------------------------------------------------------------------------

/// A broadcast as flooded. v5 prepends the sender's tag so
/// subscribers can match without trial decryption.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BroadcastPayload {
    /// Version 4, for sender addresses up to v3.
    V4 {
        /// The sealed [`Plaintext`].
        encrypted: CryptoBox,
    },
    /// Version 5, for sender addresses from v4 on.
    V5 {
        /// The sender address's routing tag.
        tag: [u8; 32],
        /// The sealed [`Plaintext`].
        encrypted: CryptoBox,
    },
}

impl BroadcastPayload {
    /// The routing tag, present from v5 on.
    pub fn tag(&self) -> Option<&[u8; 32]> {
        match self {
            Self::V4 { .. } => None,
            Self::V5 { tag, .. } => Some(tag),
        }
    }

    /// Attempts to open the envelope with a subscription's public
    /// decryption key and parse the plaintext inside.
    pub fn decrypt(&self, public_decryption_key: &[u8; 32]) -> Result<Plaintext> {
        let encrypted = match self {
            Self::V4 { encrypted } | Self::V5 { encrypted, .. } => encrypted,
        };
        let plain = encrypted.decrypt(public_decryption_key)?;
        Plaintext::read(PlaintextKind::Broadcast, &mut plain.as_slice())
    }
}

// ---------------------------------------------------------------------------
// ObjectPayload
// ---------------------------------------------------------------------------

/// The typed payload of a network object.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ObjectPayload {
    /// A pubkey request.
    GetPubkey(GetPubkey),
    /// A pubkey.
    Pubkey(PubkeyPayload),
    /// A person-to-person message.
    Msg(EncryptedMsg),
    /// A broadcast.
    Broadcast(BroadcastPayload),
    /// Anything this implementation cannot interpret. Relayed, never
    /// delivered.
    Generic(Vec<u8>),
}

impl ObjectPayload {
    /// Serializes the payload body (everything after the object
    /// header).
    pub fn write(&self, out: &mut Vec<u8>) {
        match self {
            Self::GetPubkey(p) => p.write(out),
            Self::Pubkey(p) => p.write(out),
            Self::Msg(p) => out.extend_from_slice(&p.encrypted.to_bytes()),
            Self::Broadcast(BroadcastPayload::V4 { encrypted }) => {
                out.extend_from_slice(&encrypted.to_bytes());
            }
            Self::Broadcast(BroadcastPayload::V5 { tag, encrypted }) => {
                out.extend_from_slice(tag);
                out.extend_from_slice(&encrypted.to_bytes());
            }
            Self::Generic(data) => out.extend_from_slice(data),
        }
    }

    /// Parses a payload according to the header's type and version.
    ///
    /// Unknown `(type, version)` combinations become
    /// [`ObjectPayload::Generic`]; malformed known combinations are a
    /// [`BmError::Decode`].
    pub fn parse(object_type: u32, version: u64, data: &[u8]) -> Result<Self> {
        match ObjectType::from_number(object_type) {
            ObjectType::GetPubkey if (2..=4).contains(&version) => {
                Ok(Self::GetPubkey(GetPubkey::from_bytes(version, data)?))
            }
            ObjectType::Pubkey if version == 2 => Ok(Self::Pubkey(PubkeyPayload::Plain(
                Pubkey::V2(V2Pubkey::read(&mut &data[..])?),
            ))),
            ObjectType::Pubkey if version == 3 => Ok(Self::Pubkey(PubkeyPayload::Plain(
                Pubkey::V3(V3Pubkey::read(&mut &data[..])?),
            ))),
            ObjectType::Pubkey if version == 4 => Ok(Self::Pubkey(PubkeyPayload::Encrypted(
                EncryptedV4Pubkey::from_bytes(data)?,
            ))),
            ObjectType::Msg => Ok(Self::Msg(EncryptedMsg {
                encrypted: CryptoBox::from_bytes(data)?,
            })),
            ObjectType::Broadcast if version == 4 => Ok(Self::Broadcast(BroadcastPayload::V4 {
                encrypted: CryptoBox::from_bytes(data)?,
            })),
            ObjectType::Broadcast if version == 5 => {
                if data.len() < 32 {
                    return Err(BmError::Decode {
                        reason: "v5 broadcast shorter than its tag".into(),
                    });
                }
                let mut tag = [0u8; 32];
                tag.copy_from_slice(&data[..32]);
                Ok(Self::Broadcast(BroadcastPayload::V5 {
                    tag,
                    encrypted: CryptoBox::from_bytes(&data[32..])?,
                }))
            }
            _ => Ok(Self::Generic(data.to_vec())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use bitmsg_crypto::ecdsa::{derive_public_key, random_scalar};

    #[test]
    fn getpubkey_ripe_roundtrip() {
        let payload = ObjectPayload::GetPubkey(GetPubkey {
            target: RipeOrTag::Ripe([0x42; 20]),
        });
        let mut bytes = Vec::new();
        payload.write(&mut bytes);
        assert_eq!(bytes.len(), 20);
        let parsed = ObjectPayload::parse(0, 3, &bytes).expect("parse");
        assert_eq!(parsed, payload);
    }

    #[test]
    fn getpubkey_tag_roundtrip() {
        let payload = ObjectPayload::GetPubkey(GetPubkey {
            target: RipeOrTag::Tag([0x42; 32]),
        });
        let mut bytes = Vec::new();
        payload.write(&mut bytes);
        assert_eq!(bytes.len(), 32);
        let parsed = ObjectPayload::parse(0, 4, &bytes).expect("parse");
        assert_eq!(parsed, payload);
    }

    #[test]
    fn getpubkey_wrong_length_rejected() {
        assert!(ObjectPayload::parse(0, 4, &[0u8; 20]).is_err());
        assert!(ObjectPayload::parse(0, 3, &[0u8; 32]).is_err());
    }

    #[test]
    fn unknown_type_is_generic() {
        let data = vec![1, 2, 3, 4];
        let parsed = ObjectPayload::parse(42, 1, &data).expect("parse");
        assert_eq!(parsed, ObjectPayload::Generic(data.clone()));
        let mut bytes = Vec::new();
        parsed.write(&mut bytes);
        assert_eq!(bytes, data);
    }

    #[test]
    fn unknown_broadcast_version_is_generic() {
        let data = vec![0u8; 64];
        let parsed = ObjectPayload::parse(3, 7, &data).expect("parse");
        assert!(matches!(parsed, ObjectPayload::Generic(_)));
    }

    #[test]
    fn msg_payload_roundtrip() {
        let scalar = random_scalar();
        let public = derive_public_key(&scalar).expect("valid");
        let encrypted = CryptoBox::encrypt(b"not a real plaintext", &public).expect("seal");
        let payload = ObjectPayload::Msg(EncryptedMsg { encrypted });
        let mut bytes = Vec::new();
        payload.write(&mut bytes);
        let parsed = ObjectPayload::parse(2, 1, &bytes).expect("parse");
        assert_eq!(parsed, payload);
    }

    #[test]
    fn v5_broadcast_roundtrip_keeps_tag() {
        let scalar = random_scalar();
        let public = derive_public_key(&scalar).expect("valid");
        let encrypted = CryptoBox::encrypt(b"broadcast body", &public).expect("seal");
        let payload = ObjectPayload::Broadcast(BroadcastPayload::V5 {
            tag: [0x77; 32],
            encrypted,
        });
        let mut bytes = Vec::new();
        payload.write(&mut bytes);
        let parsed = ObjectPayload::parse(3, 5, &bytes).expect("parse");
        assert_eq!(parsed, payload);
    }
}
