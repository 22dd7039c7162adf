//! The network-flooded object envelope.
//!
//! ```text
//! nonce(8) ‖ expiresTime(i64) ‖ objectType(u32) ‖ varint(version) ‖
//! varint(stream) ‖ payload
//! ```
//!
//! The inventory vector is the first 32 bytes of the double SHA-512
//! of exactly these bytes, nonce included. The signing preimage is
//! the header without the nonce, followed by the payload's signable
//! form (tag first for v4 pubkeys and v5 broadcasts, signature always
//! excluded).
//!
//! Objects that carry encrypted payloads are signed before encryption
//! and verified after decryption; the builders and verifiers here
//! enforce that order.

use std::io::Cursor;

use bitmsg_crypto::cryptobox::CryptoBox;
use bitmsg_crypto::ecdsa::{derive_public_key, sign, verify, SigDigest};
use bitmsg_crypto::hash::double_sha512;
use bitmsg_types::{BmError, InventoryVector, ObjectType, Result};

use crate::address::BitmessageAddress;
use crate::codec::{read_array, read_i64, read_u32, read_var_int, write_i64, write_u32, write_var_int};
use crate::payload::{BroadcastPayload, EncryptedMsg, GetPubkey, ObjectPayload, PubkeyPayload, RipeOrTag};
use crate::plaintext::{Plaintext, PlaintextKind};
use crate::pubkey::{Pubkey, V3Pubkey};

// ---------------------------------------------------------------------------
// ObjectMessage
// ---------------------------------------------------------------------------

/// A network object: proof-of-work stamp, expiry, routing header, and
/// typed payload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ObjectMessage {
    /// The proof-of-work answer; `None` until a search completed.
    pub nonce: Option<[u8; 8]>,
    /// UNIX time after which the network drops the object.
    pub expires_time: i64,
    /// Raw object type code, preserved for unknown types.
    pub object_type: u32,
    /// Payload version (address version for getpubkey/pubkey, 1 for
    /// msg, 4 or 5 for broadcast).
    pub version: u64,
    /// Stream the object floods on.
    pub stream: u64,
    /// The typed payload.
    pub payload: ObjectPayload,
}

impl ObjectMessage {
    /// The type code mapped onto the registry.
    pub fn object_kind(&self) -> ObjectType {
        ObjectType::from_number(self.object_type)
    }

    /// Serializes the object without the nonce. `SHA-512` of this is
    /// the proof-of-work initial hash.
    pub fn bytes_without_nonce(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_i64(&mut out, self.expires_time);
        write_u32(&mut out, self.object_type);
        write_var_int(&mut out, self.version);
        write_var_int(&mut out, self.stream);
        self.payload.write(&mut out);
        out
    }

    /// Serializes the full object. A missing nonce is written as
    /// zeros.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.nonce.unwrap_or([0u8; 8]));
        out.extend_from_slice(&self.bytes_without_nonce());
        out
    }

    /// Parses an object from its wire bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let nonce: [u8; 8] = read_array(&mut cursor)?;
        let expires_time = read_i64(&mut cursor)?;
        let object_type = read_u32(&mut cursor)?;
        let version = read_var_int(&mut cursor)?;
        let stream = read_var_int(&mut cursor)?;
        let consumed = cursor.position() as usize;
        let payload = ObjectPayload::parse(object_type, version, &data[consumed..])?;
        Ok(Self {
            nonce: Some(nonce),
            expires_time,
            object_type,
            version,
            stream,
            payload,
        })
    }

    /// The object's network-wide identifier:
    /// `double_sha512(bytes)[0..32]`.
    pub fn inventory_vector(&self) -> InventoryVector {
        let digest = double_sha512(&self.to_bytes());
        let mut iv = [0u8; 32];
        iv.copy_from_slice(&digest[..32]);
        InventoryVector::new(iv)
    }

    /// The header part of every signing preimage: everything of
    /// [`Self::bytes_without_nonce`] up to the payload.
    fn signable_header(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_i64(&mut out, self.expires_time);
        write_u32(&mut out, self.object_type);
        write_var_int(&mut out, self.version);
        write_var_int(&mut out, self.stream);
        out
    }

    // -----------------------------------------------------------------
    // Builders
    // -----------------------------------------------------------------

    /// Builds a `getpubkey` request for a contact.
    pub fn getpubkey(contact: &BitmessageAddress, expires_time: i64) -> Self {
        let target = if contact.version() < 4 {
            RipeOrTag::Ripe(*contact.ripe())
        } else {
            RipeOrTag::Tag(*contact.tag())
        };
        Self {
            nonce: None,
            expires_time,
            object_type: ObjectType::GetPubkey.number(),
            version: contact.version(),
            stream: contact.stream(),
            payload: ObjectPayload::GetPubkey(GetPubkey { target }),
        }
    }

    /// Builds, signs, and (for v4) seals an identity's pubkey object
    /// on the requested stream.
    ///
    /// # Errors
    ///
    /// Returns [`BmError::Crypto`] if the address is not an identity
    /// or its version does not publish pubkeys this way.
    pub fn pubkey(identity: &BitmessageAddress, target_stream: u64, expires_time: i64) -> Result<Self> {
        let private_key = identity.private_key().ok_or_else(|| BmError::Crypto {
            reason: "pubkey objects require the identity's private key".into(),
        })?;

        let mut object = Self {
            nonce: None,
            expires_time,
            object_type: ObjectType::Pubkey.number(),
            version: identity.version(),
            stream: target_stream,
            // Placeholder, replaced below once signed.
            payload: ObjectPayload::Generic(Vec::new()),
        };

        match identity.pubkey() {
            Some(Pubkey::V3(inner)) => {
                let mut signed = inner.clone();
                let mut preimage = object.signable_header();
                signed.write_signable(&mut preimage);
                signed.signature = sign(
                    private_key.private_signing_key(),
                    &preimage,
                    SigDigest::for_address_version(identity.version()),
                )?;
                object.payload = ObjectPayload::Pubkey(PubkeyPayload::Plain(Pubkey::V3(signed)));
            }
            Some(Pubkey::V4 { tag, inner }) => {
                let mut signed = inner.clone();
                let mut preimage = object.signable_header();
                preimage.extend_from_slice(tag);
                signed.write_signable(&mut preimage);
                signed.signature = sign(
                    private_key.private_signing_key(),
                    &preimage,
                    SigDigest::for_address_version(identity.version()),
                )?;

                let mut body = Vec::new();
                signed.write(&mut body);
                let target = derive_public_key(identity.public_decryption_key())?;
                object.payload = ObjectPayload::Pubkey(PubkeyPayload::Encrypted(
                    crate::pubkey::EncryptedV4Pubkey {
                        tag: *tag,
                        encrypted: CryptoBox::encrypt(&body, &target)?,
                    },
                ));
            }
            _ => {
                return Err(BmError::Crypto {
                    reason: format!(
                        "cannot publish a pubkey for address version {}",
                        identity.version()
                    ),
                })
            }
        }
        Ok(object)
    }

    /// Builds a msg object: signs the plaintext (storing the signature
    /// back into it), then seals it to the recipient's encryption key.
    ///
    /// # Errors
    ///
    /// Returns [`BmError::Crypto`] if the sender is not an identity or
    /// the recipient's pubkey is unknown.
    pub fn msg(plaintext: &mut Plaintext, expires_time: i64) -> Result<Self> {
        if plaintext.kind != PlaintextKind::Msg {
            return Err(BmError::Crypto {
                reason: "plaintext is not a msg".into(),
            });
        }
        let to = plaintext.to.clone().ok_or_else(|| BmError::Crypto {
            reason: "msg has no recipient".into(),
        })?;
        let recipient_pubkey = to.pubkey().ok_or_else(|| BmError::Crypto {
            reason: "recipient pubkey unknown".into(),
        })?;
        let private_key = plaintext.from.private_key().cloned().ok_or_else(|| BmError::Crypto {
            reason: "msg sender is not an identity".into(),
        })?;

        let mut object = Self {
            nonce: None,
            expires_time,
            object_type: ObjectType::Msg.number(),
            version: 1,
            stream: to.stream(),
            payload: ObjectPayload::Generic(Vec::new()),
        };

        let mut preimage = object.signable_header();
        plaintext.write_signable(&mut preimage)?;
        plaintext.signature = Some(sign(
            private_key.private_signing_key(),
            &preimage,
            SigDigest::for_address_version(plaintext.from.version()),
        )?);

        let mut body = Vec::new();
        plaintext.write(&mut body)?;
        object.payload = ObjectPayload::Msg(EncryptedMsg {
            encrypted: CryptoBox::encrypt(&body, recipient_pubkey.encryption_key())?,
        });
        Ok(object)
    }

    /// Builds a broadcast object: signs the plaintext, then seals it
    /// to the key any subscriber can derive from the sender's address.
    ///
    /// # Errors
    ///
    /// Returns [`BmError::Crypto`] if the sender is not an identity.
    pub fn broadcast(plaintext: &mut Plaintext, expires_time: i64) -> Result<Self> {
        if plaintext.kind != PlaintextKind::Broadcast {
            return Err(BmError::Crypto {
                reason: "plaintext is not a broadcast".into(),
            });
        }
        let from = plaintext.from.clone();
        let private_key = from.private_key().cloned().ok_or_else(|| BmError::Crypto {
            reason: "broadcast sender is not an identity".into(),
        })?;
        let version = if from.version() >= 4 { 5 } else { 4 };

        let mut object = Self {
            nonce: None,
            expires_time,
            object_type: ObjectType::Broadcast.number(),
            version,
            stream: from.stream(),
            payload: ObjectPayload::Generic(Vec::new()),
        };

        let mut preimage = object.signable_header();
        if version == 5 {
            preimage.extend_from_slice(from.tag());
        }
        plaintext.write_signable(&mut preimage)?;
        plaintext.signature = Some(sign(
            private_key.private_signing_key(),
            &preimage,
            SigDigest::for_address_version(from.version()),
        )?);

        let mut body = Vec::new();
        plaintext.write(&mut body)?;
        let target = derive_public_key(from.public_decryption_key())?;
        let encrypted = CryptoBox::encrypt(&body, &target)?;
        object.payload = ObjectPayload::Broadcast(if version == 5 {
            BroadcastPayload::V5 {
                tag: *from.tag(),
                encrypted,
            }
        } else {
            BroadcastPayload::V4 { encrypted }
        });
        Ok(object)
    }

    // -----------------------------------------------------------------
    // Verification
    // -----------------------------------------------------------------

    /// Verifies a decrypted msg or broadcast plaintext against this
    /// object's header, using the pubkey embedded in the plaintext.
    pub fn verify_plaintext_signature(&self, plaintext: &Plaintext) -> bool {
        let Some(signature) = plaintext.signature.as_deref() else {
            return false;
        };
        let Some(pubkey) = plaintext.from.pubkey() else {
            return false;
        };
        let mut preimage = self.signable_header();
        if self.object_kind() == ObjectType::Broadcast && self.version >= 5 {
            if let ObjectPayload::Broadcast(BroadcastPayload::V5 { tag, .. }) = &self.payload {
                preimage.extend_from_slice(tag);
            }
        }
        if plaintext.write_signable(&mut preimage).is_err() {
            return false;
        }
        verify(
            pubkey.signing_key(),
            &preimage,
            signature,
            SigDigest::for_address_version(plaintext.from.version()),
        )
    }

    /// Verifies a (possibly just decrypted) pubkey body against this
    /// object's header. For v4 the tag comes first in the preimage.
    pub fn verify_pubkey_signature(&self, tag: Option<&[u8; 32]>, body: &V3Pubkey) -> bool {
        let mut preimage = self.signable_header();
        if let Some(tag) = tag {
            preimage.extend_from_slice(tag);
        }
        body.write_signable(&mut preimage);
        verify(
            &body.signing_key,
            &preimage,
            &body.signature,
            SigDigest::for_address_version(self.version),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
