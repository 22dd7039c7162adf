//! The decrypted person-to-person message.
//!
//! A [`Plaintext`] is what the application sends and receives. On the
//! wire it only ever appears inside an ECIES envelope; the fields
//! here are its serialized form plus the local bookkeeping (status,
//! labels, inventory vector) that never leaves this node.
//!
//! Encoding 2 ("simple") packs subject and body as
//! `Subject:<subject>\nBody:<body>`.

use std::io::Read;

use bitmsg_crypto::random::random_array;
use bitmsg_types::{BmError, InventoryVector, Label, MessageStatus, Result};

use crate::address::{calculate_tag, BitmessageAddress};
use crate::codec::{
    read_array, read_u32, read_var_bytes, read_var_int, write_u32, write_var_bytes, write_var_int,
};
use crate::pubkey::{ripe_of, Pubkey, V2Pubkey, V3Pubkey};

/// The "simple" subject/body message encoding.
pub const ENCODING_SIMPLE: u64 = 2;

// ---------------------------------------------------------------------------
// PlaintextKind
// ---------------------------------------------------------------------------

/// Whether a plaintext travels as a msg or a broadcast.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PlaintextKind {
    /// Addressed to one recipient, carries a destination RIPE and
    /// acknowledgement data.
    Msg,
    /// Addressed to every subscriber of the sender.
    Broadcast,
}

// ---------------------------------------------------------------------------
// Plaintext
// ---------------------------------------------------------------------------

/// A decrypted message plus its local lifecycle state.
#[derive(Clone, Debug)]
pub struct Plaintext {
    /// Msg or broadcast.
    pub kind: PlaintextKind,
    /// Sender. After parsing an inbound message this is rebuilt from
    /// the embedded pubkey fields.
    pub from: BitmessageAddress,
    /// Recipient identity; set on outbound messages and filled in by
    /// the pipeline once an inbound msg decrypts.
    pub to: Option<BitmessageAddress>,
    /// Destination RIPE as written on the wire (msg only).
    pub destination_ripe: Option<[u8; 20]>,
    /// Message encoding; this implementation writes [`ENCODING_SIMPLE`].
    pub encoding: u64,
    /// Encoded message content.
    pub message: Vec<u8>,
    /// Acknowledgement payload the recipient floods back (msg only).
    pub ack_data: Option<Vec<u8>>,
    /// DER signature over the enclosing object's preimage.
    pub signature: Option<Vec<u8>>,
    /// Pipeline status.
    pub status: MessageStatus,
    /// Labels attached by the pipeline or the application.
    pub labels: Vec<Label>,
    /// Inventory vector of the enclosing object, once known.
    pub iv: Option<InventoryVector>,
    /// Repository-assigned identifier.
    pub id: Option<u64>,
}

impl Plaintext {
    /// Creates an outbound msg draft with fresh acknowledgement data.
    pub fn msg(
        from: BitmessageAddress,
        to: BitmessageAddress,
        subject: &str,
        body: &str,
    ) -> Self {
        let destination_ripe = Some(*to.ripe());
        Self {
            kind: PlaintextKind::Msg,
            from,
            to: Some(to),
            destination_ripe,
            encoding: ENCODING_SIMPLE,
            message: encode_simple(subject, body),
            ack_data: Some(random_array::<32>().to_vec()),
            signature: None,
            status: MessageStatus::Draft,
            labels: Vec::new(),
            iv: None,
            id: None,
        }
    }

    /// Creates an outbound broadcast draft.
    pub fn broadcast(from: BitmessageAddress, subject: &str, body: &str) -> Self {
        Self {
            kind: PlaintextKind::Broadcast,
            from,
            to: None,
            destination_ripe: None,
            encoding: ENCODING_SIMPLE,
            message: encode_simple(subject, body),
            ack_data: None,
            signature: None,
            status: MessageStatus::Draft,
            labels: Vec::new(),
            iv: None,
            id: None,
        }
    }

    /// Subject line, when the encoding carries one.
    pub fn subject(&self) -> Option<String> {
        decode_simple(&self.message).map(|(subject, _)| subject)
    }

    /// Body text, when the encoding carries one.
    pub fn body(&self) -> Option<String> {
        decode_simple(&self.message).map(|(_, body)| body)
    }

    /// Serializes the signing preimage portion: everything except the
    /// trailing signature.
    ///
    /// # Errors
    ///
    /// Returns [`BmError::Crypto`] if the sender's pubkey is unknown —
    /// the embedded key fields cannot be produced without it.
    pub fn write_signable(&self, out: &mut Vec<u8>) -> Result<()> {
        let pubkey = self.from.pubkey().ok_or_else(|| BmError::Crypto {
            reason: "sender pubkey missing, cannot serialize plaintext".into(),
        })?;
        write_var_int(out, self.from.version());
        write_var_int(out, self.from.stream());
        write_u32(out, pubkey.behavior_bitfield());
        out.extend_from_slice(pubkey.signing_key());
        out.extend_from_slice(pubkey.encryption_key());
        if self.from.version() >= 3 {
            write_var_int(out, pubkey.nonce_trials_per_byte());
            write_var_int(out, pubkey.extra_bytes());
        }
        if self.kind == PlaintextKind::Msg {
            let ripe = self.destination_ripe.ok_or_else(|| BmError::Crypto {
                reason: "msg plaintext has no destination ripe".into(),
            })?;
            out.extend_from_slice(&ripe);
        }
        write_var_int(out, self.encoding);
        write_var_bytes(out, &self.message);
        if self.kind == PlaintextKind::Msg {
            write_var_bytes(out, self.ack_data.as_deref().unwrap_or(&[]));
        }
        Ok(())
    }

    /// Serializes the full wire form: the signable portion plus the
    /// signature.
    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        self.write_signable(out)?;
        write_var_bytes(out, self.signature.as_deref().unwrap_or(&[]));
        Ok(())
    }

    /// Parses the decrypted content of a msg or broadcast envelope,
    /// rebuilding the sender address from the embedded pubkey fields.
    pub fn read(kind: PlaintextKind, reader: &mut impl Read) -> Result<Self> {
        let version = read_var_int(reader)?;
        let stream = read_var_int(reader)?;
        let behavior_bitfield = read_u32(reader)?;
        let signing_key: [u8; 64] = read_array(reader)?;
        let encryption_key: [u8; 64] = read_array(reader)?;
        let (nonce_trials_per_byte, extra_bytes) = if version >= 3 {
            (read_var_int(reader)?, read_var_int(reader)?)
        } else {
            (0, 0)
        };
        let destination_ripe = if kind == PlaintextKind::Msg {
            Some(read_array::<20>(reader)?)
        } else {
            None
        };
        let encoding = read_var_int(reader)?;
        let message = read_var_bytes(reader)?;
        let ack_data = if kind == PlaintextKind::Msg {
            let bytes = read_var_bytes(reader)?;
            (!bytes.is_empty()).then_some(bytes)
        } else {
            None
        };
        let signature = read_var_bytes(reader)?;

        let ripe = ripe_of(&signing_key, &encryption_key);
        let mut from = BitmessageAddress::new(version, stream, ripe)?;
        let pubkey = if version < 3 {
            Pubkey::V2(V2Pubkey {
                behavior_bitfield,
                signing_key,
                encryption_key,
            })
        } else {
            let inner = V3Pubkey {
                behavior_bitfield,
                signing_key,
                encryption_key,
                nonce_trials_per_byte,
                extra_bytes,
                signature: Vec::new(),
            };
            if version >= 4 {
                Pubkey::V4 {
                    tag: calculate_tag(version, stream, &ripe),
                    inner,
                }
            } else {
                Pubkey::V3(inner)
            }
        };
        from.attach_pubkey(pubkey)?;

        Ok(Self {
            kind,
            from,
            to: None,
            destination_ripe,
            encoding,
            message,
            ack_data,
            signature: (!signature.is_empty()).then_some(signature),
            status: MessageStatus::Received,
            labels: Vec::new(),
            iv: None,
            id: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Encoding 2
// ---------------------------------------------------------------------------

fn encode_simple(subject: &str, body: &str) -> Vec<u8> {
    format!("Subject:{subject}\nBody:{body}").into_bytes()
}

fn decode_simple(message: &[u8]) -> Option<(String, String)> {
    let text = std::str::from_utf8(message).ok()?;
    let rest = text.strip_prefix("Subject:")?;
    let (subject, body) = rest.split_once("\nBody:")?;
    Some((subject.to_owned(), body.to_owned()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::privkey::PrivateKey;

    fn identity() -> BitmessageAddress {
        let key = PrivateKey::new_random(4, 1, 1000, 1000).expect("generate");
        BitmessageAddress::from_private_key(key).expect("address")
    }

    #[test]
    fn msg_roundtrip_preserves_fields() {
        let from = identity();
        let to = identity();
        let mut plaintext = Plaintext::msg(from, to, "hello", "world");
        plaintext.signature = Some(vec![1, 2, 3]);

        let mut bytes = Vec::new();
        plaintext.write(&mut bytes).expect("write");
        let parsed = Plaintext::read(PlaintextKind::Msg, &mut bytes.as_slice()).expect("read");

        assert_eq!(parsed.from, plaintext.from);
        assert_eq!(parsed.destination_ripe, plaintext.destination_ripe);
        assert_eq!(parsed.encoding, ENCODING_SIMPLE);
        assert_eq!(parsed.message, plaintext.message);
        assert_eq!(parsed.ack_data, plaintext.ack_data);
        assert_eq!(parsed.signature, plaintext.signature);
    }

    #[test]
    fn broadcast_roundtrip() {
        let from = identity();
        let mut plaintext = Plaintext::broadcast(from, "announce", "to everyone");
        plaintext.signature = Some(vec![9]);

        let mut bytes = Vec::new();
        plaintext.write(&mut bytes).expect("write");
        let parsed =
            Plaintext::read(PlaintextKind::Broadcast, &mut bytes.as_slice()).expect("read");

        assert_eq!(parsed.from, plaintext.from);
        assert_eq!(parsed.destination_ripe, None);
        assert_eq!(parsed.ack_data, None);
        assert_eq!(parsed.message, plaintext.message);
    }

    #[test]
    fn subject_body_helpers() {
        let plaintext = Plaintext::broadcast(identity(), "the subject", "the\nbody");
        assert_eq!(plaintext.subject().as_deref(), Some("the subject"));
        assert_eq!(plaintext.body().as_deref(), Some("the\nbody"));
    }

    #[test]
    fn msg_gets_fresh_ack_data() {
        let from = identity();
        let to = identity();
        let a = Plaintext::msg(from.clone(), to.clone(), "s", "b");
        let b = Plaintext::msg(from, to, "s", "b");
        assert_ne!(a.ack_data, b.ack_data);
        assert_eq!(a.ack_data.as_ref().map(Vec::len), Some(32));
    }

    #[test]
    fn signable_excludes_signature() {
        let mut plaintext = Plaintext::broadcast(identity(), "s", "b");
        plaintext.signature = Some(vec![0xAA; 70]);
        let mut signable = Vec::new();
        plaintext.write_signable(&mut signable).expect("write");
        let mut full = Vec::new();
        plaintext.write(&mut full).expect("write");
        assert!(full.len() > signable.len());
        assert_eq!(&full[..signable.len()], &signable[..]);
    }
}
