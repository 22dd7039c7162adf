//! Core shared types for the bitmsg node.
//!
//! This crate defines the value types and the central error enum used
//! across the workspace. No other crate should define shared types —
//! everything lives here.

pub mod config;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// InventoryVector
// ---------------------------------------------------------------------------

/// 32-byte network-wide object identifier.
///
/// Computed as the first 32 bytes of `SHA-512(SHA-512(object bytes))`,
/// covering the nonce, header, and payload. For the lifetime of an
/// object this value uniquely identifies it in the network.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InventoryVector([u8; 32]);

impl InventoryVector {
    /// The fixed byte length of an inventory vector.
    pub const LEN: usize = 32;

    /// Creates an `InventoryVector` from raw bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for InventoryVector {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for InventoryVector {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for InventoryVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for InventoryVector {
    type Err = BmError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| BmError::Decode {
            reason: "invalid hex encoding for inventory vector".into(),
        })?;
        if bytes.len() != 32 {
            return Err(BmError::Decode {
                reason: format!("expected 32 bytes for inventory vector, got {}", bytes.len()),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

// ---------------------------------------------------------------------------
// ObjectType
// ---------------------------------------------------------------------------

/// Numeric registry of network object types.
///
/// Unknown codes are preserved opaquely so the object can still be
/// stored and relayed, but such objects are never delivered to the
/// application listener.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    /// Request for the pubkey belonging to a ripe or tag.
    GetPubkey,
    /// A public key, possibly encrypted (v4).
    Pubkey,
    /// A person-to-person message.
    Msg,
    /// A message to all subscribers of an address.
    Broadcast,
    /// Any object type this implementation does not know about.
    Unknown(u32),
}

impl ObjectType {
    /// Returns the wire code of this object type.
    pub fn number(&self) -> u32 {
        match self {
            Self::GetPubkey => 0,
            Self::Pubkey => 1,
            Self::Msg => 2,
            Self::Broadcast => 3,
            Self::Unknown(n) => *n,
        }
    }

    /// Maps a wire code onto the registry.
    pub fn from_number(number: u32) -> Self {
        match number {
            0 => Self::GetPubkey,
            1 => Self::Pubkey,
            2 => Self::Msg,
            3 => Self::Broadcast,
            n => Self::Unknown(n),
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GetPubkey => write!(f, "getpubkey"),
            Self::Pubkey => write!(f, "pubkey"),
            Self::Msg => write!(f, "msg"),
            Self::Broadcast => write!(f, "broadcast"),
            Self::Unknown(n) => write!(f, "unknown({n})"),
        }
    }
}

// ---------------------------------------------------------------------------
// MessageStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a plaintext message.
///
/// Transitions are driven by the send/receive pipeline:
///
/// ```text
/// Draft → PubkeyRequested → DoingProofOfWork → Sent → AckReceived
///                                   ↑
/// Draft ────────────────────────────┘        (recipient pubkey known)
/// Received                                   (inbound only)
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum MessageStatus {
    /// Message exists locally and has not entered the pipeline.
    Draft,
    /// A `getpubkey` object for the recipient is in flight.
    PubkeyRequested,
    /// The object is built and queued at the proof-of-work engine.
    DoingProofOfWork,
    /// The object was flooded to the network.
    Sent,
    /// The message was received and decrypted by this node.
    Received,
    /// The recipient returned the acknowledgement payload.
    AckReceived,
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::PubkeyRequested => write!(f, "pubkey-requested"),
            Self::DoingProofOfWork => write!(f, "doing-proof-of-work"),
            Self::Sent => write!(f, "sent"),
            Self::Received => write!(f, "received"),
            Self::AckReceived => write!(f, "ack-received"),
        }
    }
}

// ---------------------------------------------------------------------------
// Label
// ---------------------------------------------------------------------------

/// Well-known label categories.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum LabelType {
    /// Inbound messages.
    Inbox,
    /// Outbound messages that completed the pipeline.
    Sent,
    /// Messages not yet sent.
    Draft,
    /// Deleted messages.
    Trash,
    /// Messages not yet read by the application.
    Unread,
    /// Messages received through a broadcast subscription.
    Broadcast,
}

/// A user-visible message label.
///
/// Labels are owned by the message repository; the pipeline only ever
/// requests them by [`LabelType`] and attaches the returned values.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Label {
    /// Repository-assigned identifier.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Well-known category, if any.
    pub kind: Option<LabelType>,
    /// Display color, 0xAARRGGBB.
    pub color: u32,
}

impl Label {
    /// Creates a label of a well-known category with a default name.
    pub fn of(id: i64, kind: LabelType) -> Self {
        let name = match kind {
            LabelType::Inbox => "Inbox",
            LabelType::Sent => "Sent",
            LabelType::Draft => "Draft",
            LabelType::Trash => "Trash",
            LabelType::Unread => "Unread",
            LabelType::Broadcast => "Broadcast",
        };
        Self {
            id,
            name: name.into(),
            kind: Some(kind),
            color: 0xFF000000,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

// ---------------------------------------------------------------------------
// BmError
// ---------------------------------------------------------------------------

/// Central error type for the bitmsg workspace.
///
/// Protocol-layer errors are handled at the connection task boundary
/// (drop the object or disconnect the peer); application errors bubble
/// to the caller; I/O errors inside listeners are logged and swallowed
/// to preserve the dispatch loop.
#[derive(Debug, Error)]
pub enum BmError {
    /// Bad framing: wrong magic, truncated payload, bad checksum, or an
    /// oversized frame. The peer is disconnected.
    #[error("malformed wire data: {reason}")]
    MalformedWire {
        /// Description of the framing violation.
        reason: String,
    },

    /// A well-framed but unparseable object or payload.
    #[error("decode error: {reason}")]
    Decode {
        /// Description of the parse failure.
        reason: String,
    },

    /// The object's nonce does not satisfy its proof-of-work target.
    #[error("proof of work invalid")]
    PowInvalid,

    /// Decryption succeeded but the embedded signature does not verify.
    #[error("signature invalid")]
    SignatureInvalid,

    /// MAC mismatch or AES failure. Expected and silent for most
    /// objects — they simply are not addressed to us.
    #[error("decryption failed")]
    DecryptionFailed,

    /// The object's expiry time is too far in the past.
    #[error("object expired at {expires_time}")]
    Expired {
        /// The object's expiry timestamp.
        expires_time: i64,
    },

    /// The object's expiry time is too far in the future.
    #[error("object expires too far in the future at {expires_time}")]
    FarFuture {
        /// The object's expiry timestamp.
        expires_time: i64,
    },

    /// A repository port failed.
    #[error("storage error: {reason}")]
    Storage {
        /// Description of the port failure.
        reason: String,
    },

    /// Cooperative shutdown. Not an error for callers that requested it.
    #[error("operation cancelled")]
    Cancelled,

    /// A proof-of-work search was preempted or shut down.
    #[error("proof of work aborted")]
    PowAborted,

    /// A cryptographic operation failed.
    #[error("crypto error: {reason}")]
    Crypto {
        /// Description of the cryptographic failure.
        reason: String,
    },

    /// A Bitmessage address string failed to parse or checksum.
    #[error("invalid address: {reason}")]
    InvalidAddress {
        /// Description of why the address is invalid.
        reason: String,
    },

    /// A socket or channel operation failed.
    #[error("i/o error: {reason}")]
    Io {
        /// Description of the I/O failure.
        reason: String,
    },

    /// A configuration value is invalid.
    #[error("config error: {reason}")]
    Config {
        /// Description of the configuration problem.
        reason: String,
    },
}

impl From<std::io::Error> for BmError {
    fn from(e: std::io::Error) -> Self {
        Self::Io {
            reason: e.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Result alias
// ---------------------------------------------------------------------------

/// Convenience result type using [`BmError`].
pub type Result<T> = std::result::Result<T, BmError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
