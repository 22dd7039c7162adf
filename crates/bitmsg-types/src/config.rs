//! Network parameters with protocol defaults.
//!
//! All operational parameters are centralized here. Every value has a
//! documented default matching the Bitmessage protocol.

use serde::{Deserialize, Serialize};

use crate::{BmError, Result};

/// One hour in seconds.
pub const HOUR: u64 = 60 * 60;

/// One day in seconds.
pub const DAY: u64 = 24 * HOUR;

/// Operational parameters of a node.
///
/// The proof-of-work parameters are the network-wide minimums; an
/// address may demand more via its pubkey's `nonce_trials_per_byte`
/// and `extra_bytes` fields, never less.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkParameters {
    /// TCP port this node listens on.
    pub port: u16,

    /// Difficulty factor per payload byte. Network minimum is 1000.
    pub nonce_trials_per_byte: u64,

    /// Flat difficulty addend, spreading the cost of small payloads.
    /// Network minimum is 1000.
    pub extra_bytes: u64,

    /// Idle connections with no traffic for this long are closed.
    pub connection_ttl_secs: u64,

    /// Maximum number of simultaneous connections.
    pub connection_limit: usize,

    /// Time-to-live for published pubkey objects. Also the window
    /// within which the same identity's pubkey is not re-sent.
    pub pubkey_ttl_secs: u64,

    /// Time-to-live for outbound msg and broadcast objects.
    pub msg_ttl_secs: u64,

    /// User agent advertised in the version handshake.
    pub user_agent: String,
}

impl Default for NetworkParameters {
    fn default() -> Self {
        Self {
            port: 8444,
            nonce_trials_per_byte: 1000,
            extra_bytes: 1000,
            connection_ttl_secs: 30 * 60,
            connection_limit: 150,
            pubkey_ttl_secs: 28 * DAY,
            msg_ttl_secs: 2 * DAY,
            user_agent: "/bitmsg:0.1.0/".into(),
        }
    }
}

impl NetworkParameters {
    /// Validates all parameter values.
    ///
    /// Returns an error if any value is outside its acceptable range.
    pub fn validate(&self) -> Result<()> {
        if self.nonce_trials_per_byte == 0 {
            return Err(BmError::Config {
                reason: "nonce_trials_per_byte must be greater than 0".into(),
            });
        }

        if self.connection_ttl_secs == 0 {
            return Err(BmError::Config {
                reason: "connection_ttl_secs must be greater than 0".into(),
            });
        }

        if self.connection_limit == 0 {
            return Err(BmError::Config {
                reason: "connection_limit must be greater than 0".into(),
            });
        }

        if self.msg_ttl_secs == 0 || self.pubkey_ttl_secs == 0 {
            return Err(BmError::Config {
                reason: "object TTLs must be greater than 0".into(),
            });
        }

        if self.user_agent.is_empty() {
            return Err(BmError::Config {
                reason: "user_agent must not be empty".into(),
            });
        }

        Ok(())
    }
}
