//! The Bitmessage object model and wire protocol.
//!
//! Everything that gives the network its shape lives here:
//!
//! - [`codec`] — var-int, var-bytes, var-string primitives
//! - [`address`] — Bitmessage addresses and their derivations
//! - [`privkey`] — identity key material, WIF import/export
//! - [`pubkey`] — pubkey payload versions 2 through 4
//! - [`plaintext`] — the decrypted person-to-person message
//! - [`object`] — the network-flooded `ObjectMessage` envelope
//! - [`payload`] — typed object payloads and their parsers
//! - [`pow`] — proof-of-work target math and verification
//! - [`wire`] — frame format and the protocol-level messages
//!
//! The crate is purely computational: no sockets, no repositories, no
//! tasks. The network and node crates drive it.

pub mod address;
pub mod codec;
pub mod object;
pub mod payload;
pub mod plaintext;
pub mod pow;
pub mod privkey;
pub mod pubkey;
pub mod wire;

/// Returns the current UNIX time in seconds.
pub fn unix_time_now() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs() as i64,
        // Clock before 1970: report the epoch rather than panicking.
        Err(_) => 0,
    }
}
