//! Proof-of-work target math and verification.
//!
//! The target is an upper bound on the first 8 bytes (big-endian) of
//! `SHA-512(SHA-512(nonce ‖ initialHash))`, where `initialHash` is the
//! SHA-512 of the object minus its nonce:
//!
//! ```text
//! target = 2^64 / ((len + extraBytes + 8) ·
//!                  max(nonceTrialsPerByte,
//!                      ttl · (len + extraBytes + 8) / 2^16))
//! ```
//!
//! Longer payloads and longer lifetimes both shrink the target and so
//! raise the work. The search itself lives in the node crate; here is
//! only the arithmetic, which must be exact for interoperability.

use bitmsg_crypto::hash::{sha512, sha512_pair};
use bitmsg_types::{BmError, Result};

use crate::object::ObjectMessage;

/// Computes the proof-of-work target for a payload of `payload_length`
/// bytes (nonce not counted) that should live for `ttl_secs`.
pub fn pow_target(
    payload_length: usize,
    ttl_secs: u64,
    nonce_trials_per_byte: u64,
    extra_bytes: u64,
) -> u64 {
    let padded = payload_length as u128 + extra_bytes as u128 + 8;
    let time_factor = (ttl_secs as u128 * padded) >> 16;
    let difficulty = time_factor.max(nonce_trials_per_byte as u128);
    let divisor = padded * difficulty;
    if divisor == 0 {
        return u64::MAX;
    }
    let target = (1u128 << 64) / divisor;
    target.min(u64::MAX as u128) as u64
}

/// `SHA-512` of the object minus its nonce; the value every worker
/// hashes against.
pub fn initial_hash(object: &ObjectMessage) -> [u8; 64] {
    sha512(&object.bytes_without_nonce())
}

/// The proof-of-work value of a candidate nonce: the first 8 bytes of
/// `double_sha512(nonce ‖ initialHash)` as an unsigned big-endian
/// integer.
pub fn pow_value(nonce: &[u8; 8], initial_hash: &[u8; 64]) -> u64 {
    let digest = sha512(&sha512_pair(nonce, initial_hash));
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}

/// Verifies a received object's proof of work using its remaining
/// time to live and the given network parameters.
///
/// # Errors
///
/// Returns [`BmError::PowInvalid`] if the nonce is missing or its
/// value exceeds the target.
pub fn check_proof_of_work(
    object: &ObjectMessage,
    now: i64,
    nonce_trials_per_byte: u64,
    extra_bytes: u64,
) -> Result<()> {
    let nonce = object.nonce.ok_or(BmError::PowInvalid)?;
    let ttl = object.expires_time.saturating_sub(now).max(0) as u64;
    let payload = object.bytes_without_nonce();
    let target = pow_target(payload.len(), ttl, nonce_trials_per_byte, extra_bytes);
    if pow_value(&nonce, &sha512(&payload)) > target {
        return Err(BmError::PowInvalid);
    }
    Ok(())
}
