//! OS-entropy randomness.

use rand::rngs::OsRng;
use rand::RngCore;

/// Fills and returns `n` random bytes.
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut out = vec![0u8; n];
    OsRng.fill_bytes(&mut out);
    out
}

/// Returns a fixed-size array of random bytes.
pub fn random_array<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    OsRng.fill_bytes(&mut out);
    out
}

/// Returns a random 64-bit nonce, e.g. for self-connection detection
/// in the version handshake.
pub fn random_nonce() -> u64 {
    OsRng.next_u64()
}
