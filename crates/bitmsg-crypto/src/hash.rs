//! Hashing primitives.
//!
//! The protocol leans almost entirely on SHA-512: inventory vectors,
//! address checksums, tags, proof-of-work, and frame checksums are all
//! derived from `SHA-512(SHA-512(x))`. SHA-256 appears only in HMAC
//! and WIF checksums, RIPEMD-160 only in address digests.

use hmac::{Hmac, Mac};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256, Sha512};

/// Computes `SHA-512(data)`.
pub fn sha512(data: &[u8]) -> [u8; 64] {
    let mut out = [0u8; 64];
    out.copy_from_slice(&Sha512::digest(data));
    out
}

/// Computes `SHA-512(a ‖ b)` without concatenating into a fresh buffer.
pub fn sha512_pair(a: &[u8], b: &[u8]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    hasher.update(a);
    hasher.update(b);
    let mut out = [0u8; 64];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Computes `SHA-512(SHA-512(data))`.
pub fn double_sha512(data: &[u8]) -> [u8; 64] {
    sha512(&sha512(data))
}

/// Computes `SHA-512(SHA-512(a ‖ b))`.
pub fn double_sha512_pair(a: &[u8], b: &[u8]) -> [u8; 64] {
    sha512(&sha512_pair(a, b))
}

/// Computes `SHA-256(data)`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(data));
    out
}

/// Computes `SHA-256(SHA-256(data))`. Used for WIF checksums.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// Computes `RIPEMD-160(data)`.
pub fn ripemd160(data: &[u8]) -> [u8; 20] {
    let mut out = [0u8; 20];
    out.copy_from_slice(&Ripemd160::digest(data));
    out
}

/// Computes `HMAC-SHA-256(key, data)`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    // HMAC accepts keys of any length.
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    mac.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// Returns the first half of a 64-byte digest.
pub fn lower32(digest: &[u8; 64]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..32]);
    out
}

/// Returns the second half of a 64-byte digest.
pub fn upper32(digest: &[u8; 64]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[32..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha512_known_vector() {
        // FIPS 180-2 "abc" vector, first 8 bytes.
        let digest = sha512(b"abc");
        assert_eq!(&digest[..8], &hex::decode("ddaf35a193617aba").unwrap()[..]);
    }

    #[test]
    fn sha512_pair_equals_concat() {
        let concat = sha512(b"hello world");
        let paired = sha512_pair(b"hello ", b"world");
        assert_eq!(concat, paired);
    }

    #[test]
    fn double_sha512_is_nested() {
        let data = b"nested";
        assert_eq!(double_sha512(data), sha512(&sha512(data)));
    }

    #[test]
    fn ripemd160_known_vector() {
        let digest = ripemd160(b"abc");
        assert_eq!(
            hex::encode(digest),
            "8eb208f7e05d987a9b044a8e98c6b087f15a0bfc"
        );
    }

    #[test]
    fn hmac_sha256_rfc4231_case_2() {
        let mac = hmac_sha256(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            hex::encode(mac),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn halves_split_correctly() {
        let digest = sha512(b"halves");
        assert_eq!(&lower32(&digest)[..], &digest[..32]);
        assert_eq!(&upper32(&digest)[..], &digest[32..]);
    }
}
