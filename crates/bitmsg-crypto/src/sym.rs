//! AES-256-CBC with PKCS#7 padding.
//!
//! The protocol's ECIES envelope mandates CBC mode; there is no AEAD
//! here — authenticity comes from the envelope's HMAC, which must be
//! verified **before** decryption is attempted.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use bitmsg_types::{BmError, Result};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Encrypts `plaintext` under AES-256-CBC with PKCS#7 padding.
///
/// The output length is `plaintext.len()` rounded up to the next
/// 16-byte boundary (always at least one padding byte).
pub fn aes256_cbc_encrypt(key: &[u8; 32], iv: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    Aes256CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// Decrypts AES-256-CBC ciphertext and strips PKCS#7 padding.
///
/// # Errors
///
/// Returns [`BmError::DecryptionFailed`] if the ciphertext length is
/// not a block multiple or the padding is invalid. Callers must have
/// verified the envelope MAC first; a padding error after a valid MAC
/// indicates a corrupted envelope, not an oracle.
pub fn aes256_cbc_decrypt(key: &[u8; 32], iv: &[u8; 16], ciphertext: &[u8]) -> Result<Vec<u8>> {
    Aes256CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| BmError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let key = [0x11u8; 32];
        let iv = [0x22u8; 16];
        let plaintext = b"the quick brown fox jumps over the lazy dog";
        let ciphertext = aes256_cbc_encrypt(&key, &iv, plaintext);
        assert_ne!(&ciphertext[..plaintext.len().min(ciphertext.len())], &plaintext[..]);
        let decrypted = aes256_cbc_decrypt(&key, &iv, &ciphertext).expect("decrypt");
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn output_is_block_padded() {
        let key = [0u8; 32];
        let iv = [0u8; 16];
        assert_eq!(aes256_cbc_encrypt(&key, &iv, &[]).len(), 16);
        assert_eq!(aes256_cbc_encrypt(&key, &iv, &[0u8; 16]).len(), 32);
        assert_eq!(aes256_cbc_encrypt(&key, &iv, &[0u8; 17]).len(), 32);
    }

    #[test]
    fn wrong_key_fails_or_garbles() {
        let key = [0x11u8; 32];
        let wrong = [0x12u8; 32];
        let iv = [0x22u8; 16];
        let plaintext = b"some plaintext data here";
        let ciphertext = aes256_cbc_encrypt(&key, &iv, plaintext);
        match aes256_cbc_decrypt(&wrong, &iv, &ciphertext) {
            Err(BmError::DecryptionFailed) => {}
            Ok(garbled) => assert_ne!(garbled, plaintext),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn truncated_ciphertext_rejected() {
        let key = [0x11u8; 32];
        let iv = [0x22u8; 16];
        let ciphertext = aes256_cbc_encrypt(&key, &iv, b"hello");
        assert!(aes256_cbc_decrypt(&key, &iv, &ciphertext[..15]).is_err());
    }
}
