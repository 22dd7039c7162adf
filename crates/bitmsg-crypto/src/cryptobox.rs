//! The protocol's ECIES envelope.
//!
//! Encryption generates an ephemeral secp256k1 keypair `(R, r)`,
//! derives `S = ECDH(r, target)`, splits `SHA-512(S)` into an AES key
//! (first half) and a MAC key (second half), encrypts under
//! AES-256-CBC with a random IV, and authenticates everything that
//! precedes the MAC with HMAC-SHA-256:
//!
//! ```text
//! iv(16) ‖ 0x02CA ‖ xLen(2) ‖ R.x ‖ yLen(2) ‖ R.y ‖ ciphertext ‖ mac(32)
//! ```
//!
//! Decryption recomputes `S` from the recipient's private scalar and
//! `R`, verifies the MAC in constant time, and only then touches the
//! ciphertext. A MAC mismatch is [`BmError::DecryptionFailed`] — the
//! expected outcome for every object that is not addressed to us.

use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use bitmsg_types::{BmError, Result};

use crate::ecdh::shared_secret;
use crate::ecdsa::{derive_public_key, random_scalar};
use crate::hash::{lower32, sha512, upper32};
use crate::random::random_array;
use crate::sym::{aes256_cbc_decrypt, aes256_cbc_encrypt};

/// Curve identifier for secp256k1 in the envelope header.
const CURVE_SECP256K1: u16 = 0x02CA;

/// Byte length of the trailing HMAC-SHA-256 tag.
const MAC_LEN: usize = 32;

// ---------------------------------------------------------------------------
// CryptoBox
// ---------------------------------------------------------------------------

/// A sealed ECIES envelope as it appears on the wire.
///
/// The ephemeral public key coordinates are stored exactly as
/// serialized (leading zero bytes stripped, length-prefixed) so that
/// re-serialization — and therefore the MAC input — is byte-stable.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CryptoBox {
    iv: [u8; 16],
    ephemeral_x: Vec<u8>,
    ephemeral_y: Vec<u8>,
    ciphertext: Vec<u8>,
    mac: [u8; 32],
}

impl CryptoBox {
    /// Seals `plaintext` for the holder of the private scalar matching
    /// `recipient_public` (64-byte uncompressed `X ‖ Y`).
    ///
    /// # Errors
    ///
    /// Returns [`BmError::Crypto`] if the recipient key is not a valid
    /// curve point.
    pub fn encrypt(plaintext: &[u8], recipient_public: &[u8; 64]) -> Result<Self> {
        let ephemeral_scalar = random_scalar();
        let ephemeral_public = derive_public_key(&ephemeral_scalar)?;

        let secret = shared_secret(&ephemeral_scalar, recipient_public)?;
        let mut keys = sha512(secret.as_bytes());
        let enc_key = lower32(&keys);
        let mac_key = upper32(&keys);
        keys.zeroize();

        let iv: [u8; 16] = random_array();
        let ciphertext = aes256_cbc_encrypt(&enc_key, &iv, plaintext);

        let mut envelope = Self {
            iv,
            ephemeral_x: strip_leading_zeros(&ephemeral_public[..32]),
            ephemeral_y: strip_leading_zeros(&ephemeral_public[32..]),
            ciphertext,
            mac: [0u8; 32],
        };
        envelope.mac = crate::hash::hmac_sha256(&mac_key, &envelope.mac_input());
        Ok(envelope)
    }

    /// Opens the envelope with the recipient's private scalar.
    ///
    /// # Errors
    ///
    /// Returns [`BmError::DecryptionFailed`] on MAC mismatch or bad
    /// padding, [`BmError::Crypto`] if the embedded ephemeral key is
    /// not a valid curve point.
    pub fn decrypt(&self, private_scalar: &[u8; 32]) -> Result<Vec<u8>> {
        let ephemeral_public = self.ephemeral_public()?;
        let secret = shared_secret(private_scalar, &ephemeral_public)?;
        let mut keys = sha512(secret.as_bytes());
        let enc_key = lower32(&keys);
        let mac_key = upper32(&keys);
        keys.zeroize();

        let expected = crate::hash::hmac_sha256(&mac_key, &self.mac_input());
        if expected.ct_eq(&self.mac).unwrap_u8() != 1 {
            return Err(BmError::DecryptionFailed);
        }

        aes256_cbc_decrypt(&enc_key, &self.iv, &self.ciphertext)
    }

    /// Serializes the envelope, MAC included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.mac_input();
        out.extend_from_slice(&self.mac);
        out
    }

    /// Parses an envelope that occupies the whole of `data`.
    ///
    /// The envelope format carries no own length field; the caller
    /// derives the extent from the enclosing structure.
    ///
    /// # Errors
    ///
    /// Returns [`BmError::Decode`] on truncation or a wrong curve
    /// identifier.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut cursor = 0usize;
        let iv: [u8; 16] = take(data, &mut cursor, 16)?
            .try_into()
            .unwrap_or_else(|_| unreachable!("take returned 16 bytes"));
        let curve = read_u16(data, &mut cursor)?;
        if curve != CURVE_SECP256K1 {
            return Err(BmError::Decode {
                reason: format!("unexpected curve type {curve:#06x}"),
            });
        }
        let x_len = read_u16(data, &mut cursor)? as usize;
        if x_len > 32 {
            return Err(BmError::Decode {
                reason: format!("ephemeral X length {x_len} exceeds 32"),
            });
        }
        let ephemeral_x = take(data, &mut cursor, x_len)?.to_vec();
        let y_len = read_u16(data, &mut cursor)? as usize;
        if y_len > 32 {
            return Err(BmError::Decode {
                reason: format!("ephemeral Y length {y_len} exceeds 32"),
            });
        }
        let ephemeral_y = take(data, &mut cursor, y_len)?.to_vec();

        let remaining = data.len() - cursor;
        if remaining < MAC_LEN {
            return Err(BmError::Decode {
                reason: "envelope truncated before mac".into(),
            });
        }
        let ciphertext = take(data, &mut cursor, remaining - MAC_LEN)?.to_vec();
        let mac: [u8; 32] = take(data, &mut cursor, MAC_LEN)?
            .try_into()
            .unwrap_or_else(|_| unreachable!("take returned 32 bytes"));

        Ok(Self {
            iv,
            ephemeral_x,
            ephemeral_y,
            ciphertext,
            mac,
        })
    }

    /// Reassembles the 64-byte ephemeral public key, left-padding the
    /// stored coordinates back to 32 bytes each.
    fn ephemeral_public(&self) -> Result<[u8; 64]> {
        let mut out = [0u8; 64];
        out[32 - self.ephemeral_x.len()..32].copy_from_slice(&self.ephemeral_x);
        out[64 - self.ephemeral_y.len()..].copy_from_slice(&self.ephemeral_y);
        Ok(out)
    }

    /// Everything the MAC covers: the serialized form minus the MAC.
    fn mac_input(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + 6 + self.ephemeral_x.len() + self.ephemeral_y.len() + self.ciphertext.len());
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&CURVE_SECP256K1.to_be_bytes());
        out.extend_from_slice(&(self.ephemeral_x.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.ephemeral_x);
        out.extend_from_slice(&(self.ephemeral_y.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.ephemeral_y);
        out.extend_from_slice(&self.ciphertext);
        out
    }
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

fn take<'a>(data: &'a [u8], cursor: &mut usize, n: usize) -> Result<&'a [u8]> {
    let end = cursor.checked_add(n).ok_or_else(|| BmError::Decode {
        reason: "envelope length overflow".into(),
    })?;
    if end > data.len() {
        return Err(BmError::Decode {
            reason: "envelope truncated".into(),
        });
    }
    let slice = &data[*cursor..end];
    *cursor = end;
    Ok(slice)
}

fn read_u16(data: &[u8], cursor: &mut usize) -> Result<u16> {
    let bytes = take(data, cursor, 2)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn strip_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
