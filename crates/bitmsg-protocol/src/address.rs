//! Bitmessage addresses.
//!
//! An address names the double-hash of a key pair:
//!
//! ```text
//! "BM-" ‖ Base58( varint(version) ‖ varint(stream) ‖ ripe′ ‖ checksum )
//! ```
//!
//! where `ripe′` is the 20-byte RIPE digest stripped of leading zero
//! bytes and `checksum = double_sha512(varint(version) ‖ varint(stream)
//! ‖ ripe′)[0..4]`. The tag and public decryption key of v4 addresses
//! come from the same double hash computed over the **unstripped**
//! RIPE.
//!
//! The same type serves as identity (private key attached), contact
//! (pubkey attached once known), and subscription.

use std::fmt;
use std::str::FromStr;

use bitmsg_crypto::hash::double_sha512;
use bitmsg_types::{BmError, Result};

use crate::codec::write_var_int;
use crate::privkey::PrivateKey;
use crate::pubkey::Pubkey;

// ---------------------------------------------------------------------------
// Pure derivations
// ---------------------------------------------------------------------------

/// `double_sha512(varint(version) ‖ varint(stream) ‖ ripe)` over the
/// full 20-byte RIPE.
fn double_hash(version: u64, stream: u64, ripe: &[u8; 20]) -> [u8; 64] {
    let mut preimage = Vec::with_capacity(4 + 20);
    write_var_int(&mut preimage, version);
    write_var_int(&mut preimage, stream);
    preimage.extend_from_slice(ripe);
    double_sha512(&preimage)
}

/// The 32-byte routing tag of an address, used to address v4 pubkeys
/// and v5 broadcasts without revealing the RIPE.
pub fn calculate_tag(version: u64, stream: u64, ripe: &[u8; 20]) -> [u8; 32] {
    let digest = double_hash(version, stream, ripe);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[32..]);
    out
}

/// The private scalar anyone who knows the address can derive, used to
/// open v4 pubkeys and v4/v5 broadcasts.
pub fn calculate_public_decryption_key(version: u64, stream: u64, ripe: &[u8; 20]) -> [u8; 32] {
    let digest = double_hash(version, stream, ripe);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..32]);
    out
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

fn encode_string(version: u64, stream: u64, ripe: &[u8; 20]) -> String {
    let mut data = Vec::with_capacity(4 + 20 + 4);
    write_var_int(&mut data, version);
    write_var_int(&mut data, stream);
    data.extend_from_slice(strip_leading_zeros(ripe));
    let checksum = double_sha512(&data);
    data.extend_from_slice(&checksum[..4]);
    format!("BM-{}", bs58::encode(data).into_string())
}

// ---------------------------------------------------------------------------
// BitmessageAddress
// ---------------------------------------------------------------------------

/// An address together with whatever this node knows about it.
#[derive(Clone)]
pub struct BitmessageAddress {
    version: u64,
    stream: u64,
    ripe: [u8; 20],
    address: String,
    tag: [u8; 32],
    public_decryption_key: [u8; 32],
    pubkey: Option<Pubkey>,
    private_key: Option<PrivateKey>,
    subscribed: bool,
    alias: Option<String>,
}

impl BitmessageAddress {
    /// Creates an address from its parsed fields.
    ///
    /// # Errors
    ///
    /// Returns [`BmError::InvalidAddress`] for an unsupported version
    /// or a zero stream.
    pub fn new(version: u64, stream: u64, ripe: [u8; 20]) -> Result<Self> {
        if !(1..=4).contains(&version) {
            return Err(BmError::InvalidAddress {
                reason: format!("unsupported address version {version}"),
            });
        }
        if stream == 0 {
            return Err(BmError::InvalidAddress {
                reason: "stream must be at least 1".into(),
            });
        }
        Ok(Self {
            version,
            stream,
            ripe,
            address: encode_string(version, stream, &ripe),
            tag: calculate_tag(version, stream, &ripe),
            public_decryption_key: calculate_public_decryption_key(version, stream, &ripe),
            pubkey: None,
            private_key: None,
            subscribed: false,
            alias: None,
        })
    }

    /// Creates an identity from freshly generated or imported key
    /// material.
    pub fn from_private_key(private_key: PrivateKey) -> Result<Self> {
        let ripe = private_key.pubkey().ripe();
        let mut address = Self::new(private_key.version(), private_key.stream(), ripe)?;
        address.pubkey = Some(private_key.pubkey().clone());
        address.private_key = Some(private_key);
        Ok(address)
    }

    /// Address version, 1 through 4.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Stream this address lives on.
    pub fn stream(&self) -> u64 {
        self.stream
    }

    /// Full 20-byte RIPE digest, leading zeros included.
    pub fn ripe(&self) -> &[u8; 20] {
        &self.ripe
    }

    /// Routing tag (meaningful for v4 and newer).
    pub fn tag(&self) -> &[u8; 32] {
        &self.tag
    }

    /// Scalar derived from the address string, used to open objects
    /// encrypted "to the address".
    pub fn public_decryption_key(&self) -> &[u8; 32] {
        &self.public_decryption_key
    }

    /// Canonical string form.
    pub fn as_str(&self) -> &str {
        &self.address
    }

    /// The pubkey, once known.
    pub fn pubkey(&self) -> Option<&Pubkey> {
        self.pubkey.as_ref()
    }

    /// Attaches a received pubkey after checking it actually belongs
    /// to this address.
    ///
    /// # Errors
    ///
    /// Returns [`BmError::InvalidAddress`] if the pubkey's RIPE does
    /// not match.
    pub fn attach_pubkey(&mut self, pubkey: Pubkey) -> Result<()> {
        if pubkey.ripe() != self.ripe {
            return Err(BmError::InvalidAddress {
                reason: "pubkey does not belong to this address".into(),
            });
        }
        self.pubkey = Some(pubkey);
        Ok(())
    }

    /// The private key, present only for identities.
    pub fn private_key(&self) -> Option<&PrivateKey> {
        self.private_key.as_ref()
    }

    /// Whether this node holds the private key.
    pub fn is_identity(&self) -> bool {
        self.private_key.is_some()
    }

    /// Whether this address is a broadcast subscription.
    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// Marks or unmarks this address as a broadcast subscription.
    pub fn set_subscribed(&mut self, subscribed: bool) {
        self.subscribed = subscribed;
    }

    /// User-chosen display name.
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Sets the display name.
    pub fn set_alias(&mut self, alias: impl Into<String>) {
        self.alias = Some(alias.into());
    }
}

impl fmt::Display for BitmessageAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

impl fmt::Debug for BitmessageAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitmessageAddress")
            .field("address", &self.address)
            .field("identity", &self.is_identity())
            .field("subscribed", &self.subscribed)
            .finish()
    }
}

impl PartialEq for BitmessageAddress {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for BitmessageAddress {}

impl FromStr for BitmessageAddress {
    type Err = BmError;

    fn from_str(s: &str) -> Result<Self> {
        let stripped = s.strip_prefix("BM-").ok_or_else(|| BmError::InvalidAddress {
            reason: "missing BM- prefix".into(),
        })?;
        let data = bs58::decode(stripped)
            .into_vec()
            .map_err(|e| BmError::InvalidAddress {
                reason: format!("invalid Base58: {e}"),
            })?;
        if data.len() < 4 + 2 {
            return Err(BmError::InvalidAddress {
                reason: "address data too short".into(),
            });
        }
        let (body, checksum) = data.split_at(data.len() - 4);
        let expected = double_sha512(body);
        if checksum != &expected[..4] {
            return Err(BmError::InvalidAddress {
                reason: "checksum mismatch".into(),
            });
        }

        let mut reader = body;
        let version = crate::codec::read_var_int(&mut reader)?;
        let stream = crate::codec::read_var_int(&mut reader)?;
        if reader.len() > 20 {
            return Err(BmError::InvalidAddress {
                reason: format!("ripe is {} bytes, expected at most 20", reader.len()),
            });
        }
        // Left-pad the stripped ripe back to 20 bytes.
        let mut ripe = [0u8; 20];
        ripe[20 - reader.len()..].copy_from_slice(reader);

        let address = Self::new(version, stream, ripe)?;
        if address.address != s {
            // A non-canonical Base58 form would break the
            // parse-then-serialize identity.
            return Err(BmError::InvalidAddress {
                reason: "non-canonical address encoding".into(),
            });
        }
        Ok(address)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
