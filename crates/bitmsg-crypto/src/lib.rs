//! Cryptographic primitives for the bitmsg node.
//!
//! This crate is the **sole** location for all cryptographic operations:
//!
//! - **SHA-512 / SHA-256 / RIPEMD-160** hashing and the double-hash helpers
//! - **HMAC-SHA-256** message authentication
//! - **secp256k1 ECDSA** signing and verification (DER signatures)
//! - **secp256k1 ECDH** shared-secret derivation
//! - **AES-256-CBC** with PKCS#7 padding
//! - The **[`cryptobox::CryptoBox`]** ECIES envelope built from the above
//! - OS-entropy randomness
//!
//! No other crate in the workspace should perform raw crypto operations.

pub mod cryptobox;
pub mod ecdh;
pub mod ecdsa;
pub mod hash;
pub mod random;
pub mod sym;
