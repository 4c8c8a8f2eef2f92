//! # EMBER Crypto
//!
//! Cryptographic core for the EMBER session engine.
//!
//! This crate provides:
//! - X25519 key material (identity, ephemeral, ratchet pairs)
//! - 4-way Diffie-Hellman key agreement (X3DH-style)
//! - Symmetric and DH key ratcheting for forward secrecy
//! - `ChaCha20-Poly1305` AEAD message encryption
//! - Secure random number generation
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Security Level |
//! |----------|-----------|----------------|
//! | Key Exchange | X25519 | 128-bit |
//! | AEAD | ChaCha20-Poly1305 | 256-bit key |
//! | Hash / KDF | BLAKE3 (derive-key mode) | 128-bit collision |
//!
//! All key derivations are domain-separated under a protocol-unique BLAKE3
//! context string, so secrets derived here can never collide with another
//! protocol's use of the same primitives.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod agreement;
pub mod cipher;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod random;
pub mod ratchet;
pub mod wire_bytes;

pub use error::CryptoError;

/// X25519 public key size
pub const PUBLIC_KEY_SIZE: usize = 32;

/// X25519 secret key size
pub const SECRET_KEY_SIZE: usize = 32;

/// Symmetric secret size (root, chain, and message keys)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// ChaCha20-Poly1305 nonce size
pub const NONCE_SIZE: usize = 12;

/// Poly1305 authentication tag size
pub const TAG_SIZE: usize = 16;
