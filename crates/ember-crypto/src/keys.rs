//! X25519 key material (RFC 7748).
//!
//! Every asymmetric key in the protocol - identity, ephemeral, ratchet - is
//! an X25519 pair. Identity pairs live for the process lifetime; ephemeral
//! and ratchet pairs are per-session, and ratchet pairs rotate with each DH
//! ratchet step. Private halves zeroize on drop and never appear in logs.

use crate::CryptoError;
use rand_core::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// X25519 private key (32 bytes).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey(x25519_dalek::StaticSecret);

/// X25519 public key (32 bytes).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(x25519_dalek::PublicKey);

/// X25519 shared secret (32 bytes).
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret(x25519_dalek::SharedSecret);

/// An asymmetric key pair.
#[derive(Clone)]
pub struct KeyPair {
    /// Private half; zeroized on drop.
    pub secret: PrivateKey,
    /// Public half, safe to transmit.
    pub public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh key pair from the given CSPRNG.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let secret = PrivateKey(x25519_dalek::StaticSecret::random_from_rng(rng));
        let public = secret.public_key();
        Self { secret, public }
    }
}

impl PrivateKey {
    /// Derive the public key from this private key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(x25519_dalek::PublicKey::from(&self.0))
    }

    /// Perform Diffie-Hellman key exchange.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyAgreement`] if the peer's public key is a
    /// low-order point (the shared output would be all zeros).
    pub fn diffie_hellman(&self, peer_public: &PublicKey) -> Result<SharedSecret, CryptoError> {
        let shared = self.0.diffie_hellman(&peer_public.0);

        // Low-order point check
        if shared.as_bytes() == &[0u8; 32] {
            return Err(CryptoError::KeyAgreement("low-order peer public key"));
        }

        Ok(SharedSecret(shared))
    }

    /// Import from bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(x25519_dalek::StaticSecret::from(bytes))
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKey([REDACTED])")
    }
}

impl PublicKey {
    /// Export public key as bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        *self.0.as_bytes()
    }

    /// Import public key from bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(x25519_dalek::PublicKey::from(bytes))
    }

    /// Import public key from a slice of unchecked length.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] if the slice is not 32 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; 32] = slice
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: 32,
                actual: slice.len(),
            })?;
        Ok(Self::from_bytes(bytes))
    }

    /// Get bytes as a slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({:02x}{:02x}..)", self.0.as_bytes()[0], self.0.as_bytes()[1])
    }
}

impl SharedSecret {
    /// Get shared secret as bytes.
    ///
    /// # Security
    ///
    /// Raw DH output; always pass through the KDF before use as a key.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}
