//! `ChaCha20-Poly1305` message encryption.
//!
//! Each application message is sealed under a single-use [`MessageKey`]
//! with a fresh random 96-bit nonce and a detached 128-bit tag. The
//! envelope counter and any advertised ratchet key are bound as associated
//! data, so a tampered header fails authentication instead of silently
//! desynchronizing the ratchet.
//!
//! Because message keys are derived, used once, and discarded, a nonce can
//! never repeat under the same key.

use crate::ratchet::MessageKey;
use crate::{wire_bytes, CryptoError, NONCE_SIZE, TAG_SIZE};
use chacha20poly1305::aead::AeadInPlace;
use chacha20poly1305::{ChaCha20Poly1305, KeyInit};
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

/// Authenticated, encrypted payload for one application message.
///
/// `ratchet_key` is present only on the first message of a sending chain
/// (at session start or immediately after a DH ratchet step), letting the
/// receiver learn the new public key without an extra round-trip.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    /// Ciphertext, same length as the plaintext.
    #[serde(serialize_with = "wire_bytes::ser", deserialize_with = "wire_bytes::de_vec")]
    pub ciphertext: Vec<u8>,
    /// Fresh random nonce.
    #[serde(serialize_with = "wire_bytes::ser", deserialize_with = "wire_bytes::de_arr")]
    pub nonce: [u8; NONCE_SIZE],
    /// Poly1305 authentication tag.
    #[serde(serialize_with = "wire_bytes::ser", deserialize_with = "wire_bytes::de_arr")]
    pub tag: [u8; TAG_SIZE],
    /// Position in the sender's current sending chain, starting at 1.
    pub counter: u64,
    /// Sender's new ratchet public key, when one is being advertised.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "wire_bytes::ser_opt",
        deserialize_with = "wire_bytes::de_opt_arr"
    )]
    pub ratchet_key: Option<[u8; 32]>,
}

fn associated_data(counter: u64, ratchet_key: Option<&[u8; 32]>) -> Vec<u8> {
    let mut aad = Vec::with_capacity(8 + 32);
    aad.extend_from_slice(&counter.to_be_bytes());
    if let Some(key) = ratchet_key {
        aad.extend_from_slice(key);
    }
    aad
}

/// Encrypt one message under a single-use key.
///
/// # Errors
///
/// Returns [`CryptoError::EncryptionFailed`] if the AEAD rejects the input
/// (plaintext beyond the cipher's limits).
pub fn seal<R: RngCore + CryptoRng>(
    key: &MessageKey,
    counter: u64,
    ratchet_key: Option<[u8; 32]>,
    plaintext: &[u8],
    rng: &mut R,
) -> Result<EncryptedEnvelope, CryptoError> {
    let mut nonce = [0u8; NONCE_SIZE];
    rng.fill_bytes(&mut nonce);

    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    let aad = associated_data(counter, ratchet_key.as_ref());

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached((&nonce).into(), &aad, &mut buffer)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(&tag);

    Ok(EncryptedEnvelope {
        ciphertext: buffer,
        nonce,
        tag: tag_bytes,
        counter,
        ratchet_key,
    })
}

/// Decrypt one envelope, verifying the tag before returning plaintext.
///
/// # Errors
///
/// Returns [`CryptoError::Authentication`] on tag mismatch - including any
/// bit flip in ciphertext, tag, counter, or advertised ratchet key. No
/// plaintext is ever returned on failure.
pub fn open(key: &MessageKey, envelope: &EncryptedEnvelope) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    let aad = associated_data(envelope.counter, envelope.ratchet_key.as_ref());

    let mut buffer = envelope.ciphertext.clone();
    cipher
        .decrypt_in_place_detached(
            (&envelope.nonce).into(),
            &aad,
            &mut buffer,
            (&envelope.tag).into(),
        )
        .map_err(|_| CryptoError::Authentication)?;

    Ok(buffer)
}
