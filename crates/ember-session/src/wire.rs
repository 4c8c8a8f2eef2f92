//! Relay wire format.
//!
//! Everything crossing the relay is one JSON [`RelayEnvelope`] carrying a
//! closed, tagged [`Payload`]. The tag names (`handshake_init`,
//! `handshake_response`, `ratchet_init`, `confirm`, `message`) are the
//! protocol's wire contract; internally the enum is matched exhaustively,
//! never dispatched on strings. All byte fields are standard-alphabet
//! base64 - a mismatch in encoding or key length is a format error, not an
//! authentication error.

use ember_crypto::cipher::EncryptedEnvelope;
use ember_crypto::wire_bytes;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Opaque peer identifier assigned by the matchmaking layer.
pub type PeerId = String;

/// One relay-forwarded message between matched peers.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelayEnvelope {
    /// Originating peer.
    pub sender_id: PeerId,
    /// Destination peer; the relay routes on this and nothing else.
    pub target_id: PeerId,
    /// Type-tagged payload.
    #[serde(flatten)]
    pub payload: Payload,
}

/// Every message type the protocol exchanges.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Payload {
    /// Initiator's public keys, opening the handshake.
    HandshakeInit {
        /// Identity public key.
        #[serde(serialize_with = "wire_bytes::ser", deserialize_with = "wire_bytes::de_arr")]
        identity_key: [u8; 32],
        /// Ephemeral public key.
        #[serde(serialize_with = "wire_bytes::ser", deserialize_with = "wire_bytes::de_arr")]
        ephemeral_key: [u8; 32],
    },
    /// Responder's public keys, answering the handshake.
    HandshakeResponse {
        /// Identity public key.
        #[serde(serialize_with = "wire_bytes::ser", deserialize_with = "wire_bytes::de_arr")]
        identity_key: [u8; 32],
        /// Ephemeral public key.
        #[serde(serialize_with = "wire_bytes::ser", deserialize_with = "wire_bytes::de_arr")]
        ephemeral_key: [u8; 32],
    },
    /// First ratchet public key, sent once after key agreement.
    RatchetInit {
        /// Ratchet public key.
        #[serde(serialize_with = "wire_bytes::ser", deserialize_with = "wire_bytes::de_arr")]
        ratchet_key: [u8; 32],
    },
    /// Informational establishment marker; diagnostics only.
    Confirm,
    /// An encrypted application message.
    Message(EncryptedEnvelope),
}

impl Payload {
    /// Wire name of this payload's type tag.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::HandshakeInit { .. } => "handshake_init",
            Self::HandshakeResponse { .. } => "handshake_response",
            Self::RatchetInit { .. } => "ratchet_init",
            Self::Confirm => "confirm",
            Self::Message(_) => "message",
        }
    }
}

/// Encode an envelope to its JSON wire bytes.
///
/// # Errors
///
/// Returns [`SessionError::ProtocolFormat`] if serialization fails, which
/// indicates a programming error rather than peer input.
pub fn encode(envelope: &RelayEnvelope) -> Result<Vec<u8>, SessionError> {
    serde_json::to_vec(envelope).map_err(|e| SessionError::ProtocolFormat(e.to_string()))
}

/// Decode JSON wire bytes into an envelope.
///
/// # Errors
///
/// Returns [`SessionError::ProtocolFormat`] on malformed JSON, invalid
/// base64, an unknown type tag, or a wrong-length key field. The caller
/// logs and drops; session state never changes on a format error.
pub fn decode(bytes: &[u8]) -> Result<RelayEnvelope, SessionError> {
    serde_json::from_slice(bytes).map_err(|e| SessionError::ProtocolFormat(e.to_string()))
}
