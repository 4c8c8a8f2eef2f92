//! Session error taxonomy.
//!
//! Severity varies by variant and is part of the contract:
//! [`SessionError::KeyAgreement`] is fatal (the session moves to
//! `Terminated`, stale keys are never retried);
//! [`SessionError::Authentication`] is per-message (the session stays
//! established); [`SessionError::ProtocolFormat`] and
//! [`SessionError::StateViolation`] are diagnostics - the session state
//! is unchanged and the caller may safely ignore them.

use ember_crypto::CryptoError;
use thiserror::Error;

/// Errors surfaced by a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Key agreement failed; the session has moved to `Terminated`.
    #[error("key agreement failed: {0}")]
    KeyAgreement(CryptoError),

    /// AEAD authentication failed for one message; session still established.
    #[error("message authentication failed")]
    Authentication,

    /// Malformed relay envelope; ignored, session state unchanged.
    #[error("malformed relay envelope: {0}")]
    ProtocolFormat(String),

    /// Message arrived in a state that does not expect it; ignored.
    #[error("unexpected {message} in state {state}")]
    StateViolation {
        /// Wire type of the offending message.
        message: &'static str,
        /// State the session was in.
        state: &'static str,
    },

    /// AEAD encryption failed while sealing an outgoing message.
    #[error("failed to seal message: {0}")]
    Seal(CryptoError),

    /// Encrypt/decrypt requested before the session was established.
    #[error("session not established")]
    NotEstablished,

    /// Operation requested on a terminated session.
    #[error("session terminated")]
    Terminated,

    /// The relay transport failed to deliver.
    #[error("transport failure: {0}")]
    Transport(#[from] crate::transport::TransportError),

    /// An envelope addressed to a different peer reached this session.
    #[error("envelope for peer {target} reached session with {local}")]
    WrongRecipient {
        /// The envelope's target id.
        target: String,
        /// This session's local id.
        local: String,
    },
}

impl From<CryptoError> for SessionError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Authentication => Self::Authentication,
            other => Self::KeyAgreement(other),
        }
    }
}
