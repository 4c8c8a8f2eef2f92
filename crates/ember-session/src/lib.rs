//! # EMBER Session
//!
//! Session orchestration for the EMBER protocol: the handshake state
//! machine that pairs two matched peers, the JSON relay wire format, and
//! the injected transport seam.
//!
//! A [`session::Session`] is bound to exactly one partner for its lifetime.
//! It drives the X3DH-style handshake over an untrusted relay, seeds the
//! double ratchet, and then exposes encrypt/decrypt until the partner
//! disconnects - at which point all key material is discarded and any
//! future match needs a brand-new session.
//!
//! The relay is a dumb, content-blind forwarder consumed only through
//! [`transport::RelayTransport`]; it delivers at-least-once with no
//! ordering guarantee across message types.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod error;
pub mod session;
pub mod transport;
pub mod wire;

pub use config::SessionConfig;
pub use error::SessionError;
pub use session::{Session, SessionEvent, SessionState};
