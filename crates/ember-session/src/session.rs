//! Session state machine and handshake orchestration.
//!
//! A [`Session`] binds one local peer to one matched partner for the
//! partner's lifetime. It owns all protocol state exclusively and is
//! driven by a sequential event stream: each relay payload is handled to
//! completion (state read, mutated, replies sent) before the next.
//!
//! State flow:
//!
//! ```text
//! Idle -> HandshakeInitiated -------> RatchetPending -> Established
//!      \-> HandshakeResponded ------/                       |
//!                         (any state) ----------------> Terminated
//! ```
//!
//! Roles are deterministic: the lexicographically smaller peer id
//! initiates, so two matched peers can never both open the handshake.

use std::time::Instant;

use ember_crypto::agreement::{self, LocalHandshakeKeys, PeerHandshakeKeys, Role};
use ember_crypto::cipher::{self, EncryptedEnvelope};
use ember_crypto::keys::{KeyPair, PublicKey};
use ember_crypto::ratchet::RatchetState;
use rand_core::{CryptoRng, RngCore};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::transport::RelayTransport;
use crate::wire::{self, Payload, PeerId, RelayEnvelope};

/// Protocol state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Matched but no handshake traffic yet.
    Idle,
    /// Initiator: `handshake_init` sent, awaiting response.
    HandshakeInitiated,
    /// Responder: keys agreed, `handshake_response` sent.
    HandshakeResponded,
    /// Keys agreed, own ratchet key not yet advertised.
    RatchetPending,
    /// Messaging available in both directions.
    Established,
    /// Partner gone or handshake failed; all secrets discarded.
    Terminated,
}

impl SessionState {
    /// Human-readable state name for diagnostics.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::HandshakeInitiated => "handshake_initiated",
            Self::HandshakeResponded => "handshake_responded",
            Self::RatchetPending => "ratchet_pending",
            Self::Established => "established",
            Self::Terminated => "terminated",
        }
    }
}

/// Caller-visible outcome of feeding one relay payload to a session.
#[derive(Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// Handshake progressed; nothing to surface.
    None,
    /// The session just reached [`SessionState::Established`].
    Established,
    /// A decrypted application message.
    Message(Vec<u8>),
    /// The partner's informational `confirm` marker arrived.
    ConfirmReceived,
}

/// One end-to-end encrypted session with a matched partner.
///
/// Generic over the injected relay transport and CSPRNG so tests can run
/// fully in-process and deterministic where needed.
pub struct Session<T: RelayTransport, R: RngCore + CryptoRng> {
    state: SessionState,
    config: SessionConfig,
    local_id: PeerId,
    peer_id: PeerId,
    role: Role,
    transport: T,
    rng: R,
    /// Identity + ephemeral pairs; consumed (dropped) once keys are agreed.
    handshake_keys: Option<LocalHandshakeKeys>,
    ratchet: Option<RatchetState>,
    matched_at: Option<Instant>,
    auth_failure_streak: u32,
}

impl<T: RelayTransport, R: RngCore + CryptoRng> Session<T, R> {
    /// Create a session for a fresh match.
    ///
    /// `identity` is the process-lifetime identity pair; a fresh ephemeral
    /// pair is generated here, so a rebuilt session never reuses session
    /// key material.
    pub fn new(
        local_id: impl Into<PeerId>,
        peer_id: impl Into<PeerId>,
        identity: KeyPair,
        config: SessionConfig,
        transport: T,
        mut rng: R,
    ) -> Self {
        let local_id = local_id.into();
        let peer_id = peer_id.into();
        // Deterministic tie-break: smaller id initiates.
        let role = if local_id < peer_id {
            Role::Initiator
        } else {
            Role::Responder
        };
        let ephemeral = KeyPair::generate(&mut rng);

        Self {
            state: SessionState::Idle,
            config,
            local_id,
            peer_id,
            role,
            transport,
            rng,
            handshake_keys: Some(LocalHandshakeKeys {
                identity,
                ephemeral,
            }),
            ratchet: None,
            matched_at: None,
            auth_failure_streak: 0,
        }
    }

    /// Current protocol state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// This peer's handshake role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// The matched partner's id.
    #[must_use]
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Mutable access to the injected transport (test drains, shutdown).
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Kick off the session after the matchmaking "peer matched" event.
    ///
    /// The initiator sends `handshake_init`; the responder arms its
    /// handshake deadline and waits.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::StateViolation`] if called twice and
    /// [`SessionError::Transport`] if the relay rejects the payload.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Idle || self.matched_at.is_some() {
            return Err(self.violation("start"));
        }
        self.matched_at = Some(Instant::now());

        if self.role == Role::Initiator {
            let keys = self
                .handshake_keys
                .as_ref()
                .ok_or(SessionError::Terminated)?;
            let payload = Payload::HandshakeInit {
                identity_key: keys.identity.public.to_bytes(),
                ephemeral_key: keys.ephemeral.public.to_bytes(),
            };
            self.transition(SessionState::HandshakeInitiated);
            self.deliver(payload)?;
        }
        Ok(())
    }

    /// Feed one encoded relay payload into the session.
    ///
    /// # Errors
    ///
    /// - [`SessionError::ProtocolFormat`] / [`SessionError::StateViolation`]:
    ///   diagnostics; the session state is unchanged.
    /// - [`SessionError::Authentication`]: this message failed its tag
    ///   check; the session remains established.
    /// - [`SessionError::KeyAgreement`]: fatal; the session is terminated.
    pub fn handle_incoming(&mut self, bytes: &[u8]) -> Result<SessionEvent, SessionError> {
        if self.state == SessionState::Terminated {
            return Err(SessionError::Terminated);
        }

        let envelope = match wire::decode(bytes) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(peer = %self.peer_id, %err, "dropping malformed relay payload");
                return Err(err);
            }
        };

        if envelope.target_id != self.local_id {
            return Err(SessionError::WrongRecipient {
                target: envelope.target_id,
                local: self.local_id.clone(),
            });
        }
        if envelope.sender_id != self.peer_id {
            tracing::warn!(sender = %envelope.sender_id, "dropping payload from unmatched sender");
            return Err(SessionError::ProtocolFormat(format!(
                "envelope from unmatched sender {}",
                envelope.sender_id
            )));
        }

        match envelope.payload {
            Payload::HandshakeInit {
                identity_key,
                ephemeral_key,
            } => self.on_handshake_init(identity_key, ephemeral_key),
            Payload::HandshakeResponse {
                identity_key,
                ephemeral_key,
            } => self.on_handshake_response(identity_key, ephemeral_key),
            Payload::RatchetInit { ratchet_key } => self.on_ratchet_init(ratchet_key),
            Payload::Confirm => {
                tracing::debug!(peer = %self.peer_id, "confirm received");
                Ok(SessionEvent::ConfirmReceived)
            }
            Payload::Message(envelope) => self.on_message(&envelope),
        }
    }

    /// Encrypt and deliver one application message.
    ///
    /// Advances the sending chain exactly once per call; the first message
    /// of a sending chain carries the current ratchet public key.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotEstablished`] before establishment,
    /// [`SessionError::Terminated`] after teardown, or a transport error.
    pub fn send_message(&mut self, plaintext: &[u8]) -> Result<(), SessionError> {
        match self.state {
            SessionState::Established => {}
            SessionState::Terminated => return Err(SessionError::Terminated),
            _ => return Err(SessionError::NotEstablished),
        }
        let ratchet = self.ratchet.as_mut().ok_or(SessionError::NotEstablished)?;

        let (key, counter, advertised) = ratchet.next_sending_key();
        let sealed = cipher::seal(
            &key,
            counter,
            advertised.map(|k| k.to_bytes()),
            plaintext,
            &mut self.rng,
        )
        .map_err(SessionError::Seal)?;

        self.deliver(Payload::Message(sealed))
    }

    /// Drive time-based behavior; call periodically while not established.
    ///
    /// Terminates the session if the handshake deadline has passed. There
    /// is no internal retry: any resend policy belongs to the transport.
    pub fn tick(&mut self) {
        let expired = match (self.state, self.matched_at) {
            (
                SessionState::Idle
                | SessionState::HandshakeInitiated
                | SessionState::HandshakeResponded
                | SessionState::RatchetPending,
                Some(matched_at),
            ) => matched_at.elapsed() >= self.config.handshake_timeout,
            _ => false,
        };
        if expired {
            tracing::warn!(peer = %self.peer_id, "handshake deadline exceeded");
            self.terminate();
        }
    }

    /// Tear the session down, discarding all key material.
    ///
    /// Idempotent; safe to call on partner disconnect at any point. Key
    /// wrappers zeroize when dropped here, closing the exposure window.
    pub fn terminate(&mut self) {
        if self.state == SessionState::Terminated {
            return;
        }
        self.handshake_keys = None;
        self.ratchet = None;
        self.transition(SessionState::Terminated);
    }

    fn on_handshake_init(
        &mut self,
        identity_key: [u8; 32],
        ephemeral_key: [u8; 32],
    ) -> Result<SessionEvent, SessionError> {
        if self.role != Role::Responder || self.state != SessionState::Idle {
            return Err(self.violation("handshake_init"));
        }

        let local = self
            .handshake_keys
            .take()
            .ok_or(SessionError::Terminated)?;
        let response = Payload::HandshakeResponse {
            identity_key: local.identity.public.to_bytes(),
            ephemeral_key: local.ephemeral.public.to_bytes(),
        };
        let peer = PeerHandshakeKeys {
            identity: PublicKey::from_bytes(identity_key),
            ephemeral: PublicKey::from_bytes(ephemeral_key),
        };

        let secrets = match agreement::agree(&local, &peer, Role::Responder) {
            Ok(secrets) => secrets,
            Err(err) => {
                tracing::warn!(peer = %self.peer_id, %err, "key agreement failed, terminating");
                self.terminate();
                return Err(SessionError::KeyAgreement(err));
            }
        };

        self.transition(SessionState::HandshakeResponded);
        self.deliver(response)?;
        self.establish(secrets)
    }

    fn on_handshake_response(
        &mut self,
        identity_key: [u8; 32],
        ephemeral_key: [u8; 32],
    ) -> Result<SessionEvent, SessionError> {
        if self.role != Role::Initiator || self.state != SessionState::HandshakeInitiated {
            return Err(self.violation("handshake_response"));
        }

        let local = self
            .handshake_keys
            .take()
            .ok_or(SessionError::Terminated)?;
        let peer = PeerHandshakeKeys {
            identity: PublicKey::from_bytes(identity_key),
            ephemeral: PublicKey::from_bytes(ephemeral_key),
        };

        let secrets = match agreement::agree(&local, &peer, Role::Initiator) {
            Ok(secrets) => secrets,
            Err(err) => {
                tracing::warn!(peer = %self.peer_id, %err, "key agreement failed, terminating");
                self.terminate();
                return Err(SessionError::KeyAgreement(err));
            }
        };

        self.establish(secrets)
    }

    /// Seed the ratchet, advertise the first ratchet key, go established.
    fn establish(
        &mut self,
        secrets: agreement::SessionSecrets,
    ) -> Result<SessionEvent, SessionError> {
        let ratchet = RatchetState::new(secrets, &mut self.rng);
        let ratchet_key = ratchet.own_ratchet_public().to_bytes();
        self.ratchet = Some(ratchet);

        self.transition(SessionState::RatchetPending);
        self.deliver(Payload::RatchetInit { ratchet_key })?;
        self.transition(SessionState::Established);
        self.deliver(Payload::Confirm)?;
        Ok(SessionEvent::Established)
    }

    fn on_ratchet_init(&mut self, ratchet_key: [u8; 32]) -> Result<SessionEvent, SessionError> {
        if self.state != SessionState::Established {
            return Err(self.violation("ratchet_init"));
        }
        if let Some(ratchet) = self.ratchet.as_mut() {
            ratchet.note_partner_key(PublicKey::from_bytes(ratchet_key));
        }
        Ok(SessionEvent::None)
    }

    fn on_message(&mut self, sealed: &EncryptedEnvelope) -> Result<SessionEvent, SessionError> {
        if self.state != SessionState::Established {
            return Err(self.violation("message"));
        }
        let ratchet = self.ratchet.as_mut().ok_or(SessionError::NotEstablished)?;

        let advertised = sealed.ratchet_key.map(PublicKey::from_bytes);
        let (key, _counter) = ratchet
            .next_receiving_key(advertised, &mut self.rng)
            .map_err(SessionError::KeyAgreement)?;

        match cipher::open(&key, sealed) {
            Ok(plaintext) => {
                self.auth_failure_streak = 0;
                Ok(SessionEvent::Message(plaintext))
            }
            Err(_) => {
                // The receiving chain stays advanced: the spent message key
                // is gone either way, and the peer's chain moved with it.
                self.auth_failure_streak += 1;
                if self.auth_failure_streak >= self.config.auth_failure_warn_threshold {
                    tracing::warn!(
                        peer = %self.peer_id,
                        streak = self.auth_failure_streak,
                        "repeated message authentication failures"
                    );
                }
                Err(SessionError::Authentication)
            }
        }
    }

    fn deliver(&mut self, payload: Payload) -> Result<(), SessionError> {
        let envelope = RelayEnvelope {
            sender_id: self.local_id.clone(),
            target_id: self.peer_id.clone(),
            payload,
        };
        let bytes = wire::encode(&envelope)?;
        self.transport.deliver(&self.peer_id, &bytes)?;
        Ok(())
    }

    fn transition(&mut self, new_state: SessionState) {
        tracing::debug!(
            peer = %self.peer_id,
            from = self.state.name(),
            to = new_state.name(),
            "session state transition"
        );
        self.state = new_state;
    }

    fn violation(&self, message: &'static str) -> SessionError {
        tracing::warn!(
            peer = %self.peer_id,
            message,
            state = self.state.name(),
            "ignoring out-of-state message"
        );
        SessionError::StateViolation {
            message,
            state: self.state.name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryRelay, RelayEndpoint};
    use rand_core::OsRng;
    use std::time::Duration;

    type TestSession = Session<RelayEndpoint, OsRng>;

    fn session_pair() -> (TestSession, TestSession) {
        let (alice_end, bob_end) = MemoryRelay::pair("alice", "bob");
        let alice = Session::new(
            "alice",
            "bob",
            KeyPair::generate(&mut OsRng),
            SessionConfig::default(),
            alice_end,
            OsRng,
        );
        let bob = Session::new(
            "bob",
            "alice",
            KeyPair::generate(&mut OsRng),
            SessionConfig::default(),
            bob_end,
            OsRng,
        );
        (alice, bob)
    }

    /// Shuttle pending payloads between the two sessions until quiet.
    fn pump(a: &mut TestSession, b: &mut TestSession) {
        loop {
            let mut moved = false;
            while let Some(bytes) = b.transport_mut().recv() {
                let _ = b.handle_incoming(&bytes);
                moved = true;
            }
            while let Some(bytes) = a.transport_mut().recv() {
                let _ = a.handle_incoming(&bytes);
                moved = true;
            }
            if !moved {
                break;
            }
        }
    }

    fn established_pair() -> (TestSession, TestSession) {
        let (mut alice, mut bob) = session_pair();
        alice.start().unwrap();
        bob.start().unwrap();
        pump(&mut alice, &mut bob);
        assert_eq!(alice.state(), SessionState::Established);
        assert_eq!(bob.state(), SessionState::Established);
        (alice, bob)
    }

    #[test]
    fn test_role_tie_break_is_deterministic() {
        let (alice, bob) = session_pair();
        assert_eq!(alice.role(), Role::Initiator);
        assert_eq!(bob.role(), Role::Responder);
    }

    #[test]
    fn test_start_moves_only_initiator() {
        let (mut alice, mut bob) = session_pair();
        alice.start().unwrap();
        bob.start().unwrap();
        assert_eq!(alice.state(), SessionState::HandshakeInitiated);
        assert_eq!(bob.state(), SessionState::Idle);
    }

    #[test]
    fn test_double_start_is_violation() {
        let (mut alice, _) = session_pair();
        alice.start().unwrap();
        assert!(matches!(
            alice.start(),
            Err(SessionError::StateViolation { .. })
        ));
    }

    #[test]
    fn test_handshake_establishes_both_sides() {
        established_pair();
    }

    #[test]
    fn test_message_roundtrip_both_directions() {
        let (mut alice, mut bob) = established_pair();

        alice.send_message(b"hello").unwrap();
        let bytes = bob.transport_mut().recv().unwrap();
        assert_eq!(
            bob.handle_incoming(&bytes).unwrap(),
            SessionEvent::Message(b"hello".to_vec())
        );

        bob.send_message(b"hi").unwrap();
        let bytes = alice.transport_mut().recv().unwrap();
        assert_eq!(
            alice.handle_incoming(&bytes).unwrap(),
            SessionEvent::Message(b"hi".to_vec())
        );
    }

    #[test]
    fn test_send_before_established_fails() {
        let (mut alice, _) = session_pair();
        assert!(matches!(
            alice.send_message(b"early"),
            Err(SessionError::NotEstablished)
        ));
    }

    #[test]
    fn test_message_in_idle_is_violation_not_fatal() {
        let (mut alice, mut bob) = established_pair();

        // Rebuild a fresh bob-side session that is still Idle, then feed it
        // one of alice's message envelopes.
        alice.send_message(b"stray").unwrap();
        let stray = bob.transport_mut().recv().unwrap();

        let (_, bob_end) = MemoryRelay::pair("alice", "bob");
        let mut fresh_bob = Session::new(
            "bob",
            "alice",
            KeyPair::generate(&mut OsRng),
            SessionConfig::default(),
            bob_end,
            OsRng,
        );
        assert!(matches!(
            fresh_bob.handle_incoming(&stray),
            Err(SessionError::StateViolation { .. })
        ));
        assert_eq!(fresh_bob.state(), SessionState::Idle);
    }

    #[test]
    fn test_malformed_payload_leaves_state_unchanged() {
        let (mut alice, _) = established_pair();
        assert!(matches!(
            alice.handle_incoming(b"\x00garbage"),
            Err(SessionError::ProtocolFormat(_))
        ));
        assert_eq!(alice.state(), SessionState::Established);
    }

    #[test]
    fn test_unmatched_sender_dropped() {
        let (mut alice, _) = established_pair();
        let forged = wire::encode(&RelayEnvelope {
            sender_id: "mallory".into(),
            target_id: "alice".into(),
            payload: Payload::Confirm,
        })
        .unwrap();
        assert!(alice.handle_incoming(&forged).is_err());
        assert_eq!(alice.state(), SessionState::Established);
    }

    #[test]
    fn test_wrong_target_rejected() {
        let (mut alice, _) = established_pair();
        let misrouted = wire::encode(&RelayEnvelope {
            sender_id: "bob".into(),
            target_id: "carol".into(),
            payload: Payload::Confirm,
        })
        .unwrap();
        assert!(matches!(
            alice.handle_incoming(&misrouted),
            Err(SessionError::WrongRecipient { .. })
        ));
    }

    #[test]
    fn test_tampered_message_is_auth_failure_session_survives() {
        let (mut alice, mut bob) = established_pair();

        alice.send_message(b"hello").unwrap();
        let bytes = bob.transport_mut().recv().unwrap();
        let mut envelope = wire::decode(&bytes).unwrap();
        if let Payload::Message(ref mut sealed) = envelope.payload {
            sealed.ciphertext[0] ^= 0x01;
        }
        let tampered = wire::encode(&envelope).unwrap();

        assert!(matches!(
            bob.handle_incoming(&tampered),
            Err(SessionError::Authentication)
        ));
        assert_eq!(bob.state(), SessionState::Established);

        // A later clean message still goes through on the advanced chain.
        alice.send_message(b"still here").unwrap();
        let bytes = bob.transport_mut().recv().unwrap();
        assert_eq!(
            bob.handle_incoming(&bytes).unwrap(),
            SessionEvent::Message(b"still here".to_vec())
        );
    }

    #[test]
    fn test_terminate_is_idempotent_and_final() {
        let (mut alice, _) = established_pair();
        alice.terminate();
        alice.terminate();
        assert_eq!(alice.state(), SessionState::Terminated);
        assert!(matches!(
            alice.send_message(b"late"),
            Err(SessionError::Terminated)
        ));
        assert!(matches!(
            alice.handle_incoming(b"{}"),
            Err(SessionError::Terminated)
        ));
    }

    #[test]
    fn test_handshake_timeout_terminates() {
        let (alice_end, _bob_end) = MemoryRelay::pair("alice", "bob");
        let config = SessionConfig {
            handshake_timeout: Duration::from_millis(10),
            ..SessionConfig::default()
        };
        let mut alice = Session::new(
            "alice",
            "bob",
            KeyPair::generate(&mut OsRng),
            config,
            alice_end,
            OsRng,
        );
        alice.start().unwrap();

        alice.tick();
        assert_eq!(alice.state(), SessionState::HandshakeInitiated);

        std::thread::sleep(Duration::from_millis(15));
        alice.tick();
        assert_eq!(alice.state(), SessionState::Terminated);
    }

    #[test]
    fn test_tick_after_established_never_terminates() {
        let config = SessionConfig {
            handshake_timeout: Duration::from_millis(1),
            ..SessionConfig::default()
        };
        let (alice_end, bob_end) = MemoryRelay::pair("alice", "bob");
        let mut alice = Session::new(
            "alice",
            "bob",
            KeyPair::generate(&mut OsRng),
            config.clone(),
            alice_end,
            OsRng,
        );
        let mut bob = Session::new(
            "bob",
            "alice",
            KeyPair::generate(&mut OsRng),
            config,
            bob_end,
            OsRng,
        );
        alice.start().unwrap();
        bob.start().unwrap();
        pump(&mut alice, &mut bob);

        std::thread::sleep(Duration::from_millis(5));
        alice.tick();
        assert_eq!(alice.state(), SessionState::Established);
    }

    #[test]
    fn test_confirm_surfaces_event() {
        let (mut alice, _) = established_pair();
        let confirm = wire::encode(&RelayEnvelope {
            sender_id: "bob".into(),
            target_id: "alice".into(),
            payload: Payload::Confirm,
        })
        .unwrap();
        assert_eq!(
            alice.handle_incoming(&confirm).unwrap(),
            SessionEvent::ConfirmReceived
        );
    }
}
