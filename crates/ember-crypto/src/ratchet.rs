//! Forward-secrecy key ratcheting.
//!
//! Two interlocking ratchets evolve the session keys:
//!
//! - **Symmetric ratchet**: every message sent or received advances the
//!   chain key for that direction one step through a one-way derivation.
//!   A compromised chain key never reveals earlier message keys.
//! - **DH ratchet**: when the partner advertises a genuinely new ratchet
//!   public key, the root key is remixed with fresh DH output and both
//!   chains are replaced, giving break-in recovery.
//!
//! The first ratchet key ever learned from the partner is stored without
//! triggering a step, so the base chains from key agreement carry the
//! initial message exchange in both directions.

use crate::agreement::SessionSecrets;
use crate::kdf::{self, label};
use crate::keys::{KeyPair, PublicKey};
use crate::CryptoError;
use rand_core::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Root key; mutated only by DH ratchet steps.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct RootKey([u8; 32]);

impl RootKey {
    /// Create from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Chain key for the symmetric ratchet, one per direction.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ChainKey([u8; 32]);

impl ChainKey {
    /// Create from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Ratchet forward one step and derive the message key for this step.
    ///
    /// `message_key = KDF(chain || "message")`,
    /// `next_chain  = KDF(chain || "chain")`.
    /// Both derivations are one-way; the old chain key is overwritten.
    pub fn advance(&mut self) -> MessageKey {
        let message = kdf::derive(&self.0, label::MESSAGE);
        let next = kdf::derive(&self.0, label::CHAIN);
        self.0 = next;
        MessageKey(message)
    }
}

/// Single-use message key derived from a chain key.
///
/// Used for exactly one AEAD operation, then dropped (and zeroized).
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MessageKey([u8; 32]);

impl MessageKey {
    /// Get the raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Full double-ratchet state for one session.
///
/// Exclusively owned by its session; all mutation happens through `&mut
/// self` on the session's sequential event stream. Secret fields zeroize
/// on drop.
pub struct RatchetState {
    root_key: RootKey,
    sending_chain: ChainKey,
    receiving_chain: ChainKey,
    own_ratchet: KeyPair,
    partner_ratchet: Option<PublicKey>,
    last_received_ratchet: Option<PublicKey>,
    send_counter: u64,
    receive_counter: u64,
    /// Set at seeding and after each DH step; cleared once the new own
    /// ratchet key has been advertised on an outgoing message.
    advertise_pending: bool,
}

impl RatchetState {
    /// Seed a ratchet from freshly agreed session secrets.
    ///
    /// Generates the session's first ratchet pair (distinct from the
    /// ephemeral pair consumed by the agreement) and marks it for
    /// advertisement on the first outgoing message.
    pub fn new<R: RngCore + CryptoRng>(secrets: SessionSecrets, rng: &mut R) -> Self {
        Self {
            root_key: secrets.root_key,
            sending_chain: secrets.sending_chain,
            receiving_chain: secrets.receiving_chain,
            own_ratchet: KeyPair::generate(rng),
            partner_ratchet: None,
            last_received_ratchet: None,
            send_counter: 0,
            receive_counter: 0,
            advertise_pending: true,
        }
    }

    /// The ratchet public key to advertise to the partner.
    #[must_use]
    pub fn own_ratchet_public(&self) -> PublicKey {
        self.own_ratchet.public
    }

    /// The partner's current ratchet public key, if one has been learned.
    #[must_use]
    pub fn partner_ratchet_public(&self) -> Option<PublicKey> {
        self.partner_ratchet
    }

    /// Messages sent so far on the current direction.
    #[must_use]
    pub fn send_counter(&self) -> u64 {
        self.send_counter
    }

    /// Messages received so far.
    #[must_use]
    pub fn receive_counter(&self) -> u64 {
        self.receive_counter
    }

    /// Record the partner's ratchet key learned out-of-band of a message
    /// envelope (the `ratchet_init` exchange).
    ///
    /// The first key learned never triggers a DH step.
    pub fn note_partner_key(&mut self, key: PublicKey) {
        if self.last_received_ratchet.is_none() {
            self.last_received_ratchet = Some(key);
        }
        self.partner_ratchet = Some(key);
    }

    /// Advance the sending chain for one outgoing message.
    ///
    /// Returns the message key, the envelope counter (starting at 1), and
    /// the own ratchet public key if it still needs advertising (first
    /// message of a sending chain).
    pub fn next_sending_key(&mut self) -> (MessageKey, u64, Option<PublicKey>) {
        self.send_counter += 1;
        let key = self.sending_chain.advance();
        let advertised = if self.advertise_pending {
            self.advertise_pending = false;
            Some(self.own_ratchet.public)
        } else {
            None
        };
        (key, self.send_counter, advertised)
    }

    /// Advance the receiving chain for one incoming message.
    ///
    /// If the envelope advertised a ratchet key that is genuinely new (and
    /// not the first key ever learned), a DH ratchet step replaces the root
    /// key and both chains before the message key is derived.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyAgreement`] if the DH step degenerates;
    /// the previous state is left untouched in that case.
    pub fn next_receiving_key<R: RngCore + CryptoRng>(
        &mut self,
        advertised: Option<PublicKey>,
        rng: &mut R,
    ) -> Result<(MessageKey, u64), CryptoError> {
        if let Some(key) = advertised {
            match self.last_received_ratchet {
                None => {
                    // First key observed: store only, keep the base chains.
                    self.last_received_ratchet = Some(key);
                    self.partner_ratchet = Some(key);
                }
                Some(last) if last != key => self.dh_step(key, rng)?,
                Some(_) => {}
            }
        }

        self.receive_counter += 1;
        let message_key = self.receiving_chain.advance();
        Ok((message_key, self.receive_counter))
    }

    /// Perform one DH ratchet step against a new partner ratchet key.
    ///
    /// Root key and both chains are computed into temporaries first and
    /// swapped in together, so a failed DH never leaves mixed state.
    fn dh_step<R: RngCore + CryptoRng>(
        &mut self,
        partner_key: PublicKey,
        rng: &mut R,
    ) -> Result<(), CryptoError> {
        let shared_recv = self.own_ratchet.secret.diffie_hellman(&partner_key)?;
        let new_root = kdf::derive2(self.root_key.as_bytes(), shared_recv.as_bytes(), label::ROOT);
        let new_receiving = kdf::derive(&new_root, label::RECEIVE);

        let new_own = KeyPair::generate(rng);
        let shared_send = new_own.secret.diffie_hellman(&partner_key)?;
        let new_sending = kdf::derive2(&new_root, shared_send.as_bytes(), label::SEND);

        self.root_key = RootKey::from_bytes(new_root);
        self.receiving_chain = ChainKey::from_bytes(new_receiving);
        self.sending_chain = ChainKey::from_bytes(new_sending);
        self.own_ratchet = new_own;
        self.partner_ratchet = Some(partner_key);
        self.last_received_ratchet = Some(partner_key);
        self.advertise_pending = true;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agreement::{agree, LocalHandshakeKeys, PeerHandshakeKeys, Role};
    use rand_core::OsRng;

    fn seeded_pair() -> (RatchetState, RatchetState) {
        let alice = LocalHandshakeKeys {
            identity: KeyPair::generate(&mut OsRng),
            ephemeral: KeyPair::generate(&mut OsRng),
        };
        let bob = LocalHandshakeKeys {
            identity: KeyPair::generate(&mut OsRng),
            ephemeral: KeyPair::generate(&mut OsRng),
        };
        let a_view = PeerHandshakeKeys {
            identity: alice.identity.public,
            ephemeral: alice.ephemeral.public,
        };
        let b_view = PeerHandshakeKeys {
            identity: bob.identity.public,
            ephemeral: bob.ephemeral.public,
        };
        let a = agree(&alice, &b_view, Role::Initiator).unwrap();
        let b = agree(&bob, &a_view, Role::Responder).unwrap();
        (
            RatchetState::new(a, &mut OsRng),
            RatchetState::new(b, &mut OsRng),
        )
    }

    #[test]
    fn test_chain_advance_produces_distinct_keys() {
        let mut chain = ChainKey::from_bytes([0x42u8; 32]);
        let k1 = chain.advance();
        let k2 = chain.advance();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_chain_advance_is_deterministic() {
        let mut a = ChainKey::from_bytes([7u8; 32]);
        let mut b = ChainKey::from_bytes([7u8; 32]);
        assert_eq!(a.advance().as_bytes(), b.advance().as_bytes());
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_message_key_differs_from_next_chain() {
        let mut chain = ChainKey::from_bytes([9u8; 32]);
        let message = chain.advance();
        assert_ne!(message.as_bytes(), chain.as_bytes());
    }

    #[test]
    fn test_mirrored_chains_derive_same_message_keys() {
        let (mut alice, mut bob) = seeded_pair();

        let (a_key, a_counter, advertised) = alice.next_sending_key();
        assert_eq!(a_counter, 1);
        assert!(advertised.is_some());

        let (b_key, b_counter) = bob.next_receiving_key(advertised, &mut OsRng).unwrap();
        assert_eq!(b_counter, 1);
        assert_eq!(a_key.as_bytes(), b_key.as_bytes());
    }

    #[test]
    fn test_counters_advance_per_direction() {
        let (mut alice, mut bob) = seeded_pair();

        let (_, c1, adv) = alice.next_sending_key();
        let (_, c2, adv2) = alice.next_sending_key();
        assert_eq!((c1, c2), (1, 2));
        // Advertisement happens on the first message of the chain only
        assert!(adv.is_some());
        assert!(adv2.is_none());

        let (_, r1) = bob.next_receiving_key(adv, &mut OsRng).unwrap();
        let (_, r2) = bob.next_receiving_key(adv2, &mut OsRng).unwrap();
        assert_eq!((r1, r2), (1, 2));
        assert_eq!(bob.send_counter(), 0);
    }

    #[test]
    fn test_first_key_does_not_trigger_step() {
        let (mut alice, mut bob) = seeded_pair();

        let (a_key, _, advertised) = alice.next_sending_key();
        let before = *bob.receiving_chain.as_bytes();
        let root_before = *bob.root_key.as_bytes();

        // First observed key: base chain must survive (message keys match).
        let (b_key, _) = bob.next_receiving_key(advertised, &mut OsRng).unwrap();
        assert_eq!(a_key.as_bytes(), b_key.as_bytes());
        assert_eq!(bob.root_key.as_bytes(), &root_before);
        assert_ne!(bob.receiving_chain.as_bytes(), &before); // symmetric step only
    }

    #[test]
    fn test_repeated_key_does_not_trigger_step() {
        let (mut alice, mut bob) = seeded_pair();
        let own = alice.own_ratchet_public();

        let (_, _, advertised) = alice.next_sending_key();
        bob.next_receiving_key(advertised, &mut OsRng).unwrap();
        let root_before = *bob.root_key.as_bytes();

        // Same key advertised again: no step.
        bob.next_receiving_key(Some(own), &mut OsRng).unwrap();
        assert_eq!(bob.root_key.as_bytes(), &root_before);
    }

    #[test]
    fn test_new_key_triggers_step() {
        let (mut alice, mut bob) = seeded_pair();

        let (_, _, advertised) = alice.next_sending_key();
        bob.next_receiving_key(advertised, &mut OsRng).unwrap();

        let root_before = *bob.root_key.as_bytes();
        let send_before = *bob.sending_chain.as_bytes();
        let own_before = bob.own_ratchet_public();

        // A genuinely new partner key replaces root, both chains, and the
        // own ratchet pair, and re-arms advertisement.
        let fresh = KeyPair::generate(&mut OsRng).public;
        bob.next_receiving_key(Some(fresh), &mut OsRng).unwrap();

        assert_ne!(bob.root_key.as_bytes(), &root_before);
        assert_ne!(bob.sending_chain.as_bytes(), &send_before);
        assert_ne!(bob.own_ratchet_public(), own_before);
        assert!(bob.advertise_pending);
        assert_eq!(bob.last_received_ratchet, Some(fresh));
    }

    #[test]
    fn test_failed_step_leaves_state_untouched() {
        let (mut alice, mut bob) = seeded_pair();
        let (_, _, advertised) = alice.next_sending_key();
        bob.next_receiving_key(advertised, &mut OsRng).unwrap();

        let root_before = *bob.root_key.as_bytes();
        let counter_before = bob.receive_counter();

        // Low-order point makes the step's first DH fail.
        let low_order = PublicKey::from_bytes([0u8; 32]);
        assert!(bob.next_receiving_key(Some(low_order), &mut OsRng).is_err());
        assert_eq!(bob.root_key.as_bytes(), &root_before);
        assert_eq!(bob.receive_counter(), counter_before);
    }

    #[test]
    fn test_note_partner_key_first_is_sticky() {
        let (alice, mut bob) = seeded_pair();
        let first = alice.own_ratchet_public();
        bob.note_partner_key(first);

        // A message advertising the same key must not trigger a step.
        let root_before = *bob.root_key.as_bytes();
        bob.next_receiving_key(Some(first), &mut OsRng).unwrap();
        assert_eq!(bob.root_key.as_bytes(), &root_before);
    }
}
