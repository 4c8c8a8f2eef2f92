//! Relay transport seam.
//!
//! The relay is an external collaborator; a session only ever sees the
//! narrow [`RelayTransport`] capability it was constructed with. There is
//! no ambient global socket: whoever builds the session decides where
//! bytes go, which is also what lets the entire protocol be exercised
//! in-process through [`MemoryRelay`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use thiserror::Error;

use crate::wire::PeerId;

/// Transport delivery failure.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The relay has no route to the target peer.
    #[error("no route to peer {0}")]
    NoRoute(PeerId),
    /// The underlying channel failed.
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Capability to hand a payload to the relay for forwarding.
///
/// The relay is content-blind: it routes on the target id and delivers
/// at-least-once, with no ordering guarantee across message types.
pub trait RelayTransport {
    /// Deliver an encoded envelope to the given peer.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the relay cannot accept the payload.
    fn deliver(&mut self, target: &PeerId, payload: &[u8]) -> Result<(), TransportError>;
}

/// In-process relay connecting two endpoints through paired queues.
///
/// Test and demo double for the real relay. Each peer holds a
/// [`RelayEndpoint`]; payloads delivered by one side are drained from the
/// other side's inbox.
#[derive(Default)]
pub struct MemoryRelay;

/// Shared queue of pending payloads for one peer.
type Inbox = Rc<RefCell<VecDeque<Vec<u8>>>>;

/// One peer's handle on a [`MemoryRelay`].
pub struct RelayEndpoint {
    local: PeerId,
    peer: PeerId,
    peer_inbox: Inbox,
    inbox: Inbox,
}

impl MemoryRelay {
    /// Create a connected pair of endpoints for two peers.
    #[must_use]
    pub fn pair(a: impl Into<PeerId>, b: impl Into<PeerId>) -> (RelayEndpoint, RelayEndpoint) {
        let a = a.into();
        let b = b.into();
        let inbox_a: Inbox = Rc::default();
        let inbox_b: Inbox = Rc::default();
        (
            RelayEndpoint {
                local: a.clone(),
                peer: b.clone(),
                peer_inbox: Rc::clone(&inbox_b),
                inbox: Rc::clone(&inbox_a),
            },
            RelayEndpoint {
                local: b,
                peer: a,
                peer_inbox: inbox_a,
                inbox: inbox_b,
            },
        )
    }
}

impl RelayEndpoint {
    /// Drain the next pending payload addressed to this peer, if any.
    pub fn recv(&mut self) -> Option<Vec<u8>> {
        self.inbox.borrow_mut().pop_front()
    }

    /// Number of payloads waiting to be drained.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inbox.borrow().len()
    }

    /// The peer id this endpoint belongs to.
    #[must_use]
    pub fn local_id(&self) -> &PeerId {
        &self.local
    }
}

impl RelayTransport for RelayEndpoint {
    fn deliver(&mut self, target: &PeerId, payload: &[u8]) -> Result<(), TransportError> {
        if *target != self.peer {
            return Err(TransportError::NoRoute(target.clone()));
        }
        self.peer_inbox.borrow_mut().push_back(payload.to_vec());
        Ok(())
    }
}
