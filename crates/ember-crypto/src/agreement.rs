//! 4-way Diffie-Hellman key agreement (X3DH-style).
//!
//! Both peers combine their identity and ephemeral pairs with the partner's
//! identity and ephemeral publics into a shared root key and two directional
//! base chains. The two sides compute the same four DH outputs but two of
//! them in swapped pairings (identity x ephemeral vs ephemeral x identity),
//! so the outputs are sorted by raw byte order before concatenation - that
//! sort is what makes the derived secrets bit-identical on both sides.

use crate::kdf::{self, label};
use crate::keys::{KeyPair, PublicKey};
use crate::ratchet::{ChainKey, RootKey};
use crate::CryptoError;
use zeroize::Zeroize;

/// Which side of the handshake this peer plays.
///
/// Chosen deterministically by the orchestrator before any message is sent;
/// the initiator's sending chain is the responder's receiving chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends `handshake_init`; sending chain = chain A.
    Initiator,
    /// Replies with `handshake_response`; sending chain = chain B.
    Responder,
}

/// Local key material entering the handshake.
pub struct LocalHandshakeKeys {
    /// Long-lived identity pair.
    pub identity: KeyPair,
    /// Per-session ephemeral pair.
    pub ephemeral: KeyPair,
}

/// Partner public keys received over the relay.
#[derive(Debug, Clone, Copy)]
pub struct PeerHandshakeKeys {
    /// Partner identity public key.
    pub identity: PublicKey,
    /// Partner ephemeral public key.
    pub ephemeral: PublicKey,
}

/// Secrets shared by both peers after a successful agreement.
pub struct SessionSecrets {
    /// Root key; mutated only by DH ratchet steps.
    pub root_key: RootKey,
    /// Base chain for outgoing messages.
    pub sending_chain: ChainKey,
    /// Base chain for incoming messages.
    pub receiving_chain: ChainKey,
}

/// Run the 4-way DH agreement.
///
/// Honest peers who exchange correct public keys and opposite roles derive
/// bit-identical root keys and mirrored chains.
///
/// # Errors
///
/// Returns [`CryptoError::KeyAgreement`] if any DH computation degenerates
/// (low-order peer point). The caller must not proceed to messaging state.
pub fn agree(
    local: &LocalHandshakeKeys,
    peer: &PeerHandshakeKeys,
    role: Role,
) -> Result<SessionSecrets, CryptoError> {
    let dh1 = local.identity.secret.diffie_hellman(&peer.identity)?;
    let dh2 = local.identity.secret.diffie_hellman(&peer.ephemeral)?;
    let dh3 = local.ephemeral.secret.diffie_hellman(&peer.identity)?;
    let dh4 = local.ephemeral.secret.diffie_hellman(&peer.ephemeral)?;

    // dh2 and dh3 come out in swapped order on the two sides; sorting the
    // raw outputs gives both sides the same concatenation.
    let mut outputs = [
        *dh1.as_bytes(),
        *dh2.as_bytes(),
        *dh3.as_bytes(),
        *dh4.as_bytes(),
    ];
    outputs.sort_unstable();

    let mut concat = [0u8; 128];
    for (slot, output) in concat.chunks_exact_mut(32).zip(outputs.iter()) {
        slot.copy_from_slice(output);
    }

    let mut master = kdf::derive(&concat, b"");
    let root = kdf::derive(&master, label::ROOT);
    let mut base = kdf::derive(&root, label::CHAIN);
    let chain_a = kdf::derive(&base, &[0x01]);
    let chain_b = kdf::derive(&base, &[0x02]);

    concat.zeroize();
    for output in &mut outputs {
        output.zeroize();
    }
    master.zeroize();
    base.zeroize();

    let (sending, receiving) = match role {
        Role::Initiator => (chain_a, chain_b),
        Role::Responder => (chain_b, chain_a),
    };

    Ok(SessionSecrets {
        root_key: RootKey::from_bytes(root),
        sending_chain: ChainKey::from_bytes(sending),
        receiving_chain: ChainKey::from_bytes(receiving),
    })
}
