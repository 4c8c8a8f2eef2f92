//! Domain-separated BLAKE3 key derivation.
//!
//! Every secret in the protocol is derived through [`derive`], which runs
//! BLAKE3 in derive-key mode under a protocol-unique context string and
//! mixes in a per-purpose label. Derivations are one-way: neither the input
//! key material nor sibling outputs can be recovered from an output.

/// Protocol-unique domain separation context.
///
/// Changing this string changes every derived secret, so it doubles as a
/// protocol version marker.
pub const PROTOCOL_CONTEXT: &str = "EMBER v1 paired-session key derivation";

/// Derivation labels used across the handshake and ratchet.
pub mod label {
    /// Root key from master secret, and new root on a DH ratchet step.
    pub const ROOT: &[u8] = b"root";
    /// Base chain from root key, and next chain key from current chain key.
    pub const CHAIN: &[u8] = b"chain";
    /// Message key from current chain key.
    pub const MESSAGE: &[u8] = b"message";
    /// New receiving chain on a DH ratchet step.
    pub const RECEIVE: &[u8] = b"receive";
    /// New sending chain on a DH ratchet step.
    pub const SEND: &[u8] = b"send";
}

/// Derive a 32-byte secret from input key material and a label.
///
/// Computes `BLAKE3-derive-key(PROTOCOL_CONTEXT, ikm || label)`.
#[must_use]
pub fn derive(ikm: &[u8], label: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(PROTOCOL_CONTEXT);
    hasher.update(ikm);
    hasher.update(label);
    *hasher.finalize().as_bytes()
}

/// Derive a 32-byte secret from two inputs and a label.
///
/// Used by the DH ratchet, which mixes the current root key with a fresh
/// shared secret: `BLAKE3-derive-key(ctx, ikm_a || ikm_b || label)`.
#[must_use]
pub fn derive2(ikm_a: &[u8], ikm_b: &[u8], label: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(PROTOCOL_CONTEXT);
    hasher.update(ikm_a);
    hasher.update(ikm_b);
    hasher.update(label);
    *hasher.finalize().as_bytes()
}
