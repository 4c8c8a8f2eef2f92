//! Session configuration parameters.

use std::time::Duration;

/// Tunable session behavior.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a handshake may remain incomplete before the session is
    /// terminated by [`crate::Session::tick`]. The original design left
    /// handshakes unbounded; a deadline is made explicit here.
    pub handshake_timeout: Duration,
    /// Consecutive authentication failures before a caller-visible warning
    /// is logged. A single corrupted message is routine over a lossy relay;
    /// a prolonged series suggests an active attacker or a desynchronized
    /// peer. The streak resets on any successful decrypt.
    pub auth_failure_warn_threshold: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            auth_failure_warn_threshold: 3,
        }
    }
}
