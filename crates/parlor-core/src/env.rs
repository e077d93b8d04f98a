//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples relay logic from system resources (time
//! and randomness). Production uses the system clock and OS entropy; the
//! harness uses a virtual clock and a seeded RNG, so every registry, relay and
//! audit-log transition can be replayed exactly.
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Determinism: Given the same seed, `random_bytes()` produces the same
//!   sequence
//! - Isolation: Implementations must not share global state

use std::time::Instant;

/// Abstract environment providing time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// 1. Time monotonicity: `now()` never goes backwards
/// 2. RNG quality: `random_bytes()` uses cryptographically secure entropy in
///    production. Audit-log nonces and ephemeral log keys come from here.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Returns the current monotonic time.
    fn now(&self) -> Instant;

    /// Returns the current wall-clock time as seconds since the Unix epoch.
    ///
    /// Used only for human-facing timestamps (`stored_at`), never for
    /// ordering.
    fn unix_time_secs(&self) -> i64;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Security
    ///
    /// Production implementations MUST use the OS entropy pool
    /// (`getrandom`). Simulation implementations use a seeded RNG and MUST
    /// log the seed for reproducibility.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    ///
    /// Used for connection identifiers.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
