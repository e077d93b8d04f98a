//! Simulated environment: virtual clock and seeded RNG.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use parlor_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Wall-clock time the simulation starts at (2023-11-14T22:13:20Z).
pub const SIM_EPOCH_SECS: i64 = 1_700_000_000;

struct SimState {
    rng: ChaCha20Rng,
    elapsed: Duration,
}

/// Deterministic environment.
///
/// Clones share the clock and RNG stream. Time only moves through
/// [`SimEnv::advance`].
#[derive(Clone)]
pub struct SimEnv {
    seed: u64,
    origin: Instant,
    state: Arc<Mutex<SimState>>,
}

impl SimEnv {
    /// Create an environment from a seed.
    pub fn with_seed(seed: u64) -> Self {
        tracing::debug!(seed, "simulation environment seeded");
        Self {
            seed,
            origin: Instant::now(),
            state: Arc::new(Mutex::new(SimState {
                rng: ChaCha20Rng::seed_from_u64(seed),
                elapsed: Duration::ZERO,
            })),
        }
    }

    /// Seed this environment was created with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Move the virtual clock forward.
    pub fn advance(&self, by: Duration) {
        self.state.lock().elapsed += by;
    }

    /// Virtual time since creation.
    pub fn elapsed(&self) -> Duration {
        self.state.lock().elapsed
    }
}

impl Environment for SimEnv {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn unix_time_secs(&self) -> i64 {
        let secs = i64::try_from(self.elapsed().as_secs()).unwrap_or(i64::MAX);
        SIM_EPOCH_SECS.saturating_add(secs)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.state.lock().rng.fill_bytes(buffer);
    }
}
