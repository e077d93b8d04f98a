//! Production Environment implementation using system time and RNG.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use parlor_core::Environment;

/// Production environment using system time and cryptographic RNG.
///
/// This implementation:
/// - Uses `std::time::Instant::now()` for monotonic time
/// - Uses `SystemTime` for wall-clock `stored_at` stamps
/// - Uses `getrandom` for cryptographic randomness
///
/// # Security
///
/// Audit-log nonces, ephemeral log keys and connection IDs all come from
/// `getrandom`.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_time_secs(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).unwrap_or_else(|e| {
            // A nonce from a failed RNG must never be used. Abort rather than
            // seal audit entries under a predictable nonce.
            tracing::error!("getrandom failed: {}", e);
            std::process::abort();
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn system_env_time_advances() {
        let env = SystemEnv::new();

        let t1 = env.now();
        std::thread::sleep(Duration::from_millis(10));
        let t2 = env.now();

        assert!(t2 > t1, "Time should advance");
    }

    #[test]
    fn system_env_wall_clock_is_after_2020() {
        assert!(SystemEnv::new().unix_time_secs() > 1_577_836_800);
    }

    #[test]
    fn system_env_random_bytes_are_random() {
        let env = SystemEnv::new();

        let mut bytes1 = [0u8; 32];
        let mut bytes2 = [0u8; 32];

        env.random_bytes(&mut bytes1);
        env.random_bytes(&mut bytes2);

        assert_ne!(bytes1, bytes2, "Random bytes should differ");
    }
}
