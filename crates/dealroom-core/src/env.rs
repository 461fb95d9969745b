//! Environment abstraction for deterministic testing.
//!
//! Decouples state machine drivers from system resources (monotonic time, wall
//! clock, randomness). Production uses the system clock and OS entropy; tests
//! use [`test_utils::MockEnv`] with virtual time advanced by hand.

use std::{
    fmt::Debug,
    ops::{Add, Sub},
    time::Duration,
};

use chrono::{DateTime, Utc};

/// Abstract environment providing time and randomness.
///
/// # Invariants
///
/// - `now()` never goes backwards within one execution context
/// - `random_bytes()` fills the whole buffer
pub trait Environment: Clone + Send + Sync + 'static {
    /// Monotonic instant type.
    ///
    /// Production environments use `std::time::Instant`; simulations may use
    /// any virtual clock with the same arithmetic.
    type Instant: Copy
        + Ord
        + Debug
        + Send
        + Sync
        + Sub<Output = Duration>
        + Add<Duration, Output = Self::Instant>;

    /// Current monotonic time.
    fn now(&self) -> Self::Instant;

    /// Current wall-clock time, used to stamp optimistic messages.
    fn wall_clock(&self) -> DateTime<Utc>;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    ///
    /// Used for temporary message ids.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}

/// Deterministic environment for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use std::{
        sync::{Arc, Mutex, PoisonError},
        time::{Duration, Instant},
    };

    use chrono::{DateTime, TimeZone, Utc};

    use super::Environment;

    #[derive(Debug)]
    struct MockState {
        elapsed: Duration,
        counter: u64,
    }

    /// Virtual clock plus counter-based "randomness".
    ///
    /// Clones share state, so a test can keep one handle and advance the
    /// clock seen by the component under test.
    #[derive(Debug, Clone)]
    pub struct MockEnv {
        origin: Instant,
        epoch: DateTime<Utc>,
        state: Arc<Mutex<MockState>>,
    }

    impl Default for MockEnv {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockEnv {
        /// Fresh environment at virtual time zero, wall clock 2024-01-01.
        pub fn new() -> Self {
            let epoch = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).single().unwrap_or_default();
            Self {
                origin: Instant::now(),
                epoch,
                state: Arc::new(Mutex::new(MockState { elapsed: Duration::ZERO, counter: 0 })),
            }
        }

        /// Advance virtual time.
        pub fn advance(&self, by: Duration) {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.elapsed += by;
        }

        /// Virtual time elapsed since creation.
        pub fn elapsed(&self) -> Duration {
            self.state.lock().unwrap_or_else(PoisonError::into_inner).elapsed
        }
    }

    impl Environment for MockEnv {
        type Instant = Instant;

        fn now(&self) -> Instant {
            self.origin + self.elapsed()
        }

        fn wall_clock(&self) -> DateTime<Utc> {
            let elapsed = chrono::Duration::from_std(self.elapsed()).unwrap_or_default();
            self.epoch + elapsed
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.counter += 1;
            let bytes = state.counter.to_be_bytes();
            for (i, byte) in buffer.iter_mut().enumerate() {
                *byte = bytes[i % bytes.len()];
            }
        }
    }

}
