use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::config::LinkConfig;

/// Binary exponential backoff.
///
/// After the k-th consecutive collision the wait is a whole number of
/// slots, drawn uniformly from `0..=2^min(k, max_exponent) - 1`, times
/// `scale`.
pub struct BackoffHandler {
    collisions: u32,
    scale: Duration,
    max_exponent: u32,
    rng: StdRng,
}

impl BackoffHandler {
    pub fn new(scale: Duration, max_exponent: u32) -> Self {
        Self {
            collisions: 0,
            scale,
            max_exponent,
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn with_seed(scale: Duration, max_exponent: u32, seed: u64) -> Self {
        Self {
            collisions: 0,
            scale,
            max_exponent,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_config(config: &LinkConfig) -> Self {
        Self::new(
            Duration::from_millis(config.backoff_scale_ms),
            config.backoff_max_exponent,
        )
    }

    /// Largest slot count of the current contention window
    fn max_slots(&self) -> u32 {
        let exponent = self.collisions.min(self.max_exponent).min(31);
        (1u32 << exponent) - 1
    }

    /// Upper bound of the current backoff window
    pub fn max_wait(&self) -> Duration {
        self.scale * self.max_slots()
    }

    pub fn collisions(&self) -> u32 {
        self.collisions
    }

    /// Count a collision and draw the next wait without sleeping
    pub fn next_wait(&mut self) -> Duration {
        self.collisions = self.collisions.saturating_add(1);
        let slots = self.rng.random_range(0..=self.max_slots());
        self.scale * slots
    }

    /// Count a collision and sleep for a random slot count
    pub fn wait(&mut self) -> Duration {
        let wait = self.next_wait();
        trace!(
            "Backing off {:?} after {} collisions (max {:?})",
            wait,
            self.collisions,
            self.max_wait()
        );
        thread::sleep(wait);
        wait
    }

    pub fn reset(&mut self) {
        self.collisions = 0;
    }
}
