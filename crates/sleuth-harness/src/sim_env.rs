//! Simulated environment.
//!
//! `SimEnv` implements `Environment` with a virtual clock that only moves
//! when the test advances it, plus a seeded `ChaCha8Rng` for choosing
//! delivery orders. Clones share both, so a session and the world driving it
//! always agree on the time.

use std::{
    ops::{Add, Sub},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sleuth_core::Environment;

/// Instant on the virtual clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SimInstant(Duration);

impl SimInstant {
    /// Time since the simulation started.
    pub fn elapsed(self) -> Duration {
        self.0
    }
}

impl Sub for SimInstant {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.0.saturating_sub(rhs.0)
    }
}

impl Add<Duration> for SimInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs)
    }
}

/// Simulated environment for deterministic testing.
#[derive(Debug, Clone)]
pub struct SimEnv {
    micros: Arc<AtomicU64>,
    rng: Arc<Mutex<ChaCha8Rng>>,
    seed: u64,
}

impl SimEnv {
    /// Environment with seed 0.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment whose random choices derive from `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            micros: Arc::new(AtomicU64::new(0)),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            seed,
        }
    }

    /// Seed this environment was built with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Move the clock forward.
    pub fn advance(&self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.micros.fetch_add(micros, Ordering::SeqCst);
    }

    /// Uniform index in `0..len`. Returns 0 for `len <= 1`.
    pub fn pick(&self, len: usize) -> usize {
        if len <= 1 {
            return 0;
        }
        match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(0..len),
            // A poisoned lock means a test already panicked; any index will do.
            Err(_) => 0,
        }
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    type Instant = SimInstant;

    fn now(&self) -> SimInstant {
        SimInstant(Duration::from_micros(self.micros.load(Ordering::SeqCst)))
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.advance(duration);
        std::future::ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_clock() {
        let env = SimEnv::new();
        let other = env.clone();

        env.advance(Duration::from_millis(1500));
        assert_eq!(other.now().elapsed(), Duration::from_millis(1500));
    }

    #[test]
    fn same_seed_same_picks() {
        let a = SimEnv::with_seed(42);
        let b = SimEnv::with_seed(42);

        let picks_a: Vec<_> = (0..32).map(|_| a.pick(7)).collect();
        let picks_b: Vec<_> = (0..32).map(|_| b.pick(7)).collect();
        assert_eq!(picks_a, picks_b);
        assert!(picks_a.iter().all(|&i| i < 7));
    }

    #[test]
    fn pick_of_one_is_zero() {
        let env = SimEnv::with_seed(3);
        assert_eq!(env.pick(0), 0);
        assert_eq!(env.pick(1), 0);
    }
}
