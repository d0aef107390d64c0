//! Seed-derived implementation of `RunContext`.

use crate::context::{RngStream, RunContext};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::time::{SystemTime, UNIX_EPOCH};

/// Run context backed by a master seed.
#[derive(Debug, Clone, Copy)]
pub struct SeededContext {
    seed: u64,
}

impl SeededContext {
    /// Creates a context for the given seed.
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Creates a context seeded from the wall clock.
    pub fn from_clock() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42);
        Self::new(seed)
    }

    /// Creates a context, treating `0` as "derive from the clock".
    pub fn from_flag(seed: u64) -> Self {
        if seed == 0 {
            Self::from_clock()
        } else {
            Self::new(seed)
        }
    }
}

impl RunContext for SeededContext {
    fn stream(&self, stream: RngStream) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.seed.wrapping_mul(stream.salt()) ^ stream.salt())
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}
