//! Source of the uniform draws behind every coin flip and number the responder produces.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

/// A uniform draw in `0..n`. Injected so tests can pin both sides of every decision.
pub trait Randomness: Send + Sync {
    fn below(&self, n: u32) -> u32;

    /// Fair coin.
    fn flip(&self) -> bool {
        self.below(2) > 0
    }
}

/// Process generator, seeded once from the clock at construction.
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn from_clock() -> Self {
        let seed = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
        Self::with_seed(seed)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Randomness for SeededRandom {
    fn below(&self, n: u32) -> u32 {
        if n == 0 {
            return 0;
        }
        match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(0..n),
            Err(poisoned) => poisoned.into_inner().gen_range(0..n),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Randomness;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed sequence of draws (each clamped below `n`); yields 0 once exhausted.
    pub struct Scripted(Mutex<VecDeque<u32>>);

    impl Scripted {
        pub fn new(draws: &[u32]) -> Self {
            Self(Mutex::new(draws.iter().copied().collect()))
        }
    }

    impl Randomness for Scripted {
        fn below(&self, n: u32) -> u32 {
            let v = self.0.lock().unwrap().pop_front().unwrap_or(0);
            if n == 0 {
                0
            } else {
                v.min(n - 1)
            }
        }
    }
}
