//! Busy-wait delay generation.
//!
//! Each intercepted call draws an iteration count uniformly from the
//! configured range and spins for that many arithmetic steps. The loop is a
//! pure CPU delay: it never sleeps or yields, and the compiler cannot elide
//! it.

use std::fmt;
use std::hint::black_box;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::DelayRange;

/// Source of uniformly distributed random values.
///
/// Implementations must be callable from many threads at once.
pub trait EntropySource: Send + Sync {
    /// Next random value.
    fn next_u64(&self) -> u64;
}

/// Operating-system backed entropy, via the thread-local generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn next_u64(&self) -> u64 {
        rand::rng().next_u64()
    }
}

/// Deterministic entropy for reproducible runs.
#[derive(Debug)]
pub struct SeededEntropy {
    rng: Mutex<ChaCha8Rng>,
}

impl SeededEntropy {
    /// Creates a generator from `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }
}

impl EntropySource for SeededEntropy {
    fn next_u64(&self) -> u64 {
        self.rng.lock().next_u64()
    }
}

/// Spin for `iterations` steps.
///
/// Returns the accumulator so callers can observe that the work happened.
/// Overflow wraps.
pub fn spin(iterations: u64) -> u64 {
    let mut sum: u64 = 0;
    for i in 0..iterations {
        sum = black_box(sum.wrapping_add(i));
        sum = black_box(sum.wrapping_mul(i / 2));
    }
    sum
}

/// Draws iteration counts and burns them.
#[derive(Clone)]
pub struct DelayGenerator {
    range: DelayRange,
    entropy: Arc<dyn EntropySource>,
}

impl DelayGenerator {
    /// Generator over `range` using OS entropy.
    #[must_use]
    pub fn new(range: DelayRange) -> Self {
        Self::with_entropy(range, Arc::new(OsEntropy))
    }

    /// Generator over `range` using a caller-supplied source.
    #[must_use]
    pub fn with_entropy(range: DelayRange, entropy: Arc<dyn EntropySource>) -> Self {
        Self { range, entropy }
    }

    /// The range iteration counts are drawn from.
    #[must_use]
    pub const fn range(&self) -> DelayRange {
        self.range
    }

    /// Draw one iteration count.
    #[must_use]
    pub fn pick(&self) -> u64 {
        self.range.sample(self.entropy.next_u64())
    }

    /// Draw an iteration count and spin for it.
    ///
    /// Returns the number of iterations spun.
    pub fn wait(&self) -> u64 {
        let iterations = self.pick();
        spin(iterations);
        iterations
    }
}

impl fmt::Debug for DelayGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayGenerator")
            .field("range", &self.range)
            .finish_non_exhaustive()
    }
}
