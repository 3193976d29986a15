//! Random number generation provider abstraction.

use rand::distr::uniform::SampleUniform;
use rand::prelude::*;
use std::cell::RefCell;
use std::ops::Range;

/// Provider trait for random number generation.
///
/// The client only needs randomness for reconnect jitter, but routing it
/// through a provider keeps backoff schedules reproducible in tests.
pub trait RandomProvider: Clone {
    /// Generate a random value within a specified range.
    ///
    /// The range is exclusive of the upper bound (start..end) and must not be
    /// empty.
    fn random_range<T>(&self, range: Range<T>) -> T
    where
        T: SampleUniform + PartialOrd;
}

/// Production random provider using thread-local RNG.
#[derive(Clone, Default, Debug)]
pub struct TokioRandomProvider;

impl TokioRandomProvider {
    /// Create a new production random provider.
    pub fn new() -> Self {
        Self
    }
}

thread_local! {
    static RNG: RefCell<rand::rngs::ThreadRng> = RefCell::new(rand::rng());
}

impl RandomProvider for TokioRandomProvider {
    fn random_range<T>(&self, range: Range<T>) -> T
    where
        T: SampleUniform + PartialOrd,
    {
        RNG.with(|rng| rng.borrow_mut().random_range(range))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_range_stays_in_bounds() {
        let random = TokioRandomProvider::new();
        for _ in 0..1000 {
            let value = random.random_range(10u64..20);
            assert!((10..20).contains(&value));
        }
    }
}
