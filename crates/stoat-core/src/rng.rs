use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

// RngContext — explicit randomness for shuffle, noise, and mutation
//
// Every random draw in Stoat goes through a context the caller owns, never a
// process-wide generator. Seeding the context makes shuffling, noise
// injection, and evolutionary mutation fully reproducible in tests.

/// A seedable random-number context threaded through the training engine.
pub struct RngContext {
    rng: StdRng,
}

impl RngContext {
    /// Create a context with a fixed seed (reproducible runs).
    pub fn from_seed(seed: u64) -> Self {
        RngContext {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Create a context seeded from OS entropy.
    pub fn from_entropy() -> Self {
        RngContext {
            rng: StdRng::from_entropy(),
        }
    }

    /// A uniform value in the inclusive range `[lo, hi]`.
    pub fn uniform(&mut self, lo: f32, hi: f32) -> f32 {
        self.rng.gen_range(lo..=hi)
    }

    /// A uniform index in `[0, n)`. `n` must be non-zero.
    pub fn index(&mut self, n: usize) -> usize {
        self.rng.gen_range(0..n)
    }

    /// True with probability `a / (a + b)`.
    ///
    /// Used to pick a parameter group proportionally to its element count.
    pub fn biased_coin(&mut self, a: f32, b: f32) -> bool {
        self.rng.gen_range(0.0..a + b) < a
    }

    /// Shuffle an index table in place.
    pub fn shuffle(&mut self, indices: &mut [usize]) {
        indices.shuffle(&mut self.rng);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_runs_repeat() {
        let mut a = RngContext::from_seed(7);
        let mut b = RngContext::from_seed(7);
        for _ in 0..32 {
            assert_eq!(a.uniform(-1.0, 1.0), b.uniform(-1.0, 1.0));
        }
        assert_eq!(a.index(100), b.index(100));
    }

    #[test]
    fn test_uniform_stays_in_range() {
        let mut rng = RngContext::from_seed(3);
        for _ in 0..1000 {
            let v = rng.uniform(-0.5, 0.5);
            assert!((-0.5..=0.5).contains(&v));
        }
    }

    #[test]
    fn test_shuffle_is_a_permutation() {
        let mut rng = RngContext::from_seed(11);
        let mut xs: Vec<usize> = (0..50).collect();
        rng.shuffle(&mut xs);
        let mut sorted = xs.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_biased_coin_extremes() {
        let mut rng = RngContext::from_seed(5);
        for _ in 0..100 {
            assert!(rng.biased_coin(1.0, 0.0));
            assert!(!rng.biased_coin(0.0, 1.0));
        }
    }
}
