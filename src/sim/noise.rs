//! Seedable noise source for the sensor simulators

use rand::prelude::*;
use rand::rngs::SmallRng;
use rand_distr::{Distribution, StandardNormal, Uniform};

/// Noise generator with deterministic seeding support
#[derive(Clone)]
pub struct NoiseGenerator {
    rng: SmallRng,
}

impl NoiseGenerator {
    /// Seed 0 draws from entropy; any other seed is reproducible.
    pub fn new(seed: u64) -> Self {
        let rng = if seed == 0 {
            SmallRng::from_entropy()
        } else {
            SmallRng::seed_from_u64(seed)
        };
        Self { rng }
    }

    /// Derive an independent generator for one sensor.
    ///
    /// Keeps sensors decorrelated while a non-zero root seed stays
    /// reproducible.
    pub fn fork(&mut self) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(self.rng.next_u64()),
        }
    }

    /// Zero-mean Gaussian sample.
    #[inline]
    pub fn gaussian(&mut self, stddev: f32) -> f32 {
        if stddev <= 0.0 {
            return 0.0;
        }
        let n: f32 = self.rng.sample(StandardNormal);
        n * stddev
    }

    /// Gaussian sample clamped to ±`sigmas` standard deviations.
    #[inline]
    pub fn bounded_gaussian(&mut self, stddev: f32, sigmas: f32) -> f32 {
        let limit = stddev * sigmas;
        self.gaussian(stddev).clamp(-limit, limit)
    }

    /// Uniform sample in [0, 1).
    #[inline]
    pub fn uniform(&mut self) -> f32 {
        Uniform::new(0.0f32, 1.0).sample(&mut self.rng)
    }
}
