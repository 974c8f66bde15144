//! Wheel encoder simulation
//!
//! Ticks accumulate from wheel surface travel with multiplicative slip noise.
//! Fractional ticks carry over between updates so slow motion still counts.

use super::config::EncoderConfig;
use super::noise::NoiseGenerator;
use crate::core::types::EncoderState;

/// Encoder simulator for both wheels
pub struct EncoderSimulator {
    config: EncoderConfig,
    ticks_per_meter: f32,
    noise: NoiseGenerator,
    left_fraction: f32,
    right_fraction: f32,
    counts: EncoderState,
}

impl EncoderSimulator {
    pub fn new(config: &EncoderConfig, ticks_per_meter: f32, noise: NoiseGenerator) -> Self {
        Self {
            config: config.clone(),
            ticks_per_meter,
            noise,
            left_fraction: 0.0,
            right_fraction: 0.0,
            counts: EncoderState::default(),
        }
    }

    pub fn counts(&self) -> EncoderState {
        self.counts
    }

    pub fn reset(&mut self) {
        self.left_fraction = 0.0;
        self.right_fraction = 0.0;
        self.counts = EncoderState::default();
    }

    /// Accumulate `velocity·dt·ticks_per_meter` for each wheel.
    pub fn update(&mut self, left_vel: f32, right_vel: f32, dt: f32) -> EncoderState {
        let left = self.wheel_ticks(left_vel, dt);
        let right = self.wheel_ticks(right_vel, dt);

        self.left_fraction += left;
        self.right_fraction += right;

        let left_whole = self.left_fraction.trunc();
        let right_whole = self.right_fraction.trunc();
        self.left_fraction -= left_whole;
        self.right_fraction -= right_whole;

        self.counts.left += left_whole as i64;
        self.counts.right += right_whole as i64;
        self.counts
    }

    fn wheel_ticks(&mut self, vel: f32, dt: f32) -> f32 {
        if vel == 0.0 {
            return 0.0;
        }
        let slip = 1.0 + self.config.slip_bias + self.noise.gaussian(self.config.slip_stddev);
        vel * dt * self.ticks_per_meter * slip
    }
}
