//! Battery drain simulation
//!
//! Draw is an idle baseline plus a term proportional to `|leftPWM|+|rightPWM|`
//! plus LED brightness. Remaining charge only decreases while not charging,
//! and voltage follows a single-cell LiPo discharge curve.

use super::config::BatteryConfig;
use crate::core::types::{BatteryState, LedState, MotorState};

/// (percentage, volts) points of the discharge curve
const DISCHARGE_CURVE: [(f32, f32); 7] = [
    (0.0, 3.00),
    (5.0, 3.30),
    (10.0, 3.45),
    (20.0, 3.60),
    (50.0, 3.75),
    (80.0, 3.95),
    (100.0, 4.20),
];

/// Battery simulator
pub struct BatterySimulator {
    config: BatteryConfig,
    remaining_mah: f32,
    low_reported: bool,
}

impl BatterySimulator {
    pub fn new(config: &BatteryConfig) -> Self {
        let mut sim = Self {
            config: config.clone(),
            remaining_mah: 0.0,
            low_reported: false,
        };
        sim.reset();
        sim
    }

    /// Restore the configured initial charge.
    pub fn reset(&mut self) {
        let pct = self.config.initial_percentage.clamp(0.0, 100.0);
        self.remaining_mah = self.config.capacity_mah * pct / 100.0;
        self.low_reported = pct < self.config.low_threshold;
    }

    pub fn percentage(&self) -> f32 {
        if self.config.capacity_mah <= 0.0 {
            return 0.0;
        }
        (self.remaining_mah / self.config.capacity_mah * 100.0).clamp(0.0, 100.0)
    }

    /// Present draw in mA.
    pub fn current_draw(&self, motors: &MotorState, led: &LedState) -> f32 {
        let pwm = motors.left_pwm.unsigned_abs() as f32 + motors.right_pwm.unsigned_abs() as f32;
        self.config.idle_ma + pwm * self.config.motor_ma_per_pwm + led.brightness() * self.config.led_ma_full
    }

    /// Drain for `dt` seconds. The flag is true exactly once, on the update
    /// that first drops below the low threshold.
    pub fn update(&mut self, motors: &MotorState, led: &LedState, dt: f32) -> (BatteryState, bool) {
        let current = self.current_draw(motors, led);
        let used = current * dt.max(0.0) / 3600.0;
        self.remaining_mah = (self.remaining_mah - used).max(0.0);

        let percentage = self.percentage();
        let crossed_low = !self.low_reported && percentage < self.config.low_threshold;
        if crossed_low {
            self.low_reported = true;
        }

        let state = BatteryState {
            voltage: voltage_for(percentage),
            percentage,
            charging: false,
            current,
        };
        (state, crossed_low)
    }

    /// Snapshot without draining.
    pub fn state(&self) -> BatteryState {
        let percentage = self.percentage();
        BatteryState {
            voltage: voltage_for(percentage),
            percentage,
            charging: false,
            current: 0.0,
        }
    }
}

/// Open-circuit voltage for a charge percentage.
pub fn voltage_for(percentage: f32) -> f32 {
    let p = percentage.clamp(0.0, 100.0);
    for pair in DISCHARGE_CURVE.windows(2) {
        let (p0, v0) = pair[0];
        let (p1, v1) = pair[1];
        if p <= p1 {
            return v0 + (v1 - v0) * (p - p0) / (p1 - p0);
        }
    }
    DISCHARGE_CURVE[DISCHARGE_CURVE.len() - 1].1
}
