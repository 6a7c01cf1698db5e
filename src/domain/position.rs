//! Pulse-integrated position estimate
//!
//! The bed never reports where it is. Each actuator's position is a host-side
//! percentage rebuilt from the pulses we have sent, assuming flat on startup.

use crate::domain::models::Direction;

pub const MIN_POSITION: f64 = 0.0;
pub const MAX_POSITION: f64 = 100.0;

/// Clamp to [0, 100]. NaN collapses to 0.
pub fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        return MIN_POSITION;
    }
    value.clamp(MIN_POSITION, MAX_POSITION)
}

/// Round to two decimal digits so displayed state stays stable.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Estimated extension of one actuator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActuatorEstimate {
    position: f64,
    step: f64,
}

impl ActuatorEstimate {
    pub fn new(step: f64) -> Self {
        Self {
            position: MIN_POSITION,
            step,
        }
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    /// Account for one pulse sent in `direction`.
    pub fn apply_pulse(&mut self, direction: Direction) -> f64 {
        self.position = round2(clamp_percent(self.position + direction.sign() * self.step));
        self.position
    }

    /// Pulses needed to travel `percent`, rounded up.
    pub fn pulses_for(&self, percent: f64) -> u32 {
        if !(percent > 0.0) {
            return 0;
        }
        // Absorb float noise so an exact multiple of the step is not rounded up.
        (percent / self.step - 1e-9).ceil() as u32
    }

    pub fn within(&self, target: f64, tolerance: f64) -> bool {
        (self.position - target).abs() <= tolerance
    }
}
