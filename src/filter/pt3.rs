// src/filter/pt3.rs

//! Third-order low-pass filter, used for stick smoothing and the
//! feedforward setpoint.

use super::{pt_gain, LowPass};

/// Per-stage gain for a three-pole cascade.
pub fn pt3_gain(cutoff_hz: f32, dt: f32) -> f32 {
    pt_gain(3, cutoff_hz, dt)
}

/// Three cascaded single-pole stages.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pt3Filter {
    state: f32,
    state1: f32,
    state2: f32,
    k: f32,
}

impl Pt3Filter {
    /// Creates a filter with gain `k` and zero state.
    pub const fn new(k: f32) -> Self {
        Self {
            state: 0.0,
            state1: 0.0,
            state2: 0.0,
            k,
        }
    }

    /// Creates a filter for `cutoff_hz` at sample period `dt`.
    pub fn with_cutoff(cutoff_hz: f32, dt: f32) -> Self {
        Self::new(pt3_gain(cutoff_hz, dt))
    }

    /// Retunes the cutoff without touching the state.
    pub fn update_cutoff(&mut self, cutoff_hz: f32, dt: f32) {
        self.k = pt3_gain(cutoff_hz, dt);
    }

    /// Current gain.
    pub fn gain(&self) -> f32 {
        self.k
    }
}

impl LowPass for Pt3Filter {
    fn apply(&mut self, input: f32) -> f32 {
        self.state1 += self.k * (input - self.state1);
        self.state2 += self.k * (self.state1 - self.state2);
        self.state += self.k * (self.state2 - self.state);
        self.state
    }

    fn set_gain(&mut self, k: f32) {
        self.k = k;
    }

    fn output(&self) -> f32 {
        self.state
    }
}
