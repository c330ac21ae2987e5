// src/filter/pt2.rs

//! Second-order low-pass filter.

use super::{pt_gain, LowPass};

/// Per-stage gain for a two-pole cascade.
pub fn pt2_gain(cutoff_hz: f32, dt: f32) -> f32 {
    pt_gain(2, cutoff_hz, dt)
}

/// Two cascaded single-pole stages.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pt2Filter {
    state: f32,
    state1: f32,
    k: f32,
}

impl Pt2Filter {
    /// Creates a filter with gain `k` and zero state.
    pub const fn new(k: f32) -> Self {
        Self::seeded(k, 0.0)
    }

    /// Creates a filter whose stages start at `initial`, so a constant input
    /// equal to `initial` comes straight out.
    pub const fn seeded(k: f32, initial: f32) -> Self {
        Self {
            state: initial,
            state1: initial,
            k,
        }
    }

    /// Creates a filter for `cutoff_hz` at sample period `dt`.
    pub fn with_cutoff(cutoff_hz: f32, dt: f32) -> Self {
        Self::new(pt2_gain(cutoff_hz, dt))
    }

    /// Retunes the cutoff without touching the state.
    pub fn update_cutoff(&mut self, cutoff_hz: f32, dt: f32) {
        self.k = pt2_gain(cutoff_hz, dt);
    }
}

impl LowPass for Pt2Filter {
    fn apply(&mut self, input: f32) -> f32 {
        self.state1 += self.k * (input - self.state1);
        self.state += self.k * (self.state1 - self.state);
        self.state
    }

    fn set_gain(&mut self, k: f32) {
        self.k = k;
    }

    fn output(&self) -> f32 {
        self.state
    }
}
