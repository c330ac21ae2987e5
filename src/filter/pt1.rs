// src/filter/pt1.rs

//! First-order low-pass filter.

use super::{pt_gain, LowPass};

/// Gain for a single-pole filter.
pub fn pt1_gain(cutoff_hz: f32, dt: f32) -> f32 {
    pt_gain(1, cutoff_hz, dt)
}

/// Single-pole low-pass filter.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pt1Filter {
    state: f32,
    k: f32,
}

impl Pt1Filter {
    /// Creates a filter with gain `k` and zero state.
    pub const fn new(k: f32) -> Self {
        Self { state: 0.0, k }
    }

    /// Creates a filter for `cutoff_hz` at sample period `dt`.
    pub fn with_cutoff(cutoff_hz: f32, dt: f32) -> Self {
        Self::new(pt1_gain(cutoff_hz, dt))
    }

    /// Retunes the cutoff without touching the state.
    pub fn update_cutoff(&mut self, cutoff_hz: f32, dt: f32) {
        self.k = pt1_gain(cutoff_hz, dt);
    }

    /// Current gain.
    pub fn gain(&self) -> f32 {
        self.k
    }
}

impl LowPass for Pt1Filter {
    fn apply(&mut self, input: f32) -> f32 {
        self.state += self.k * (input - self.state);
        self.state
    }

    fn set_gain(&mut self, k: f32) {
        self.k = k;
    }

    fn output(&self) -> f32 {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    #[test]
    fn test_pt1_first_step() {
        let mut filter = Pt1Filter::new(0.25);
        assert!(value_close(0.25, filter.apply(1.0)));
        assert!(value_close(0.4375, filter.apply(1.0)));
    }

    /// A retune changes the gain but not the output history.
    #[test]
    fn test_pt1_update_cutoff_keeps_state() {
        let dt = 0.001;
        let mut filter = Pt1Filter::with_cutoff(10.0, dt);
        for _ in 0..50 {
            filter.apply(2.0);
        }
        let before = filter.output();
        filter.update_cutoff(80.0, dt);
        assert!(value_close(before, filter.output()));
        assert!(filter.gain() > pt1_gain(10.0, dt));
    }

    #[test]
    fn test_pt1_converges() {
        let mut filter = Pt1Filter::with_cutoff(50.0, 0.001);
        for _ in 0..1000 {
            filter.apply(-3.0);
        }
        assert!(value_close(-3.0, filter.output()));
    }
}
