// src/filter.rs

//! # Low-Pass Filter Module
//!
//! First, second and third order low-pass filters built from cascaded
//! first-order stages. Every filter stores a single gain `k` in `[0, 1]`
//! which can be recomputed at runtime with `update_cutoff`; the stage states
//! are left untouched by a retune, so the output stays continuous.
//!
//! A higher-order cascade of identical stages has a lower -3 dB point than a
//! single stage with the same time constant. The gain functions correct the
//! time constant so that the requested cutoff is the cascade's cutoff.

use core::f32::consts::PI;
use num_traits::Float;

pub mod pt1;
pub use pt1::*;
pub mod pt2;
pub use pt2::*;
pub mod pt3;
pub use pt3::*;

/// Gain of one stage of an `order`-pole cascade with cutoff `cutoff_hz`,
/// sampled every `dt` seconds.
///
/// Returns 1.0 (pass-through) for a non-positive cutoff.
pub fn pt_gain(order: u8, cutoff_hz: f32, dt: f32) -> f32 {
    if cutoff_hz <= 0.0 {
        return 1.0;
    }
    let correction = if order > 1 {
        1.0 / (2.0f32.powf(1.0 / order as f32) - 1.0).sqrt()
    } else {
        1.0
    };
    let rc = 1.0 / (2.0 * correction * PI * cutoff_hz);
    dt / (rc + dt)
}

/// Common interface of the filters in this module.
pub trait LowPass {
    /// Filters one sample and returns the output.
    fn apply(&mut self, input: f32) -> f32;

    /// Replaces the gain, keeping the state.
    fn set_gain(&mut self, k: f32);

    /// Most recent output.
    fn output(&self) -> f32;
}
