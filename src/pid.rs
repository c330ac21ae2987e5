// src/pid.rs

//! # PID Control Module
//!
//! Cascaded angle/rate control law. Roll and pitch run a rate PID with an
//! optional angle-assist blend in front of it, a filtered derivative on the
//! measured rate with D-min boost, iterm relax and feedforward. Yaw runs a
//! rate PID with a low-passed P term and a windup point instead of a
//! derivative.
//!
//! The per-axis P, I and D terms are produced by `piddiy` controllers driven
//! by [`compute_rate`]; everything that shapes their inputs lives in
//! [`AnglePid`].

pub mod angle;
pub use angle::*;
pub mod rate;
pub use rate::*;

/// Bound on each axis integrator, in output units.
pub const ITERM_LIMIT: f32 = 400.0;
/// Iterm relax setpoint low-pass cutoff.
pub const ITERM_RELAX_CUTOFF_HZ: f32 = 15.0;
/// High-passed setpoint rate at which integration stops completely.
pub const ITERM_RELAX_SETPOINT_THRESHOLD: f32 = 40.0;
/// Yaw integration slows down above this fraction of [`ITERM_LIMIT`].
pub const ITERM_WINDUP_POINT: f32 = 0.85;
/// Second D-term low-pass cutoff.
pub const DTERM_LPF2_HZ: f32 = 150.0;
/// Yaw P-term low-pass cutoff.
pub const YAW_LOWPASS_HZ: f32 = 100.0;
/// D-min gain.
pub const D_MIN_GAIN: f32 = 37.0;
/// D-min setpoint advance.
pub const D_MIN_ADVANCE: f32 = 20.0;
/// PT2 cutoff shaping the gyro input of the D-min boost.
pub const D_MIN_RANGE_HZ: f32 = 85.0;
/// PT2 cutoff smoothing the D-min factor.
pub const D_MIN_LOWPASS_HZ: f32 = 35.0;
/// Scale of both D-min gain factors.
pub const D_MIN_GAIN_FACTOR: f32 = 0.00008;
/// Feedforward clamps engage within this fraction of the maximum rate.
pub const FEEDFORWARD_MAX_RATE_LIMIT: f32 = 0.9;
/// Maximum level-mode inclination, degrees.
pub const LEVEL_ANGLE_LIMIT: f32 = 45.0;
/// Minimum time between dynamic D-term low-pass updates.
pub const DYN_LPF_THROTTLE_UPDATE_DELAY_US: i32 = 5000;
/// Throttle quantization for dynamic D-term low-pass updates.
pub const DYN_LPF_THROTTLE_STEPS: f32 = 100.0;

/// Gains and filter settings for [`AnglePid`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PidConfig {
    /// Rate proportional gain.
    pub kp: f32,
    /// Rate integral gain.
    pub ki: f32,
    /// Rate derivative gain.
    pub kd: f32,
    /// Feedforward gain.
    pub kf: f32,
    /// Angle-assist gain. Zero disables leveling.
    pub k_level: f32,
    /// Derivative gain at rest. D-min is off unless `0 < d_min < kd`.
    pub d_min: f32,
    /// Roll and pitch acceleration limit, hundreds of deg/s². Zero disables.
    pub rate_accel_limit: u16,
    /// Yaw acceleration limit, hundreds of deg/s². Zero disables.
    pub yaw_rate_accel_limit: u16,
    /// Dynamic D-term low-pass cutoff at zero throttle.
    pub dyn_lpf_min_hz: u16,
    /// Dynamic D-term low-pass cutoff at full throttle.
    pub dyn_lpf_max_hz: u16,
    /// Dynamic D-term low-pass curve expo, tenths.
    pub dyn_lpf_curve_expo: u8,
}

impl PidConfig {
    /// Creates a configuration with tuned defaults for a 5" quad.
    ///
    /// Example Usage
    /// ```
    /// use free_flight_core::pid::{AnglePid, PidConfig};
    ///
    /// let mut config = PidConfig::new();
    ///
    /// // Enable angle assist.
    /// config.k_level = 3.0;
    ///
    /// // Disable the derivative boost.
    /// config.d_min = 0.0;
    ///
    /// // Build the controller for an 8 kHz loop and a 670 deg/s stick.
    /// let pid = AnglePid::new(config, 670.0, 1.0 / 8000.0);
    /// assert_eq!(pid.dyn_lpf_cutoff_hz(), 75.0);
    /// ```
    pub fn new() -> Self {
        Self {
            kp: 1.441305,
            ki: 19.55048,
            kd: 0.021160,
            kf: 0.0165048,
            k_level: 0.0,
            d_min: 0.013,
            rate_accel_limit: 0,
            yaw_rate_accel_limit: 0,
            dyn_lpf_min_hz: 75,
            dyn_lpf_max_hz: 150,
            dyn_lpf_curve_expo: 5,
        }
    }

    /// Fraction of `kd` applied at rest, or zero when D-min is off.
    pub fn d_min_percent(&self) -> f32 {
        if self.d_min > 0.0 && self.d_min < self.kd {
            self.d_min / self.kd
        } else {
            0.0
        }
    }
}

impl Default for PidConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Contributions to one axis output in the last update.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PidTerms {
    /// Proportional term.
    pub p: f32,
    /// Integral term.
    pub i: f32,
    /// Derivative term, D-min factor applied.
    pub d: f32,
    /// Feedforward term.
    pub f: f32,
    /// D-min factor used for `d`; 1 when D-min is off.
    pub d_min_factor: f32,
}

impl PidTerms {
    /// Axis output.
    pub fn sum(&self) -> f32 {
        self.p + self.i + self.d + self.f
    }
}
