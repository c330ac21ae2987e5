// src/error.rs

//! # Error Module
//!
//! Startup-time configuration errors. The per-cycle path never fails; a
//! configuration that would make it misbehave is rejected here instead,
//! before the first control step runs.

use thiserror::Error;

/// Reasons a configuration is rejected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ConfigError {
    /// The motor table is empty or larger than the supported maximum.
    #[error("motor count {count} outside 1..={max}")]
    MotorCount {
        /// Number of motors supplied.
        count: usize,
        /// Largest supported motor count.
        max: usize,
    },
    /// A spin vector component is NaN or infinite.
    #[error("motor {motor} has a non-finite spin vector")]
    NonFiniteSpin {
        /// Index of the offending motor.
        motor: usize,
    },
    /// The motor output range is empty or inverted.
    #[error("motor range low {low} must be below high {high}")]
    MotorRange {
        /// Low end of the usable output range.
        low: f32,
        /// High end of the usable output range.
        high: f32,
    },
    /// The disarmed output value lies above the usable range.
    #[error("disarmed value {disarmed} above motor low {low}")]
    DisarmedAboveLow {
        /// Configured disarmed value.
        disarmed: f32,
        /// Low end of the usable output range.
        low: f32,
    },
    /// The core rate is zero or too fast for the cycle counter.
    #[error("core rate {rate_hz} Hz unusable with a {cycles_per_second} Hz cycle counter")]
    CoreRate {
        /// Requested core task rate.
        rate_hz: u32,
        /// Cycle counter frequency.
        cycles_per_second: u32,
    },
    /// A dynamic task was configured with a zero rate.
    #[error("task rate must be non-zero")]
    TaskRate,
    /// A receiver channel calibration range is empty or inverted.
    #[error("channel {channel} range min {min} must be below max {max}")]
    ChannelRange {
        /// Channel index.
        channel: usize,
        /// Configured minimum pulse.
        min: u16,
        /// Configured maximum pulse.
        max: u16,
    },
    /// Dynamic D-term low-pass minimum cutoff exceeds its maximum.
    #[error("dynamic low-pass min {min} Hz above max {max} Hz")]
    DynamicLowpass {
        /// Minimum cutoff.
        min: u16,
        /// Maximum cutoff.
        max: u16,
    },
    /// An arm or failsafe switch is mapped past the last receiver channel.
    #[error("switch channel {channel} outside 0..{count}")]
    SwitchChannel {
        /// Configured channel index.
        channel: usize,
        /// Number of receiver channels.
        count: usize,
    },
    /// The control period derived from the core rate is zero or negative.
    #[error("control period must be positive")]
    ControlPeriod,
}
