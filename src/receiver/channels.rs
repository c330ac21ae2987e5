// src/receiver/channels.rs

//! Per-channel calibration and signal-loss substitution.

use super::{channel, CHANNEL_COUNT};

/// Low end of the normalized pulse range.
pub const PWM_MIN: f32 = 1000.0;
/// High end of the normalized pulse range.
pub const PWM_MAX: f32 = 2000.0;
/// Calibrated pulses are constrained to at least this.
pub const PULSE_MIN: f32 = 750.0;
/// Calibrated pulses are constrained to at most this.
pub const PULSE_MAX: f32 = 2250.0;
/// Shortest pulse accepted as a real stick position.
pub const VALID_PULSE_MIN: f32 = 885.0;
/// Longest pulse accepted as a real stick position.
pub const VALID_PULSE_MAX: f32 = 2115.0;
/// Stick center.
pub const PWM_CENTER: f32 = 1500.0;

/// True if `pulse` lies inside the valid window.
pub fn is_pulse_valid(pulse: f32) -> bool {
    (VALID_PULSE_MIN..=VALID_PULSE_MAX).contains(&pulse)
}

/// Endpoints of a flight channel as reported by the transmitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelRange {
    /// Pulse at full low stick.
    pub min: u16,
    /// Pulse at full high stick.
    pub max: u16,
}

impl ChannelRange {
    /// The nominal 1000..2000 range.
    pub const fn new() -> Self {
        Self {
            min: PWM_MIN as u16,
            max: PWM_MAX as u16,
        }
    }

    /// Rescales `sample` from this range onto 1000..2000 and constrains the
    /// result. A zero sample, meaning "no value", stays zero.
    pub fn apply(&self, sample: f32) -> f32 {
        if sample == 0.0 {
            return 0.0;
        }
        let (min, max) = (self.min as f32, self.max as f32);
        let scaled = (sample - min) * (PWM_MAX - PWM_MIN) / (max - min) + PWM_MIN;
        scaled.clamp(PULSE_MIN, PULSE_MAX)
    }
}

impl Default for ChannelRange {
    fn default() -> Self {
        Self::new()
    }
}

/// Value substituted on a channel whose pulses stay invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChannelFailsafe {
    /// Center for roll, pitch and yaw; minimum for everything else.
    #[default]
    Auto,
    /// Keep the last accepted value.
    Hold,
    /// A fixed pulse of `750 + 25 * step`.
    Set(u8),
}

impl ChannelFailsafe {
    /// Substitute for `channel`, whose last accepted value is `held`.
    pub fn value(&self, channel: usize, held: f32) -> f32 {
        match *self {
            ChannelFailsafe::Auto => match channel {
                channel::ROLL | channel::PITCH | channel::YAW => PWM_CENTER,
                _ => VALID_PULSE_MIN,
            },
            ChannelFailsafe::Hold => held,
            ChannelFailsafe::Set(step) => PULSE_MIN + 25.0 * step as f32,
        }
    }
}

/// Default substitution: flight channels automatic, aux channels held.
pub fn default_failsafe_modes() -> [ChannelFailsafe; CHANNEL_COUNT] {
    let mut modes = [ChannelFailsafe::Hold; CHANNEL_COUNT];
    modes[..channel::FLIGHT_CHANNELS].fill(ChannelFailsafe::Auto);
    modes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    #[test]
    fn test_pulse_window() {
        assert!(is_pulse_valid(885.0));
        assert!(is_pulse_valid(2115.0));
        assert!(!is_pulse_valid(884.0));
        assert!(!is_pulse_valid(2116.0));
        assert!(!is_pulse_valid(0.0));
    }

    /// A transmitter reporting 988..2011 is stretched onto 1000..2000.
    #[test]
    fn test_channel_range_rescale() {
        let range = ChannelRange { min: 988, max: 2011 };
        assert!(value_close(1000.0, range.apply(988.0)));
        assert!(value_close(2000.0, range.apply(2011.0)));
        assert!(value_close(0.0, range.apply(0.0)));
        assert!(value_close(PULSE_MAX, range.apply(4000.0)));
        assert!(value_close(PULSE_MIN, range.apply(100.0)));
    }

    #[test]
    fn test_failsafe_values() {
        assert!(value_close(1500.0, ChannelFailsafe::Auto.value(channel::YAW, 1800.0)));
        assert!(value_close(885.0, ChannelFailsafe::Auto.value(channel::THROTTLE, 1800.0)));
        assert!(value_close(1800.0, ChannelFailsafe::Hold.value(channel::AUX1, 1800.0)));
        assert!(value_close(1500.0, ChannelFailsafe::Set(30).value(channel::AUX2, 0.0)));
    }

    #[test]
    fn test_default_failsafe_modes() {
        let modes = default_failsafe_modes();
        assert_eq!(modes[channel::THROTTLE], ChannelFailsafe::Auto);
        assert_eq!(modes[channel::YAW], ChannelFailsafe::Auto);
        assert_eq!(modes[channel::AUX1], ChannelFailsafe::Hold);
        assert_eq!(modes[CHANNEL_COUNT - 1], ChannelFailsafe::Hold);
    }
}
