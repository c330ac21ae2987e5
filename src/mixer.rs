// src/mixer.rs

//! # Mixer Module
//!
//! Maps constrained roll, pitch and yaw demands plus throttle onto motor
//! outputs. Each motor has a spin vector giving its roll, pitch and yaw
//! contribution.
//!
//! Attitude takes priority over throttle:
//!
//! - the attitude mix is scaled down when its spread across motors exceeds
//!   the usable output span, so no motor saturates on attitude alone;
//! - throttle is then fitted into the headroom the mix leaves.
//!
//! Outputs are finally mapped into the motor range `[low, high]`. During
//! failsafe, outputs that would fall below `low` are sent as the dedicated
//! disarmed value instead.

use crate::error::ConfigError;
use crate::state::Demands;

/// Largest supported motor count.
pub const MAX_MOTORS: usize = 8;

/// Quad-X spin vectors: rear right, front right, rear left, front left.
pub const QUAD_X: [[f32; 3]; 4] = [
    [-1.0, 1.0, -1.0],
    [-1.0, -1.0, 1.0],
    [1.0, 1.0, 1.0],
    [1.0, -1.0, -1.0],
];

/// Motor output range settings.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MotorConfig {
    /// Output at zero mix, motors idling.
    pub low: f32,
    /// Output at full mix.
    pub high: f32,
    /// Output sent while disarmed.
    pub disarmed: f32,
    /// Lets throttle drop below the mix floor to keep authority at low
    /// throttle.
    pub airmode: bool,
}

impl MotorConfig {
    /// Normalized outputs with a 5.5% idle.
    pub fn new() -> Self {
        Self {
            low: 0.055,
            high: 1.0,
            disarmed: 0.0,
            airmode: false,
        }
    }

    /// Checks the range invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.low < self.high) {
            return Err(ConfigError::MotorRange {
                low: self.low,
                high: self.high,
            });
        }
        if self.disarmed > self.low {
            return Err(ConfigError::DisarmedAboveLow {
                disarmed: self.disarmed,
                low: self.low,
            });
        }
        Ok(())
    }
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Motor geometry and output range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mixer {
    spins: [[f32; 3]; MAX_MOTORS],
    count: usize,
    config: MotorConfig,
}

impl Mixer {
    /// Creates a mixer for the motors described by `spins`.
    pub fn new(spins: &[[f32; 3]], config: MotorConfig) -> Result<Self, ConfigError> {
        if spins.is_empty() || spins.len() > MAX_MOTORS {
            return Err(ConfigError::MotorCount {
                count: spins.len(),
                max: MAX_MOTORS,
            });
        }
        if let Some(motor) = spins
            .iter()
            .position(|spin| spin.iter().any(|c| !c.is_finite()))
        {
            return Err(ConfigError::NonFiniteSpin { motor });
        }
        config.validate()?;

        let mut table = [[0.0; 3]; MAX_MOTORS];
        table[..spins.len()].copy_from_slice(spins);

        Ok(Self {
            spins: table,
            count: spins.len(),
            config,
        })
    }

    /// Number of motors.
    pub fn motor_count(&self) -> usize {
        self.count
    }

    /// Output range settings.
    pub fn config(&self) -> &MotorConfig {
        &self.config
    }

    /// Outputs for a disarmed vehicle.
    pub fn safe_outputs(&self) -> [f32; MAX_MOTORS] {
        [self.config.disarmed; MAX_MOTORS]
    }

    /// Computes motor outputs. Roll, pitch and yaw are normalized mixer
    /// inputs; throttle is in `[0, 1]`. Entries past the motor count hold
    /// the disarmed value.
    pub fn run(&self, demands: &Demands, failsafe: bool) -> [f32; MAX_MOTORS] {
        let mut mix = [0.0; MAX_MOTORS];
        let mut mix_max = f32::MIN;
        let mut mix_min = f32::MAX;

        for (value, spin) in mix.iter_mut().zip(&self.spins).take(self.count) {
            *value = demands.roll * spin[0] + demands.pitch * spin[1] + demands.yaw * spin[2];
            mix_max = mix_max.max(*value);
            mix_min = mix_min.min(*value);
        }

        let range = mix_max - mix_min;
        if range > 1.0 {
            for value in mix.iter_mut().take(self.count) {
                *value /= range;
            }
            mix_max /= range;
            mix_min /= range;
        }

        let mut throttle = demands.throttle.min(1.0 - mix_max);
        if self.config.airmode {
            throttle = throttle.max(-mix_min);
        }

        let MotorConfig {
            low,
            high,
            disarmed,
            ..
        } = self.config;

        let mut outputs = self.safe_outputs();
        for (output, value) in outputs.iter_mut().zip(&mix).take(self.count) {
            let motor = low + (high - low) * (value + throttle);
            *output = if failsafe {
                if motor < low {
                    disarmed
                } else {
                    motor.min(high)
                }
            } else {
                motor.clamp(low, high)
            };
        }
        outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    fn unit_config() -> MotorConfig {
        MotorConfig {
            low: 0.0,
            high: 1.0,
            disarmed: 0.0,
            airmode: false,
        }
    }

    /// Zero attitude demand gives every motor the same throttle map,
    /// whatever the geometry.
    #[test]
    fn test_symmetric_mix() {
        let hex = [
            [-1.0, 0.0, 1.0],
            [1.0, 0.0, -1.0],
            [0.5, -0.866, 1.0],
            [-0.5, 0.866, -1.0],
            [-0.5, -0.866, -1.0],
            [0.5, 0.866, 1.0],
        ];
        let config = MotorConfig::new();
        for spins in [&QUAD_X[..], &hex[..], &QUAD_X[..1]] {
            let mixer = Mixer::new(spins, config).unwrap();
            for throttle in [0.0, 0.3, 0.75, 1.0] {
                let outputs = mixer.run(&Demands::new(throttle, 0.0, 0.0, 0.0), false);
                let expected = config.low + (config.high - config.low) * throttle;
                for output in &outputs[..spins.len()] {
                    assert!(value_close(expected, *output));
                }
            }
        }
    }

    #[test]
    fn test_quad_x_roll() {
        let mixer = Mixer::new(&QUAD_X, unit_config()).unwrap();
        let outputs = mixer.run(&Demands::new(0.5, 0.1, 0.0, 0.0), false);
        // right motors slow down, left motors speed up
        assert!(value_close(0.4, outputs[0]));
        assert!(value_close(0.4, outputs[1]));
        assert!(value_close(0.6, outputs[2]));
        assert!(value_close(0.6, outputs[3]));
    }

    /// A mix wider than the output span is scaled down to fit.
    #[test]
    fn test_mix_scaled_to_span() {
        let mixer = Mixer::new(&QUAD_X, unit_config()).unwrap();
        let outputs = mixer.run(&Demands::new(0.5, 0.5, 0.5, 0.0), false);
        // raw mix spans [-1, 1]; scaled to [-0.5, 0.5]
        assert!(value_close(0.0, outputs[1]));
        assert!(value_close(1.0, outputs[2]));
        assert!(value_close(0.5, outputs[0]));
        assert!(value_close(0.5, outputs[3]));
    }

    /// Throttle gives way to attitude at the top of the range.
    #[test]
    fn test_throttle_limited_by_headroom() {
        let mixer = Mixer::new(&QUAD_X, unit_config()).unwrap();
        let outputs = mixer.run(&Demands::new(1.0, 0.1, 0.0, 0.0), false);
        assert!(value_close(0.8, outputs[0]));
        assert!(value_close(1.0, outputs[2]));
    }

    /// Airmode lifts throttle so attitude authority survives zero throttle.
    #[test]
    fn test_airmode_floor() {
        let mut config = unit_config();
        let plain = Mixer::new(&QUAD_X, config).unwrap();
        let outputs = plain.run(&Demands::new(0.0, 0.1, 0.0, 0.0), false);
        assert!(value_close(0.0, outputs[0]));
        assert!(value_close(0.1, outputs[2]));

        config.airmode = true;
        let air = Mixer::new(&QUAD_X, config).unwrap();
        let outputs = air.run(&Demands::new(0.0, 0.1, 0.0, 0.0), false);
        assert!(value_close(0.0, outputs[0]));
        assert!(value_close(0.2, outputs[2]));
    }

    /// In failsafe, outputs below low become the disarmed value.
    #[test]
    fn test_failsafe_snaps_to_disarmed() {
        let config = MotorConfig {
            low: 0.1,
            high: 1.0,
            disarmed: 0.0,
            airmode: false,
        };
        let mixer = Mixer::new(&QUAD_X, config).unwrap();
        let demands = Demands::new(0.0, 0.1, 0.0, 0.0);

        let normal = mixer.run(&demands, false);
        assert!(value_close(0.1, normal[0]));

        let failsafe = mixer.run(&demands, true);
        assert!(value_close(0.0, failsafe[0]));
        assert!(value_close(0.19, failsafe[2]));
    }

    #[test]
    fn test_unused_motors_hold_disarmed() {
        let mixer = Mixer::new(&QUAD_X, MotorConfig::new()).unwrap();
        let outputs = mixer.run(&Demands::new(0.5, 0.0, 0.0, 0.0), false);
        assert!(outputs[4..].iter().all(|&o| value_close(0.0, o)));
        assert_eq!(mixer.motor_count(), 4);
    }

    #[test]
    fn test_invalid_geometry_rejected() {
        assert_eq!(
            Mixer::new(&[], MotorConfig::new()),
            Err(ConfigError::MotorCount { count: 0, max: 8 })
        );
        assert_eq!(
            Mixer::new(&[[0.0; 3]; 9], MotorConfig::new()),
            Err(ConfigError::MotorCount { count: 9, max: 8 })
        );
        assert_eq!(
            Mixer::new(&[[0.0; 3], [f32::NAN, 0.0, 0.0]], MotorConfig::new()),
            Err(ConfigError::NonFiniteSpin { motor: 1 })
        );

        let mut config = MotorConfig::new();
        config.disarmed = 0.5;
        assert!(matches!(
            Mixer::new(&QUAD_X, config),
            Err(ConfigError::DisarmedAboveLow { .. })
        ));
        config.disarmed = 0.0;
        config.high = config.low;
        assert!(matches!(
            Mixer::new(&QUAD_X, config),
            Err(ConfigError::MotorRange { .. })
        ));
    }
}
