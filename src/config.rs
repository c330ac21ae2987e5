// src/config.rs

//! # Flight Configuration
//!
//! [`FlightConfig`] gathers every component configuration and the motor
//! geometry, and checks them together before the core starts.

use crate::arming::ArmingConfig;
use crate::error::ConfigError;
use crate::failsafe::FailsafeConfig;
use crate::mixer::{Mixer, MotorConfig, MAX_MOTORS, QUAD_X};
use crate::pid::PidConfig;
use crate::receiver::{ReceiverConfig, CHANNEL_COUNT};
use crate::scheduler::{SchedulerConfig, TaskId};
use crate::stats::GyroConfig;

/// Complete flight core configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlightConfig {
    /// Task rates.
    pub scheduler: SchedulerConfig,
    /// Receiver pipeline settings.
    pub receiver: ReceiverConfig,
    /// Arming checks.
    pub arming: ArmingConfig,
    /// Link-loss timing.
    pub failsafe: FailsafeConfig,
    /// Control law gains.
    pub pid: PidConfig,
    /// Motor output range.
    pub motors: MotorConfig,
    /// Gyro calibration.
    pub gyro: GyroConfig,
    /// Roll, pitch and yaw contribution of each motor.
    pub spins: [[f32; 3]; MAX_MOTORS],
    /// Number of entries of `spins` in use.
    pub motor_count: usize,
}

impl FlightConfig {
    /// Creates a quad-X configuration with tuned defaults.
    ///
    /// Example Usage
    /// ```
    /// use free_flight_core::config::FlightConfig;
    ///
    /// let mut config = FlightConfig::new();
    ///
    /// // Run the control loop at 4 kHz.
    /// config.scheduler.core_rate_hz = 4000;
    ///
    /// // Softer rate gains.
    /// config.pid.kp = 1.2;
    /// config.pid.ki = 16.0;
    ///
    /// // Keep the props spinning at zero throttle while armed.
    /// config.motors.airmode = true;
    ///
    /// assert!(config.validate().is_ok());
    /// assert_eq!(config.motor_spins().len(), 4);
    /// ```
    pub fn new() -> Self {
        let mut spins = [[0.0; 3]; MAX_MOTORS];
        spins[..QUAD_X.len()].copy_from_slice(&QUAD_X);
        Self {
            scheduler: SchedulerConfig::new(),
            receiver: ReceiverConfig::new(),
            arming: ArmingConfig::new(),
            failsafe: FailsafeConfig::new(),
            pid: PidConfig::new(),
            motors: MotorConfig::new(),
            gyro: GyroConfig::new(),
            spins,
            motor_count: QUAD_X.len(),
        }
    }

    /// Replaces the motor geometry.
    pub fn with_spins(mut self, spins: &[[f32; 3]]) -> Result<Self, ConfigError> {
        if spins.is_empty() || spins.len() > MAX_MOTORS {
            return Err(ConfigError::MotorCount {
                count: spins.len(),
                max: MAX_MOTORS,
            });
        }
        self.spins = [[0.0; 3]; MAX_MOTORS];
        self.spins[..spins.len()].copy_from_slice(spins);
        self.motor_count = spins.len();
        Ok(self)
    }

    /// Spin vectors of the motors in use.
    pub fn motor_spins(&self) -> &[[f32; 3]] {
        &self.spins[..self.motor_count.min(MAX_MOTORS)]
    }

    /// Checks every startup invariant that does not depend on the board.
    /// The core rate is checked against the cycle counter when the
    /// scheduler is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.core_rate_hz == 0 {
            return Err(ConfigError::ControlPeriod);
        }
        if TaskId::ALL
            .iter()
            .any(|&id| self.scheduler.task_rate_hz(id) == 0)
        {
            return Err(ConfigError::TaskRate);
        }

        for (channel, range) in self.receiver.ranges.iter().enumerate() {
            if range.min >= range.max {
                return Err(ConfigError::ChannelRange {
                    channel,
                    min: range.min,
                    max: range.max,
                });
            }
        }

        for channel in [self.arming.switch_channel, self.failsafe.switch_channel] {
            if channel >= CHANNEL_COUNT {
                return Err(ConfigError::SwitchChannel {
                    channel,
                    count: CHANNEL_COUNT,
                });
            }
        }

        if self.pid.dyn_lpf_min_hz > self.pid.dyn_lpf_max_hz {
            return Err(ConfigError::DynamicLowpass {
                min: self.pid.dyn_lpf_min_hz,
                max: self.pid.dyn_lpf_max_hz,
            });
        }

        if self.motor_count == 0 || self.motor_count > MAX_MOTORS {
            return Err(ConfigError::MotorCount {
                count: self.motor_count,
                max: MAX_MOTORS,
            });
        }
        Mixer::new(self.motor_spins(), self.motors).map(|_| ())
    }
}

impl Default for FlightConfig {
    fn default() -> Self {
        Self::new()
    }
}
