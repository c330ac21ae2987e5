// src/receiver/rates.rs

//! Stick-to-setpoint conversion: the rate curve for roll, pitch and yaw and
//! the throttle lookup table.

use super::channels::{PWM_CENTER, PWM_MAX, PWM_MIN};
use num_traits::Float;

/// Stick deflection, in pulse units, that maps to full command.
pub const COMMAND_DIVIDER: f32 = 500.0;

/// Signed stick deflection from center, limited to ±500. Yaw uses
/// `sign = -1.0`.
pub fn stick_command(raw: f32, sign: f32) -> f32 {
    let command = (raw - PWM_CENTER).abs().min(COMMAND_DIVIDER) * sign;
    if raw < PWM_CENTER {
        -command
    } else {
        command
    }
}

/// Expo rate curve mapping stick deflection to a rate setpoint in degrees
/// per second.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RateCurve {
    /// Quintic expo blend, percent.
    pub rc_expo: u8,
    /// Center sensitivity, tens of degrees per second.
    pub rc_rate: u8,
    /// Full-deflection rate, tens of degrees per second.
    pub rate: u8,
    /// Hard limit on the resulting setpoint.
    pub rate_limit: f32,
}

impl RateCurve {
    /// Linear curve topping out at 670 deg/s.
    pub fn new() -> Self {
        Self {
            rc_expo: 0,
            rc_rate: 7,
            rate: 67,
            rate_limit: 1998.0,
        }
    }

    /// Maps normalized deflection `commandf` in `[-1, 1]` through the curve.
    pub fn apply_rates(&self, commandf: f32) -> f32 {
        let expo = self.rc_expo as f32 / 100.0;
        let expof = commandf.abs() * (commandf.powi(5) * expo + commandf * (1.0 - expo));
        let center_sensitivity = self.rc_rate as f32 * 10.0;
        let stick_movement = (self.rate as f32 * 10.0 - center_sensitivity).max(0.0);
        commandf * center_sensitivity + stick_movement * expof
    }

    /// Setpoint for a stick command in `[-500, 500]`, limited to the rate
    /// limit.
    pub fn setpoint(&self, command: f32) -> f32 {
        self.apply_rates(command / COMMAND_DIVIDER)
            .clamp(-self.rate_limit, self.rate_limit)
    }

    /// Setpoint at full deflection.
    pub fn max_rate(&self) -> f32 {
        self.apply_rates(1.0)
    }
}

impl Default for RateCurve {
    fn default() -> Self {
        Self::new()
    }
}

const THROTTLE_TABLE_SIZE: usize = 12;

/// Throttle stick shaping, built once from a mid point and expo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleTable {
    lookup: [i32; THROTTLE_TABLE_SIZE],
}

impl ThrottleTable {
    /// Lowest throttle pulse that moves the command off zero.
    pub const THROTTLE_LOW: f32 = 1050.0;

    /// Builds the table. `mid` and `expo` are percentages; 50/0 is linear.
    pub fn new(mid: u8, expo: u8) -> Self {
        let mid = mid as f32;
        let expo = expo as f32;
        let mut lookup = [0; THROTTLE_TABLE_SIZE];
        for (i, entry) in lookup.iter_mut().enumerate() {
            let tmp = 10.0 * i as f32 - mid;
            let y = if tmp > 0.0 {
                100.0 - mid
            } else if tmp < 0.0 {
                mid
            } else {
                1.0
            };
            let shaped =
                (10.0 * mid + tmp * (100.0 - expo + expo * (tmp * tmp) / (y * y)) / 10.0) as i32;
            *entry = PWM_MIN as i32 + (PWM_MAX - PWM_MIN) as i32 * shaped / 1000;
        }
        Self { lookup }
    }

    /// Maps a throttle pulse to a shaped pulse in 1000..2000.
    pub fn apply(&self, raw: f32) -> f32 {
        let low = Self::THROTTLE_LOW as i32;
        let max = PWM_MAX as i32;
        let pulse = (raw as i32).clamp(low, max);
        let scaled = (pulse - low) * (PWM_MIN as i32) / (max - low);

        let index = ((scaled / 100) as usize).min(THROTTLE_TABLE_SIZE - 2);
        let base = self.lookup[index];
        let next = self.lookup[index + 1];
        (base + (scaled - index as i32 * 100) * (next - base) / 100) as f32
    }
}

impl Default for ThrottleTable {
    fn default() -> Self {
        Self::new(50, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    #[test]
    fn test_stick_command() {
        assert!(value_close(0.0, stick_command(1500.0, 1.0)));
        assert!(value_close(500.0, stick_command(2000.0, 1.0)));
        assert!(value_close(500.0, stick_command(2200.0, 1.0)));
        assert!(value_close(-250.0, stick_command(1250.0, 1.0)));
        assert!(value_close(-500.0, stick_command(2000.0, -1.0)));
    }

    /// The default curve is linear from 0 to 670 deg/s.
    #[test]
    fn test_rate_curve_defaults() {
        let curve = RateCurve::new();
        assert!(value_close(0.0, curve.apply_rates(0.0)));
        assert!(value_close(670.0, curve.max_rate()));
        assert!(value_close(-670.0, curve.setpoint(-500.0)));
        assert!(value_close(335.0, curve.setpoint(250.0)));
    }

    /// Expo softens the center without changing the endpoints.
    #[test]
    fn test_rate_curve_expo() {
        let curve = RateCurve {
            rc_expo: 50,
            ..RateCurve::new()
        };
        assert!(value_close(670.0, curve.apply_rates(1.0)));
        assert!(curve.apply_rates(0.5) < RateCurve::new().apply_rates(0.5));
        assert!(value_close(-curve.apply_rates(0.3), curve.apply_rates(-0.3)));
    }

    #[test]
    fn test_rate_curve_limit() {
        let curve = RateCurve {
            rate: 255,
            rate_limit: 1998.0,
            ..RateCurve::new()
        };
        assert!(value_close(1998.0, curve.setpoint(500.0)));
    }

    /// The linear table maps 1050..2000 onto 1000..2000.
    #[test]
    fn test_throttle_table_linear() {
        let table = ThrottleTable::default();
        assert!(value_close(1000.0, table.apply(900.0)));
        assert!(value_close(1000.0, table.apply(1050.0)));
        assert!(value_close(2000.0, table.apply(2000.0)));
        assert!(value_close(2000.0, table.apply(2100.0)));
        assert!(value_close(1500.0, table.apply(1525.0)));
    }

    #[test]
    fn test_throttle_table_monotonic_with_expo() {
        let table = ThrottleTable::new(40, 60);
        let mut previous = table.apply(1000.0);
        let mut pulse = 1000.0;
        while pulse <= 2000.0 {
            let value = table.apply(pulse);
            assert!(value >= previous, "Throttle table should not decrease.");
            previous = value;
            pulse += 5.0;
        }
    }
}
