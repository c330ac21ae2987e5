// src/state.rs

//! # Shared Per-Cycle Values
//!
//! The values that flow between stages of one control cycle: the four-axis
//! [`Demands`] and the estimated [`VehicleState`].

/// Throttle, roll, pitch and yaw requests.
///
/// Units depend on the stage. Out of the receiver, throttle is in `[0, 1]`
/// and roll/pitch/yaw are rate setpoints in degrees per second. Out of the
/// PID law they are controller outputs; after demand constraint they are
/// normalized mixer inputs.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Demands {
    /// Collective thrust request.
    pub throttle: f32,
    /// Roll request.
    pub roll: f32,
    /// Pitch request.
    pub pitch: f32,
    /// Yaw request.
    pub yaw: f32,
}

impl Demands {
    /// Creates a demand set.
    pub const fn new(throttle: f32, roll: f32, pitch: f32, yaw: f32) -> Self {
        Self {
            throttle,
            roll,
            pitch,
            yaw,
        }
    }
}

/// Attitude and angular velocity supplied by the attitude estimator.
///
/// Angles are in decidegrees ([`ANGLE_SCALE`] units per degree); rates are
/// in degrees per second.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VehicleState {
    /// Roll angle.
    pub phi: f32,
    /// Pitch angle.
    pub theta: f32,
    /// Yaw angle.
    pub psi: f32,
    /// Roll rate.
    pub dphi: f32,
    /// Pitch rate.
    pub dtheta: f32,
    /// Yaw rate.
    pub dpsi: f32,
}

/// Angle units per degree in [`VehicleState`].
pub const ANGLE_SCALE: f32 = 10.0;

impl VehicleState {
    /// Builds a state from angles in degrees and rates in degrees per second.
    pub fn from_degrees(angles: [f32; 3], rates: [f32; 3]) -> Self {
        Self {
            phi: angles[0] * ANGLE_SCALE,
            theta: angles[1] * ANGLE_SCALE,
            psi: angles[2] * ANGLE_SCALE,
            dphi: rates[0],
            dtheta: rates[1],
            dpsi: rates[2],
        }
    }
}
