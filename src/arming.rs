// src/arming.rs

//! # Arming Module
//!
//! Decides when the motors may spin. The vehicle arms on the rising edge of
//! the arm switch, and only while every readiness condition holds:
//!
//! - gyro calibration has finished
//! - the vehicle is level
//! - the throttle stick is down
//! - the arm switch has been seen off since the last disarm
//! - the receiver link is healthy
//! - failsafe has not locked arming out
//!
//! A forced disarm from failsafe sets the lockout, and only the failsafe
//! recovery transition clears it.

use crate::receiver::{channel, CHANNEL_COUNT};
use crate::state::{VehicleState, ANGLE_SCALE};
use bitflags::bitflags;
use num_traits::Float;

bitflags! {
    /// Conditions currently preventing arming. Empty means ready.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ArmingBlockers: u8 {
        /// Gyro calibration still running.
        const GYRO_CALIBRATING = 1 << 0;
        /// Roll or pitch beyond the arming angle.
        const NOT_LEVEL = 1 << 1;
        /// Throttle stick above the throttle-down threshold.
        const THROTTLE_UP = 1 << 2;
        /// Arm switch not cycled off since the last disarm.
        const SWITCH_NOT_RESET = 1 << 3;
        /// Receiver link reported unhealthy.
        const RX_FAILSAFE = 1 << 4;
        /// Failsafe forced a disarm and has not yet recovered.
        const FAILSAFE_LOCKOUT = 1 << 5;
    }
}

/// Coarse status for indicators and telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ArmingStatus {
    /// Disarmed and at least one readiness condition fails.
    #[default]
    Unready,
    /// Disarmed and ready to arm.
    Ready,
    /// Motors live.
    Armed,
    /// Failsafe active or arming locked out by it.
    Failsafe,
}

/// Arming thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArmingConfig {
    /// Channel carrying the arm switch.
    pub switch_channel: usize,
    /// Pulse above which the arm switch is on.
    pub switch_on_us: f32,
    /// Pulse below which the throttle counts as down.
    pub throttle_down_us: f32,
    /// Largest roll or pitch, in degrees, at which arming is allowed.
    pub max_angle_deg: f32,
}

impl ArmingConfig {
    /// Default thresholds: arm switch on aux1.
    pub fn new() -> Self {
        Self {
            switch_channel: channel::AUX1,
            switch_on_us: 1200.0,
            throttle_down_us: 1050.0,
            max_angle_deg: 25.0,
        }
    }
}

impl Default for ArmingConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Sensor-side inputs to the readiness checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArmingInputs {
    /// Vehicle within the arming angle.
    pub imu_level: bool,
    /// Gyro calibration still running.
    pub gyro_calibrating: bool,
}

/// Arming state.
#[derive(Debug, Clone, PartialEq)]
pub struct Arming {
    config: ArmingConfig,
    armed: bool,
    switch_reset: bool,
    rx_failsafe_okay: bool,
    failsafe_lockout: bool,
    blockers: ArmingBlockers,
    disarm_count: u32,
    forced_disarm_count: u32,
}

impl Arming {
    /// Creates a disarmed, unready arming state.
    pub fn new(config: ArmingConfig) -> Self {
        Self {
            config,
            armed: false,
            switch_reset: false,
            rx_failsafe_okay: true,
            failsafe_lockout: false,
            blockers: ArmingBlockers::all(),
            disarm_count: 0,
            forced_disarm_count: 0,
        }
    }

    /// True while the motors are live.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// True when disarmed and no condition blocks arming.
    pub fn is_ready(&self) -> bool {
        !self.armed && self.blockers.is_empty()
    }

    /// Conditions blocking arming as of the last status update.
    pub fn blockers(&self) -> ArmingBlockers {
        self.blockers
    }

    /// Total disarms, forced or not.
    pub fn disarm_count(&self) -> u32 {
        self.disarm_count
    }

    /// Disarms forced by failsafe.
    pub fn forced_disarm_count(&self) -> u32 {
        self.forced_disarm_count
    }

    /// True while failsafe has arming locked out.
    pub fn is_locked_out(&self) -> bool {
        self.failsafe_lockout
    }

    /// Throttle stick below the throttle-down threshold.
    pub fn throttle_is_down(&self, raw: &[f32; CHANNEL_COUNT]) -> bool {
        raw[channel::THROTTLE] < self.config.throttle_down_us
    }

    /// Arm switch in the on position.
    pub fn switch_is_on(&self, raw: &[f32; CHANNEL_COUNT]) -> bool {
        raw[self.config.switch_channel] > self.config.switch_on_us
    }

    /// Roll and pitch both within the arming angle.
    pub fn is_level(&self, state: &VehicleState) -> bool {
        let limit = self.config.max_angle_deg * ANGLE_SCALE;
        state.phi.abs() <= limit && state.theta.abs() <= limit
    }

    /// Records the receiver link health reported by failsafe.
    pub fn set_rx_failsafe(&mut self, okay: bool) {
        self.rx_failsafe_okay = okay;
    }

    /// Recomputes the readiness conditions without changing the armed state.
    pub fn update_status(&mut self, raw: &[f32; CHANNEL_COUNT], inputs: ArmingInputs) {
        if !self.switch_is_on(raw) {
            self.switch_reset = true;
        }

        let mut blockers = ArmingBlockers::empty();
        blockers.set(ArmingBlockers::GYRO_CALIBRATING, inputs.gyro_calibrating);
        blockers.set(ArmingBlockers::NOT_LEVEL, !inputs.imu_level);
        blockers.set(ArmingBlockers::THROTTLE_UP, !self.throttle_is_down(raw));
        blockers.set(ArmingBlockers::SWITCH_NOT_RESET, !self.switch_reset);
        blockers.set(ArmingBlockers::RX_FAILSAFE, !self.rx_failsafe_okay);
        blockers.set(ArmingBlockers::FAILSAFE_LOCKOUT, self.failsafe_lockout);
        self.blockers = blockers;
    }

    /// Updates readiness, then arms or disarms from the arm switch.
    pub fn check(&mut self, raw: &[f32; CHANNEL_COUNT], inputs: ArmingInputs) {
        self.update_status(raw, inputs);

        if self.switch_is_on(raw) {
            if !self.armed {
                if self.blockers.is_empty() {
                    self.armed = true;
                    log::info!("armed");
                } else {
                    // switch went on while unready: require another off-on cycle
                    self.switch_reset = false;
                }
            }
        } else if self.armed {
            self.disarm();
        }
    }

    /// Disarms. The arm switch must then be cycled before re-arming.
    pub fn disarm(&mut self) {
        if self.armed {
            self.armed = false;
            self.disarm_count += 1;
            log::info!("disarmed");
        }
        self.switch_reset = false;
    }

    /// Disarm commanded by failsafe; locks arming out until recovery.
    pub fn force_disarm(&mut self) {
        self.failsafe_lockout = true;
        self.forced_disarm_count += 1;
        log::warn!("failsafe forced disarm");
        self.disarm();
    }

    /// Lifts the failsafe lockout after the link has recovered.
    pub fn clear_failsafe_lockout(&mut self) {
        self.failsafe_lockout = false;
    }

    /// Coarse status given whether failsafe is currently active.
    pub fn status(&self, failsafe_active: bool) -> ArmingStatus {
        if self.armed {
            ArmingStatus::Armed
        } else if failsafe_active || self.failsafe_lockout {
            ArmingStatus::Failsafe
        } else if self.blockers.is_empty() {
            ArmingStatus::Ready
        } else {
            ArmingStatus::Unready
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const READY: ArmingInputs = ArmingInputs {
        imu_level: true,
        gyro_calibrating: false,
    };

    fn sticks(throttle: f32, switch: f32) -> [f32; CHANNEL_COUNT] {
        let mut raw = [1500.0; CHANNEL_COUNT];
        raw[channel::THROTTLE] = throttle;
        raw[channel::AUX1] = switch;
        raw
    }

    /// Arm on switch-on with throttle down, disarm on switch-off.
    #[test]
    fn test_arming_switch_cycle() {
        let mut arming = Arming::new(ArmingConfig::new());
        arming.check(&sticks(1000.0, 1000.0), READY);
        assert!(arming.is_ready());
        assert_eq!(arming.status(false), ArmingStatus::Ready);

        arming.check(&sticks(1000.0, 2000.0), READY);
        assert!(arming.is_armed());
        assert_eq!(arming.status(false), ArmingStatus::Armed);

        arming.check(&sticks(1000.0, 1000.0), READY);
        assert!(!arming.is_armed());
        assert_eq!(arming.disarm_count(), 1);
    }

    /// The switch must be seen off before the first arm.
    #[test]
    fn test_arming_requires_switch_reset() {
        let mut arming = Arming::new(ArmingConfig::new());
        arming.check(&sticks(1000.0, 2000.0), READY);
        assert!(!arming.is_armed());
        assert!(arming.blockers().contains(ArmingBlockers::SWITCH_NOT_RESET));
    }

    /// Throttle up, with the switch toggled repeatedly, never arms.
    #[test]
    fn test_arming_never_with_throttle_up() {
        let mut arming = Arming::new(ArmingConfig::new());
        for throttle in [1050.0, 1200.0, 1500.0, 2000.0] {
            for switch in [1000.0, 2000.0, 1000.0, 2000.0] {
                arming.check(&sticks(throttle, switch), READY);
                assert!(!arming.is_armed());
            }
        }
        assert!(arming.blockers().contains(ArmingBlockers::THROTTLE_UP));
    }

    /// Raising the switch while unready then lowering the throttle does not arm.
    #[test]
    fn test_arming_switch_on_while_unready_needs_cycle() {
        let mut arming = Arming::new(ArmingConfig::new());
        arming.check(&sticks(1000.0, 1000.0), READY);
        arming.check(&sticks(1500.0, 2000.0), READY);
        arming.check(&sticks(1000.0, 2000.0), READY);
        assert!(!arming.is_armed());
        arming.check(&sticks(1000.0, 1000.0), READY);
        arming.check(&sticks(1000.0, 2000.0), READY);
        assert!(arming.is_armed());
    }

    #[test]
    fn test_arming_blocked_by_calibration_and_level() {
        let mut arming = Arming::new(ArmingConfig::new());
        let inputs = ArmingInputs {
            imu_level: false,
            gyro_calibrating: true,
        };
        arming.check(&sticks(1000.0, 1000.0), inputs);
        arming.check(&sticks(1000.0, 2000.0), inputs);
        assert!(!arming.is_armed());
        assert_eq!(
            arming.blockers(),
            ArmingBlockers::GYRO_CALIBRATING | ArmingBlockers::NOT_LEVEL
        );
        assert_eq!(arming.status(false), ArmingStatus::Unready);
    }

    /// A forced disarm locks arming out until cleared.
    #[test]
    fn test_arming_failsafe_lockout() {
        let mut arming = Arming::new(ArmingConfig::new());
        arming.check(&sticks(1000.0, 1000.0), READY);
        arming.check(&sticks(1000.0, 2000.0), READY);
        arming.force_disarm();
        assert!(!arming.is_armed());
        assert_eq!(arming.forced_disarm_count(), 1);
        assert_eq!(arming.status(false), ArmingStatus::Failsafe);

        arming.check(&sticks(1000.0, 1000.0), READY);
        arming.check(&sticks(1000.0, 2000.0), READY);
        assert!(!arming.is_armed());

        arming.clear_failsafe_lockout();
        arming.check(&sticks(1000.0, 1000.0), READY);
        arming.check(&sticks(1000.0, 2000.0), READY);
        assert!(arming.is_armed());
    }

    #[test]
    fn test_arming_rx_failsafe_blocks() {
        let mut arming = Arming::new(ArmingConfig::new());
        arming.set_rx_failsafe(false);
        arming.check(&sticks(1000.0, 1000.0), READY);
        assert!(arming.blockers().contains(ArmingBlockers::RX_FAILSAFE));
    }

    #[test]
    fn test_arming_level_check() {
        let arming = Arming::new(ArmingConfig::new());
        let level = VehicleState::from_degrees([10.0, -24.0, 90.0], [0.0; 3]);
        let tilted = VehicleState::from_degrees([0.0, 30.0, 0.0], [0.0; 3]);
        assert!(arming.is_level(&level));
        assert!(!arming.is_level(&tilted));
    }
}
