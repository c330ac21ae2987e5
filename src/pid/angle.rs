// src/pid/angle.rs

//! # Cascaded Angle/Rate Controller
//!
//! [`AnglePid`] turns stick rate setpoints and the measured vehicle state
//! into roll, pitch and yaw demands once per control cycle.
//!
//! Per cyclic axis (roll, pitch):
//!
//! 1. acceleration limiting of the setpoint, when enabled
//! 2. angle-assist blend toward the stick angle, when `k_level > 0`
//! 3. iterm relax on the integrated error
//! 4. derivative on the measured rate through two PT1 stages, boosted by
//!    the D-min factor
//! 5. feedforward on the per-cycle setpoint change, limited near the
//!    maximum rate
//!
//! Yaw has no derivative. Its P term is low-passed and its integration step
//! shrinks above the windup point.
//!
//! The first D-term stage is retuned from throttle at most every 5 ms.

use super::{
    compute_rate, integral_limit, PidConfig, PidTerms, RateControlData, D_MIN_ADVANCE,
    D_MIN_GAIN, D_MIN_GAIN_FACTOR, D_MIN_LOWPASS_HZ, D_MIN_RANGE_HZ, DTERM_LPF2_HZ,
    DYN_LPF_THROTTLE_STEPS, DYN_LPF_THROTTLE_UPDATE_DELAY_US, FEEDFORWARD_MAX_RATE_LIMIT,
    ITERM_LIMIT, ITERM_RELAX_CUTOFF_HZ, ITERM_RELAX_SETPOINT_THRESHOLD, ITERM_WINDUP_POINT,
    LEVEL_ANGLE_LIMIT, YAW_LOWPASS_HZ,
};
use crate::clock::cmp_time_us;
use crate::filter::{pt2_gain, LowPass, Pt1Filter, Pt2Filter, Pt3Filter};
use crate::receiver::FeedforwardFilter;
use crate::state::{Demands, VehicleState, ANGLE_SCALE};
use num_traits::Float;
use piddiy::PidController;

/// D-term low-pass cutoff for a throttle in `[0, 1]`.
pub fn dyn_lpf_cutoff(throttle: f32, min_hz: u16, max_hz: u16, expo: u8) -> f32 {
    let expof = expo as f32 / 10.0;
    let curve = throttle * (1.0 - throttle) * expof + throttle;
    (max_hz as f32 - min_hz as f32) * curve + min_hz as f32
}

/// Limits feedforward `value` so that, added to `setpoint`, it does not push
/// past `limit`. Zero when `value` opposes the setpoint or the setpoint
/// already exceeds the limit.
pub fn apply_feedforward_limit(value: f32, setpoint: f32, limit: f32, kp: f32) -> f32 {
    if value * setpoint > 0.0 && setpoint.abs() <= limit {
        value.clamp((-limit - setpoint) * kp, (limit - setpoint) * kp)
    } else {
        0.0
    }
}

fn rate_pid(config: &PidConfig, kd: f32) -> PidController<f32, RateControlData> {
    let mut pid = PidController::new();
    pid.compute_fn(compute_rate)
        .set_point(0.0)
        .kp(config.kp)
        .ki(config.ki)
        .kd(kd);
    pid
}

/// Values shared by every axis.
#[derive(Debug, Clone, Copy, PartialEq)]
struct LawParams {
    config: PidConfig,
    dt: f32,
    frequency: f32,
    max_rate: f32,
    integral_limit: f32,
    feedforward_filtered: bool,
}

impl LawParams {
    fn level(&self, setpoint: f32, angle: f32) -> f32 {
        if self.config.k_level <= 0.0 {
            return setpoint;
        }
        let deflection = if self.max_rate > 0.0 {
            (setpoint / self.max_rate).clamp(-1.0, 1.0)
        } else {
            0.0
        };
        let target = LEVEL_ANGLE_LIMIT * deflection;
        (target - angle / ANGLE_SCALE) * self.config.k_level
    }

    fn feedforward(&self, setpoint: f32, demand_delta: f32) -> f32 {
        if self.config.kf <= 0.0 {
            return 0.0;
        }
        let feedforward = self.config.kf * demand_delta * self.frequency;
        let limit = self.max_rate * FEEDFORWARD_MAX_RATE_LIMIT;
        if limit != 0.0 {
            apply_feedforward_limit(feedforward, setpoint, limit, self.config.kp)
        } else {
            feedforward
        }
    }

    fn max_velocity(&self, accel_limit: u16) -> f32 {
        accel_limit as f32 * 100.0 * self.dt
    }
}

/// Setpoint history common to all axes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct SetpointHistory {
    previous_setpoint: f32,
    previous_corrected: f32,
    feedforward_lpf: Pt3Filter,
}

impl SetpointHistory {
    fn acceleration_limit(&mut self, setpoint: f32, max_velocity: f32) -> f32 {
        let velocity = setpoint - self.previous_setpoint;
        let limited = if velocity.abs() <= max_velocity {
            setpoint
        } else if velocity > 0.0 {
            self.previous_setpoint + max_velocity
        } else {
            self.previous_setpoint - max_velocity
        };
        self.previous_setpoint = limited;
        limited
    }

    fn demand_delta(&mut self, corrected: f32, filtered: bool) -> f32 {
        let delta = corrected - self.previous_corrected;
        self.previous_corrected = corrected;
        if filtered {
            self.feedforward_lpf.apply(delta)
        } else {
            delta
        }
    }
}

struct CyclicAxis {
    history: SetpointHistory,
    pid: PidController<f32, RateControlData>,
    dterm_lpf1: Pt1Filter,
    dterm_lpf2: Pt1Filter,
    d_min_lpf: Pt2Filter,
    d_min_range: Pt2Filter,
    windup_lpf: Pt1Filter,
    previous_dterm: f32,
}

impl CyclicAxis {
    fn new(config: &PidConfig, dt: f32) -> Self {
        Self {
            history: SetpointHistory::default(),
            pid: rate_pid(config, config.kd),
            dterm_lpf1: Pt1Filter::with_cutoff(config.dyn_lpf_min_hz as f32, dt),
            dterm_lpf2: Pt1Filter::with_cutoff(DTERM_LPF2_HZ, dt),
            d_min_lpf: Pt2Filter::seeded(pt2_gain(D_MIN_LOWPASS_HZ, dt), config.d_min_percent()),
            d_min_range: Pt2Filter::with_cutoff(D_MIN_RANGE_HZ, dt),
            windup_lpf: Pt1Filter::with_cutoff(ITERM_RELAX_CUTOFF_HZ, dt),
            previous_dterm: 0.0,
        }
    }

    fn iterm_relax(&mut self, iterm: f32, setpoint: f32, iterm_error: f32) -> f32 {
        let setpoint_lpf = self.windup_lpf.apply(setpoint);
        let setpoint_hpf = (setpoint - setpoint_lpf).abs();
        let relax = (1.0 - setpoint_hpf / ITERM_RELAX_SETPOINT_THRESHOLD).max(0.0);

        let decreasing = (iterm > 0.0 && iterm_error < 0.0) || (iterm < 0.0 && iterm_error > 0.0);
        if decreasing {
            iterm_error
        } else {
            iterm_error * relax
        }
    }

    fn d_min_factor(
        &mut self,
        params: &LawParams,
        percent: f32,
        demand_delta: f32,
        delta: f32,
    ) -> f32 {
        let gyro_gain = D_MIN_GAIN * D_MIN_GAIN_FACTOR / D_MIN_LOWPASS_HZ;
        let gyro_factor = self.d_min_range.apply(delta).abs() * gyro_gain;

        let setpoint_gain = D_MIN_GAIN * D_MIN_GAIN_FACTOR * D_MIN_ADVANCE * params.frequency
            / (100.0 * D_MIN_LOWPASS_HZ);
        let setpoint_factor = demand_delta.abs() * setpoint_gain;

        let factor = percent + (1.0 - percent) * gyro_factor.max(setpoint_factor);
        self.d_min_lpf.apply(factor).min(1.0)
    }

    /// Returns the boosted derivative and the factor used.
    fn derivative(&mut self, params: &LawParams, demand_delta: f32, dterm: f32) -> (f32, f32) {
        // fixed dt, so a late cycle does not spike D
        let delta = -(dterm - self.previous_dterm) * params.frequency;
        let percent = params.config.d_min_percent();
        let factor = if percent > 0.0 {
            self.d_min_factor(params, percent, demand_delta, delta)
        } else {
            1.0
        };
        (delta * factor, factor)
    }

    fn update(
        &mut self,
        params: &LawParams,
        demand: f32,
        angle: f32,
        angvel: f32,
        reset: bool,
    ) -> (f32, PidTerms) {
        let dterm = self.dterm_lpf2.apply(self.dterm_lpf1.apply(angvel));

        let mut setpoint = demand;
        let max_velocity = params.max_velocity(params.config.rate_accel_limit);
        if max_velocity > 0.0 {
            setpoint = self.history.acceleration_limit(setpoint, max_velocity);
        }
        setpoint = params.level(setpoint, angle);

        let error = setpoint - angvel;
        let previous_iterm = params.config.ki * self.pid.integral;
        let iterm_error = self.iterm_relax(previous_iterm, setpoint, error);

        let demand_delta = self
            .history
            .demand_delta(setpoint, params.feedforward_filtered);

        let (derivative, d_min_factor) = if params.config.kd > 0.0 {
            self.derivative(params, demand_delta, dterm)
        } else {
            (0.0, 1.0)
        };
        self.previous_dterm = dterm;

        self.pid.set_point(setpoint);
        let pid_sum = self.pid.compute(RateControlData {
            error,
            iterm_error,
            dt: params.dt,
            integral_limit: params.integral_limit,
            derivative,
            reset_integral: reset,
        });
        let feedforward = params.feedforward(setpoint, demand_delta);

        let terms = PidTerms {
            p: params.config.kp * error,
            i: params.config.ki * self.pid.integral,
            d: params.config.kd * derivative,
            f: feedforward,
            d_min_factor,
        };
        (pid_sum + feedforward, terms)
    }
}

struct YawAxis {
    history: SetpointHistory,
    pid: PidController<f32, RateControlData>,
    pterm_lpf: Pt1Filter,
}

impl YawAxis {
    fn new(config: &PidConfig, dt: f32) -> Self {
        Self {
            history: SetpointHistory::default(),
            pid: rate_pid(config, 0.0),
            pterm_lpf: Pt1Filter::with_cutoff(YAW_LOWPASS_HZ, dt),
        }
    }

    /// Integration step scale: shrinks to zero between the windup point and
    /// the limit while integrating away from zero.
    fn windup_scale(iterm: f32, iterm_error: f32) -> f32 {
        if iterm * iterm_error > 0.0 {
            ((1.0 - iterm.abs() / ITERM_LIMIT) / (1.0 - ITERM_WINDUP_POINT)).clamp(0.0, 1.0)
        } else {
            1.0
        }
    }

    fn update(
        &mut self,
        params: &LawParams,
        demand: f32,
        angvel: f32,
        reset: bool,
    ) -> (f32, PidTerms) {
        let mut setpoint = demand;
        let max_velocity = params.max_velocity(params.config.yaw_rate_accel_limit);
        if max_velocity > 0.0 {
            setpoint = self.history.acceleration_limit(setpoint, max_velocity);
        }

        let error = setpoint - angvel;
        let previous_iterm = params.config.ki * self.pid.integral;
        let dt = params.dt * Self::windup_scale(previous_iterm, error);

        // PT1 is linear, so filtering the error filters kp * error
        let p_error = self.pterm_lpf.apply(error);

        let demand_delta = self
            .history
            .demand_delta(setpoint, params.feedforward_filtered);

        self.pid.set_point(setpoint);
        let pid_sum = self.pid.compute(RateControlData {
            error: p_error,
            iterm_error: error,
            dt,
            integral_limit: params.integral_limit,
            derivative: 0.0,
            reset_integral: reset,
        });
        let feedforward = params.config.kf * demand_delta * params.frequency;

        let terms = PidTerms {
            p: params.config.kp * p_error,
            i: params.config.ki * self.pid.integral,
            d: 0.0,
            f: feedforward,
            d_min_factor: 1.0,
        };
        (pid_sum + feedforward, terms)
    }
}

/// Cascaded angle/rate PID controller.
pub struct AnglePid {
    params: LawParams,
    roll: CyclicAxis,
    pitch: CyclicAxis,
    yaw: YawAxis,
    terms: [PidTerms; 3],
    dyn_lpf_previous_quantized: i32,
    last_dyn_lpf_update_us: u32,
    dyn_lpf_cutoff_hz: f32,
}

impl AnglePid {
    /// Creates a controller running every `dt` seconds. `max_rate` is the
    /// stick rate at full deflection, in degrees per second.
    pub fn new(config: PidConfig, max_rate: f32, dt: f32) -> Self {
        Self {
            params: LawParams {
                config,
                dt,
                frequency: 1.0 / dt,
                max_rate,
                integral_limit: integral_limit(ITERM_LIMIT, config.ki),
                feedforward_filtered: false,
            },
            roll: CyclicAxis::new(&config, dt),
            pitch: CyclicAxis::new(&config, dt),
            yaw: YawAxis::new(&config, dt),
            terms: [PidTerms::default(); 3],
            // lets an initial zero throttle set the cutoff
            dyn_lpf_previous_quantized: -1,
            last_dyn_lpf_update_us: 0,
            dyn_lpf_cutoff_hz: config.dyn_lpf_min_hz as f32,
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &PidConfig {
        &self.params.config
    }

    /// Roll, pitch and yaw terms from the last update.
    pub fn terms(&self) -> &[PidTerms; 3] {
        &self.terms
    }

    /// Current cutoff of the first D-term stage.
    pub fn dyn_lpf_cutoff_hz(&self) -> f32 {
        self.dyn_lpf_cutoff_hz
    }

    /// True once the receiver has pushed a feedforward cutoff.
    pub fn is_feedforward_filtered(&self) -> bool {
        self.params.feedforward_filtered
    }

    /// Runs one control cycle. `demands` carries throttle in `[0, 1]` and
    /// rate setpoints in degrees per second; the throttle passes through.
    /// `reset` zeroes all integrators on this pass.
    pub fn update(
        &mut self,
        now_us: u32,
        demands: &Demands,
        state: &VehicleState,
        reset: bool,
    ) -> Demands {
        let params = self.params;

        let (roll, roll_terms) = self
            .roll
            .update(&params, demands.roll, state.phi, state.dphi, reset);
        let (pitch, pitch_terms) = self
            .pitch
            .update(&params, demands.pitch, state.theta, state.dtheta, reset);
        let (yaw, yaw_terms) = self.yaw.update(&params, demands.yaw, state.dpsi, reset);
        self.terms = [roll_terms, pitch_terms, yaw_terms];

        self.update_dyn_lpf_cutoffs(now_us, demands.throttle);

        Demands::new(demands.throttle, roll, pitch, yaw)
    }

    fn update_dyn_lpf_cutoffs(&mut self, now_us: u32, throttle: f32) {
        if cmp_time_us(now_us, self.last_dyn_lpf_update_us) < DYN_LPF_THROTTLE_UPDATE_DELAY_US {
            return;
        }

        let quantized = (throttle * DYN_LPF_THROTTLE_STEPS).round() as i32;
        if quantized == self.dyn_lpf_previous_quantized {
            return;
        }

        // scale back so the cutoff steps are repeatable
        let config = &self.params.config;
        let cutoff = dyn_lpf_cutoff(
            quantized as f32 / DYN_LPF_THROTTLE_STEPS,
            config.dyn_lpf_min_hz,
            config.dyn_lpf_max_hz,
            config.dyn_lpf_curve_expo,
        );
        self.roll.dterm_lpf1.update_cutoff(cutoff, self.params.dt);
        self.pitch.dterm_lpf1.update_cutoff(cutoff, self.params.dt);
        self.dyn_lpf_cutoff_hz = cutoff;
        self.dyn_lpf_previous_quantized = quantized;
        self.last_dyn_lpf_update_us = now_us;
        log::trace!("dterm lowpass {} Hz", cutoff);
    }
}

impl FeedforwardFilter for AnglePid {
    fn init_feedforward_lpf(&mut self, cutoff_hz: u16) {
        let lpf = Pt3Filter::with_cutoff(cutoff_hz as f32, self.params.dt);
        self.roll.history.feedforward_lpf = lpf;
        self.pitch.history.feedforward_lpf = lpf;
        self.yaw.history.feedforward_lpf = lpf;
        self.params.feedforward_filtered = true;
    }

    fn update_feedforward_lpf(&mut self, cutoff_hz: u16) {
        let dt = self.params.dt;
        self.roll.history.feedforward_lpf.update_cutoff(cutoff_hz as f32, dt);
        self.pitch.history.feedforward_lpf.update_cutoff(cutoff_hz as f32, dt);
        self.yaw.history.feedforward_lpf.update_cutoff(cutoff_hz as f32, dt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    const DT: f32 = 1.0 / 8000.0;
    const MAX_RATE: f32 = 670.0;

    fn level_state() -> VehicleState {
        VehicleState::default()
    }

    /// Rolling gyro input with a slow drift, deterministic.
    fn wobble(cycle: u32) -> VehicleState {
        let t = cycle as f32 * DT;
        VehicleState {
            dphi: 20.0 * (t * 30.0).sin(),
            dtheta: -10.0 * (t * 45.0).cos(),
            dpsi: 5.0 * t,
            ..Default::default()
        }
    }

    /// Reset zeroes the integrators on the same pass while D stays continuous.
    #[test]
    fn test_reset_keeps_filter_continuity() {
        let config = PidConfig::new();
        let mut reference = AnglePid::new(config, MAX_RATE, DT);
        let mut reset = AnglePid::new(config, MAX_RATE, DT);
        let demands = Demands::new(0.5, 100.0, -50.0, 30.0);

        for cycle in 0..400 {
            let state = wobble(cycle);
            let now = cycle * 125;
            let _ = reference.update(now, &demands, &state, false);
            let _ = reset.update(now, &demands, &state, cycle == 200);

            if cycle == 200 {
                for axis in 0..3 {
                    assert!(value_not_close(0.0, reference.terms()[axis].i));
                    assert!(value_close(0.0, reset.terms()[axis].i));
                }
            }
            for axis in 0..3 {
                assert!(value_close(reference.terms()[axis].d, reset.terms()[axis].d));
                assert!(value_close(reference.terms()[axis].p, reset.terms()[axis].p));
            }
        }
    }

    /// The controller output is the weighted P, I and D plus feedforward.
    #[test]
    fn test_output_matches_terms() {
        let config = PidConfig::new();
        let mut pid = AnglePid::new(config, MAX_RATE, DT);
        let demands = Demands::new(0.5, 120.0, -60.0, 40.0);
        for cycle in 0..200 {
            let output = pid.update(cycle * 125, &demands, &wobble(cycle), false);
            assert!(value_close(0.5, output.throttle));
            let terms = pid.terms();
            assert!(value_close(terms[0].sum(), output.roll));
            assert!(value_close(terms[1].sum(), output.pitch));
            assert!(value_close(terms[2].sum(), output.yaw));
        }
        assert!(value_not_close(0.0, pid.terms()[0].i));
    }

    /// With no motion and no stick change, D-min sits at its minimum ratio.
    #[test]
    fn test_d_min_factor_at_rest() {
        let config = PidConfig::new();
        let mut pid = AnglePid::new(config, MAX_RATE, DT);
        for cycle in 0..100 {
            let _ = pid.update(cycle * 125, &Demands::default(), &level_state(), false);
        }
        let percent = config.d_min_percent();
        assert!(percent > 0.0 && percent < 1.0);
        assert!(value_close(percent, pid.terms()[0].d_min_factor));
        assert!(value_close(percent, pid.terms()[1].d_min_factor));
    }

    /// Motion raises D-min toward, but never beyond, full gain.
    #[test]
    fn test_d_min_factor_boosts_with_motion() {
        let config = PidConfig::new();
        let mut pid = AnglePid::new(config, MAX_RATE, DT);
        let mut peak: f32 = 0.0;
        for cycle in 0..800 {
            let state = VehicleState {
                dphi: if (cycle / 40) % 2 == 0 { 300.0 } else { -300.0 },
                ..Default::default()
            };
            let _ = pid.update(cycle * 125, &Demands::default(), &state, false);
            peak = peak.max(pid.terms()[0].d_min_factor);
            assert!(pid.terms()[0].d_min_factor <= 1.0);
        }
        assert!(peak > config.d_min_percent());
    }

    #[test]
    fn test_d_min_off_uses_full_gain() {
        let mut config = PidConfig::new();
        config.d_min = 0.0;
        let mut pid = AnglePid::new(config, MAX_RATE, DT);
        let _ = pid.update(0, &Demands::default(), &level_state(), false);
        assert!(value_close(1.0, pid.terms()[0].d_min_factor));
    }

    /// A sustained roll error saturates the integrator at the limit.
    #[test]
    fn test_integrator_clamp() {
        let mut config = PidConfig::new();
        config.ki = 16.0;
        config.kf = 0.0;
        let mut pid = AnglePid::new(config, MAX_RATE, DT);
        let demands = Demands::new(0.5, 600.0, -600.0, 600.0);
        for cycle in 0..8000 {
            let _ = pid.update(cycle * 125, &demands, &level_state(), false);
        }
        assert!(value_close(ITERM_LIMIT, pid.terms()[0].i));
        assert!(value_close(-ITERM_LIMIT, pid.terms()[1].i));

        // yaw slows down past the windup point and never reaches the limit
        let yaw = pid.terms()[2].i;
        assert!(yaw > ITERM_WINDUP_POINT * ITERM_LIMIT);
        assert!(yaw < ITERM_LIMIT);
    }

    /// Fast stick movement suppresses integration through iterm relax.
    #[test]
    fn test_iterm_relax_on_stick_step() {
        let mut config = PidConfig::new();
        config.kf = 0.0;
        let mut pid = AnglePid::new(config, MAX_RATE, DT);
        let _ = pid.update(0, &Demands::new(0.5, 400.0, 0.0, 0.0), &level_state(), false);
        // high-passed setpoint is far above the threshold on the step
        assert!(value_close(0.0, pid.terms()[0].i));
    }

    #[test]
    fn test_dyn_lpf_cutoff_curve() {
        assert!(value_close(75.0, dyn_lpf_cutoff(0.0, 75, 150, 5)));
        assert!(value_close(150.0, dyn_lpf_cutoff(1.0, 75, 150, 5)));
        assert!(value_close(121.875, dyn_lpf_cutoff(0.5, 75, 150, 5)));
    }

    /// The D-term cutoff follows throttle, at most every 5 ms.
    #[test]
    fn test_dynamic_lowpass_follows_throttle() {
        let mut pid = AnglePid::new(PidConfig::new(), MAX_RATE, DT);
        let state = level_state();

        let _ = pid.update(5000, &Demands::new(0.0, 0.0, 0.0, 0.0), &state, false);
        assert!(value_close(75.0, pid.dyn_lpf_cutoff_hz()));

        let _ = pid.update(6000, &Demands::new(1.0, 0.0, 0.0, 0.0), &state, false);
        assert!(value_close(75.0, pid.dyn_lpf_cutoff_hz()));

        let _ = pid.update(10_000, &Demands::new(1.0, 0.0, 0.0, 0.0), &state, false);
        assert!(value_close(150.0, pid.dyn_lpf_cutoff_hz()));

        let _ = pid.update(15_000, &Demands::new(0.5, 0.0, 0.0, 0.0), &state, false);
        assert!(value_close(121.875, pid.dyn_lpf_cutoff_hz()));
    }

    /// Angle assist steers toward the stick angle instead of the stick rate.
    #[test]
    fn test_level_blend() {
        let mut config = PidConfig::new();
        config.k_level = 2.0;
        let mut pid = AnglePid::new(config, MAX_RATE, DT);
        let state = VehicleState {
            phi: 100.0,
            ..Default::default()
        };
        let _ = pid.update(0, &Demands::new(0.5, 335.0, 0.0, 0.0), &state, false);
        // 22.5 deg target, 10 deg measured
        assert!(value_close(config.kp * 25.0, pid.terms()[0].p));

        config.k_level = 0.0;
        let mut pid = AnglePid::new(config, MAX_RATE, DT);
        let _ = pid.update(0, &Demands::new(0.5, 335.0, 0.0, 0.0), &state, false);
        assert!(value_close(config.kp * 335.0, pid.terms()[0].p));
    }

    /// Acceleration limiting ramps a stick step.
    #[test]
    fn test_acceleration_limit() {
        let mut config = PidConfig::new();
        config.rate_accel_limit = 100;
        let mut pid = AnglePid::new(config, MAX_RATE, DT);
        let demands = Demands::new(0.5, 100.0, 0.0, 0.0);
        let _ = pid.update(0, &demands, &level_state(), false);
        assert!(value_close(config.kp * 1.25, pid.terms()[0].p));
        let _ = pid.update(125, &demands, &level_state(), false);
        assert!(value_close(config.kp * 2.5, pid.terms()[0].p));
    }

    #[test]
    fn test_feedforward_limit() {
        assert!(value_close(10.0, apply_feedforward_limit(10.0, 100.0, 603.0, 1.0)));
        assert!(value_close(0.0, apply_feedforward_limit(10.0, -100.0, 603.0, 1.0)));
        assert!(value_close(0.0, apply_feedforward_limit(10.0, 700.0, 603.0, 1.0)));
        assert!(value_close(503.0, apply_feedforward_limit(600.0, 100.0, 603.0, 1.0)));
    }

    /// Feedforward appears on a stick move and vanishes once it stops.
    #[test]
    fn test_feedforward_on_stick_move() {
        let mut pid = AnglePid::new(PidConfig::new(), MAX_RATE, DT);
        let _ = pid.update(0, &Demands::new(0.5, 1.0, 0.0, 0.0), &level_state(), false);
        assert!(pid.terms()[0].f > 0.0);
        let _ = pid.update(125, &Demands::new(0.5, 1.0, 0.0, 0.0), &level_state(), false);
        assert!(value_close(0.0, pid.terms()[0].f));
    }

    /// The yaw P term is low-passed.
    #[test]
    fn test_yaw_p_lowpass() {
        let config = PidConfig::new();
        let mut pid = AnglePid::new(config, MAX_RATE, DT);
        let _ = pid.update(0, &Demands::new(0.5, 0.0, 0.0, 10.0), &level_state(), false);
        let p = pid.terms()[2].p;
        assert!(p > 0.0 && p < config.kp * 10.0);
        assert!(value_close(0.0, pid.terms()[2].d));
    }

    #[test]
    fn test_feedforward_filter_init() {
        let mut pid = AnglePid::new(PidConfig::new(), MAX_RATE, DT);
        assert!(!pid.is_feedforward_filtered());
        pid.init_feedforward_lpf(100);
        pid.update_feedforward_lpf(60);
        assert!(pid.is_feedforward_filtered());
    }
}
