// src/pid/rate.rs

//! # Rate PID Terms
//!
//! Compute function and control data driving the per-axis `piddiy`
//! controllers. The caller shapes every input (iterm relax, windup, D-term
//! filtering and D-min) and this callback only integrates and hands the
//! terms to `piddiy`, which weights them with `kp`, `ki` and `kd`.

use piddiy::PidController;

/// Control data for the rate PID compute callback.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RateControlData {
    /// Rate error feeding the P term, after any P shaping.
    pub error: f32,
    /// Rate error feeding the integrator, after iterm relax.
    pub iterm_error: f32,
    /// Integration step, seconds. Yaw shortens it near the windup point.
    pub dt: f32,
    /// Bound on the accumulated integral, in integral units (not output units).
    pub integral_limit: f32,
    /// Filtered, boosted derivative of the measured rate.
    pub derivative: f32,
    /// Zeroes the integrator on this pass.
    pub reset_integral: bool,
}

/// Rate PID compute callback.
pub fn compute_rate(
    pid: &mut PidController<f32, RateControlData>,
    data: RateControlData,
) -> (f32, f32, f32) {
    let integral = if !data.reset_integral {
        (pid.integral + data.iterm_error * data.dt)
            .clamp(-data.integral_limit, data.integral_limit)
    } else {
        0.0
    };

    (data.error, integral, data.derivative)
}

/// Integral bound that keeps `ki * integral` within `limit`.
pub fn integral_limit(limit: f32, ki: f32) -> f32 {
    if ki > 0.0 {
        limit / ki
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    fn rate_pid(kp: f32, ki: f32, kd: f32) -> PidController<f32, RateControlData> {
        let mut pid = PidController::new();
        pid.compute_fn(compute_rate).set_point(0.0).kp(kp).ki(ki).kd(kd);
        pid
    }

    /// Test that the integral term is clamped to the specified limit.
    #[test]
    fn test_pid_rate_integral_clamping() {
        let mut pid = rate_pid(1.0, 5.0, 0.1);
        let data = RateControlData {
            error: 50.0,
            iterm_error: 50.0,
            dt: 1.0,
            integral_limit: 100.0,
            ..Default::default()
        };

        for _ in 0..10 {
            let _ = pid.compute(data);
        }

        let (_, integral, _) = compute_rate(&mut pid, data);
        assert!(
            value_close(100.0, integral),
            "Integral should be clamped to 100."
        );
    }

    /// Test the behavior when the reset_integral flag is true.
    #[test]
    fn test_pid_rate_integral_reset() {
        let mut pid = rate_pid(1.0, 1.0, 0.0);
        let data = RateControlData {
            error: 10.0,
            iterm_error: 10.0,
            dt: 1.0,
            integral_limit: 100.0,
            ..Default::default()
        };

        let _ = pid.compute(data);
        assert!(value_close(10.0, pid.integral));

        let output = pid.compute(RateControlData {
            reset_integral: true,
            ..data
        });
        assert!(value_close(0.0, pid.integral), "Integral should reset.");
        assert!(value_close(10.0, output), "Only P should remain.");
    }

    /// Output is the gain-weighted sum of the three terms.
    #[test]
    fn test_pid_rate_response() {
        let mut pid = rate_pid(2.0, 0.5, 0.25);
        let data = RateControlData {
            error: 3.0,
            iterm_error: 2.0,
            dt: 0.5,
            integral_limit: 100.0,
            derivative: 4.0,
            reset_integral: false,
        };

        let output = pid.compute(data);
        // 2*3 + 0.5*1 + 0.25*4
        assert!(value_close(7.5, output));

        let output = pid.compute(data);
        assert!(value_close(2.0, pid.integral));
        assert!(value_close(8.0, output));
    }

    /// The integrator follows the relaxed error, not the P error.
    #[test]
    fn test_pid_rate_iterm_error_drives_integral() {
        let mut pid = rate_pid(1.0, 1.0, 0.0);
        let data = RateControlData {
            error: 10.0,
            iterm_error: 0.0,
            dt: 1.0,
            integral_limit: 100.0,
            ..Default::default()
        };
        let output = pid.compute(data);
        assert!(value_close(0.0, pid.integral));
        assert!(value_close(10.0, output));
    }

    /// Test that PID computes zero output for zero error with zero initial conditions.
    #[test]
    fn test_pid_rate_zero_conditions() {
        let mut pid = rate_pid(1.0, 0.0, 0.0);
        let data = RateControlData {
            dt: 1.0,
            integral_limit: 10.0,
            ..Default::default()
        };
        let (error, integral, derivative) = compute_rate(&mut pid, data);
        let output = pid.compute(data);

        assert!(value_close(0.0, error), "Error should be zero.");
        assert!(value_close(0.0, integral), "Integral should be zero.");
        assert!(value_close(0.0, derivative), "Derivative should be zero.");
        assert!(value_close(0.0, output), "Output should be zero.");
    }

    #[test]
    fn test_integral_limit_in_output_units() {
        assert!(value_close(20.0, integral_limit(400.0, 20.0)));
        assert!(value_close(0.0, integral_limit(400.0, 0.0)));
    }
}
