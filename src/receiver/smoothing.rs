// src/receiver/smoothing.rs

//! # Setpoint Smoothing
//!
//! Receivers deliver frames at tens to hundreds of hertz while the control
//! loop runs at kilohertz. Each control cycle the most recent setpoints are
//! pushed through a third-order low-pass filter so that the PID law sees a
//! smooth staircase instead of steps.
//!
//! Cutoffs may be fixed, or derived from the measured frame interval. In
//! the automatic case the filters stay off (raw values pass through) until
//! the interval has been trained: training starts a while after power-on,
//! averages a block of frame intervals with the extremes discarded, and
//! sets the cutoffs. Afterwards a contiguous run of intervals that all
//! differ from the trained average by the change threshold triggers a
//! retrain, with a guard time between retrains.

use crate::filter::{pt3_gain, LowPass, Pt3Filter};
use crate::state::Demands;
use num_traits::Float;

/// Cutoffs never drop below this.
pub const CUTOFF_MIN_HZ: u16 = 15;
/// Link frequency assumed for the feedforward cutoff before training.
pub const FEEDFORWARD_INITIAL_HZ: u16 = 100;
/// Delay after power-on before the first training.
pub const STARTUP_DELAY_MS: u32 = 5000;
/// Guard after the first good frame before initial training.
pub const TRAINING_DELAY_MS: u32 = 1000;
/// Guard after a retrain before the next one.
pub const RETRAINING_DELAY_MS: u32 = 2000;
/// Samples averaged in the initial training.
pub const TRAINING_SAMPLES: u32 = 50;
/// Samples averaged when retraining.
pub const RETRAINING_SAMPLES: u32 = 20;
/// Interval change, in percent, that counts towards a retrain.
pub const RATE_CHANGE_PERCENT: f32 = 20.0;

/// Receiver of the feedforward cutoff chosen by the smoothing trainer.
///
/// Implemented by the PID law, whose feedforward term shares the
/// setpoint's bandwidth.
pub trait FeedforwardFilter {
    /// Installs a feedforward low-pass with a fresh state.
    fn init_feedforward_lpf(&mut self, cutoff_hz: u16);

    /// Retunes the feedforward low-pass, keeping its state.
    fn update_feedforward_lpf(&mut self, cutoff_hz: u16);
}

/// Smoothing settings. A zero cutoff means "derive from the frame rate".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SmoothingConfig {
    /// Roll, pitch and yaw setpoint cutoff.
    pub setpoint_cutoff_hz: u16,
    /// Throttle cutoff.
    pub throttle_cutoff_hz: u16,
    /// Feedforward cutoff.
    pub feedforward_cutoff_hz: u16,
    /// Smoothness for automatic setpoint and feedforward cutoffs.
    pub auto_factor_setpoint: u8,
    /// Smoothness for the automatic throttle cutoff.
    pub auto_factor_throttle: u8,
}

impl SmoothingConfig {
    /// All cutoffs automatic, smoothness 30.
    pub fn new() -> Self {
        Self {
            setpoint_cutoff_hz: 0,
            throttle_cutoff_hz: 0,
            feedforward_cutoff_hz: 0,
            auto_factor_setpoint: 30,
            auto_factor_throttle: 30,
        }
    }

    fn is_auto(&self) -> bool {
        self.setpoint_cutoff_hz == 0
            || self.feedforward_cutoff_hz == 0
            || self.throttle_cutoff_hz == 0
    }
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Cutoff for a link with average frame interval `average_frame_us`.
///
/// Returns zero for an unknown interval.
pub fn auto_cutoff(average_frame_us: u32, smoothness: u8) -> u16 {
    if average_frame_us == 0 {
        return 0;
    }
    let factor = 1.5 / (1.0 + smoothness as f32 / 10.0);
    let link_hz = 1.0 / (average_frame_us as f32 * 1e-6);
    (link_hz * factor).round() as u16
}

/// Timing of the frame that produced a new setpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameTiming {
    /// A frame was received recently.
    pub signal_received: bool,
    /// The measured interval lies inside the trainable window.
    pub rate_valid: bool,
    /// Measured interval, constrained to the trainable window.
    pub refresh_period_us: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Training {
    sum: f32,
    count: u32,
    min: u32,
    max: u32,
}

impl Training {
    const fn new() -> Self {
        Self {
            sum: 0.0,
            count: 0,
            min: u32::MAX,
            max: 0,
        }
    }
}

/// Smoothing filters and frame-rate trainer.
#[derive(Debug, Clone, PartialEq)]
pub struct Smoothing {
    config: SmoothingConfig,
    dt: f32,
    started: bool,
    auto: bool,
    filter_initialized: bool,
    average_frame_time_us: u32,
    setpoint_cutoff_hz: u16,
    throttle_cutoff_hz: u16,
    feedforward_cutoff_hz: u16,
    training: Training,
    valid_frame_time_ms: u32,
    throttle: Pt3Filter,
    roll: Pt3Filter,
    pitch: Pt3Filter,
    yaw: Pt3Filter,
    to_smooth: Demands,
}

impl Smoothing {
    /// Creates smoothing for a control loop running every `dt` seconds.
    pub fn new(config: SmoothingConfig, dt: f32) -> Self {
        Self {
            config,
            dt,
            started: false,
            auto: config.is_auto(),
            filter_initialized: false,
            average_frame_time_us: 0,
            setpoint_cutoff_hz: config.setpoint_cutoff_hz,
            throttle_cutoff_hz: config.throttle_cutoff_hz,
            feedforward_cutoff_hz: 0,
            training: Training::new(),
            valid_frame_time_ms: 0,
            throttle: Pt3Filter::default(),
            roll: Pt3Filter::default(),
            pitch: Pt3Filter::default(),
            yaw: Pt3Filter::default(),
            to_smooth: Demands::default(),
        }
    }

    /// True once the filters are running.
    pub fn is_initialized(&self) -> bool {
        self.filter_initialized
    }

    /// Trained average frame interval, zero before training.
    pub fn average_frame_time_us(&self) -> u32 {
        self.average_frame_time_us
    }

    /// Current setpoint cutoff.
    pub fn setpoint_cutoff_hz(&self) -> u16 {
        self.setpoint_cutoff_hz
    }

    /// Current throttle cutoff.
    pub fn throttle_cutoff_hz(&self) -> u16 {
        self.throttle_cutoff_hz
    }

    /// Current feedforward cutoff.
    pub fn feedforward_cutoff_hz(&self) -> u16 {
        self.feedforward_cutoff_hz
    }

    fn start<F: FeedforwardFilter>(&mut self, feedforward: &mut F) {
        self.started = true;
        self.training = Training::new();

        self.feedforward_cutoff_hz = if self.config.feedforward_cutoff_hz == 0 {
            // until the link rate is known
            let factor = 1.5 / (1.0 + self.config.auto_factor_setpoint as f32 / 10.0);
            (FEEDFORWARD_INITIAL_HZ as f32 * factor).round() as u16
        } else {
            self.config.feedforward_cutoff_hz
        };

        if !self.auto {
            self.set_cutoffs(feedforward);
            self.filter_initialized = true;
        }
    }

    fn set_cutoffs<F: FeedforwardFilter>(&mut self, feedforward: &mut F) {
        let old_cutoff = self.setpoint_cutoff_hz;

        if self.config.setpoint_cutoff_hz == 0 {
            self.setpoint_cutoff_hz = CUTOFF_MIN_HZ.max(auto_cutoff(
                self.average_frame_time_us,
                self.config.auto_factor_setpoint,
            ));
        }
        if self.config.throttle_cutoff_hz == 0 {
            self.throttle_cutoff_hz = CUTOFF_MIN_HZ.max(auto_cutoff(
                self.average_frame_time_us,
                self.config.auto_factor_throttle,
            ));
        }

        if self.setpoint_cutoff_hz != old_cutoff || !self.filter_initialized {
            let throttle_k = pt3_gain(self.throttle_cutoff_hz as f32, self.dt);
            let setpoint_k = pt3_gain(self.setpoint_cutoff_hz as f32, self.dt);
            if self.filter_initialized {
                self.throttle.set_gain(throttle_k);
                for filter in [&mut self.roll, &mut self.pitch, &mut self.yaw] {
                    filter.set_gain(setpoint_k);
                }
            } else {
                self.throttle = Pt3Filter::new(throttle_k);
                self.roll = Pt3Filter::new(setpoint_k);
                self.pitch = Pt3Filter::new(setpoint_k);
                self.yaw = Pt3Filter::new(setpoint_k);
            }
            log::debug!(
                "smoothing cutoffs: setpoint {} Hz, throttle {} Hz",
                self.setpoint_cutoff_hz,
                self.throttle_cutoff_hz
            );
        }

        let old_cutoff = self.feedforward_cutoff_hz;
        if self.config.feedforward_cutoff_hz == 0 {
            self.feedforward_cutoff_hz = CUTOFF_MIN_HZ.max(auto_cutoff(
                self.average_frame_time_us,
                self.config.auto_factor_setpoint,
            ));
        }
        if !self.filter_initialized {
            feedforward.init_feedforward_lpf(self.feedforward_cutoff_hz);
        } else if self.feedforward_cutoff_hz != old_cutoff {
            feedforward.update_feedforward_lpf(self.feedforward_cutoff_hz);
        }
    }

    /// Adds one interval to the training block. Returns true when the block
    /// is complete and a new average has been set.
    fn accumulate(&mut self, frame_us: u32) -> bool {
        let training = &mut self.training;
        training.sum += frame_us as f32;
        training.count += 1;
        training.max = training.max.max(frame_us);
        training.min = training.min.min(frame_us);

        let limit = if self.filter_initialized {
            RETRAINING_SAMPLES
        } else {
            TRAINING_SAMPLES
        };

        if training.count >= limit {
            let sum = training.sum - training.min as f32 - training.max as f32;
            self.average_frame_time_us = (sum / (training.count - 2) as f32).round() as u32;
            self.training = Training::new();
            return true;
        }
        false
    }

    fn train<F: FeedforwardFilter>(
        &mut self,
        now_ms: u32,
        timing: FrameTiming,
        feedforward: &mut F,
    ) {
        if now_ms <= STARTUP_DELAY_MS {
            return;
        }

        if !(timing.signal_received && timing.rate_valid) {
            self.training = Training::new();
            return;
        }

        if self.valid_frame_time_ms == 0 {
            let guard = if self.filter_initialized {
                RETRAINING_DELAY_MS
            } else {
                TRAINING_DELAY_MS
            };
            self.valid_frame_time_ms = now_ms + guard;
        }

        if now_ms <= self.valid_frame_time_ms {
            return;
        }

        if self.filter_initialized {
            let average = self.average_frame_time_us as f32;
            let percent_change =
                ((timing.refresh_period_us as f32 - average) / average).abs() * 100.0;
            if percent_change < RATE_CHANGE_PERCENT {
                // a retrain needs a contiguous run of changed intervals
                self.training = Training::new();
                return;
            }
        }

        if self.accumulate(timing.refresh_period_us) {
            self.set_cutoffs(feedforward);
            self.filter_initialized = true;
            self.valid_frame_time_ms = 0;
        }
    }

    /// Runs once per control cycle. `sample` carries fresh setpoints (throttle
    /// as a shaped pulse) when a new frame has been decoded. Returns the
    /// smoothed values, or the latest raw ones while the filters are off.
    pub fn apply<F: FeedforwardFilter>(
        &mut self,
        now_us: u32,
        sample: Option<(Demands, FrameTiming)>,
        feedforward: &mut F,
    ) -> Demands {
        if !self.started {
            self.start(feedforward);
        }

        if let Some((demands, timing)) = sample {
            if self.auto {
                self.train(now_us / 1000, timing, feedforward);
            }
            self.to_smooth = demands;
        }

        if self.filter_initialized {
            Demands::new(
                self.throttle.apply(self.to_smooth.throttle),
                self.roll.apply(self.to_smooth.roll),
                self.pitch.apply(self.to_smooth.pitch),
                self.yaw.apply(self.to_smooth.yaw),
            )
        } else {
            self.to_smooth
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    #[derive(Default)]
    struct MockFeedforward {
        inits: u32,
        updates: u32,
        cutoff: u16,
    }

    impl FeedforwardFilter for MockFeedforward {
        fn init_feedforward_lpf(&mut self, cutoff_hz: u16) {
            self.inits += 1;
            self.cutoff = cutoff_hz;
        }

        fn update_feedforward_lpf(&mut self, cutoff_hz: u16) {
            self.updates += 1;
            self.cutoff = cutoff_hz;
        }
    }

    const DT: f32 = 1.0 / 8000.0;

    fn timing(period: u32) -> FrameTiming {
        FrameTiming {
            signal_received: true,
            rate_valid: true,
            refresh_period_us: period,
        }
    }

    /// Feeds frames every `period_us` from `*now_us` until `until_us`.
    fn feed(
        smoothing: &mut Smoothing,
        ff: &mut MockFeedforward,
        now_us: &mut u32,
        until_us: u32,
        period_us: u32,
    ) {
        while *now_us < until_us {
            let sample = Some((Demands::new(1000.0, 0.0, 0.0, 0.0), timing(period_us)));
            smoothing.apply(*now_us, sample, ff);
            *now_us += period_us;
        }
    }

    #[test]
    fn test_auto_cutoff() {
        // 50 Hz link, smoothness 30: 50 * 1.5 / 4 = 18.75
        assert_eq!(auto_cutoff(20_000, 30), 19);
        // 250 Hz link
        assert_eq!(auto_cutoff(4_000, 30), 94);
        assert_eq!(auto_cutoff(0, 30), 0);
    }

    /// Fixed cutoffs start filtering immediately.
    #[test]
    fn test_fixed_cutoffs_initialize_at_once() {
        let config = SmoothingConfig {
            setpoint_cutoff_hz: 50,
            throttle_cutoff_hz: 40,
            feedforward_cutoff_hz: 30,
            ..SmoothingConfig::new()
        };
        let mut smoothing = Smoothing::new(config, DT);
        let mut ff = MockFeedforward::default();
        let frame = (Demands::new(0.0, 100.0, 0.0, 0.0), timing(20_000));
        let out = smoothing.apply(0, Some(frame), &mut ff);
        assert!(smoothing.is_initialized());
        assert!(out.roll < 100.0, "Roll should be filtered.");
        assert_eq!(ff.inits, 1);
        assert_eq!(ff.cutoff, 30);
    }

    /// Automatic cutoffs pass raw values through until trained.
    #[test]
    fn test_auto_passes_through_until_trained() {
        let mut smoothing = Smoothing::new(SmoothingConfig::new(), DT);
        let mut ff = MockFeedforward::default();
        let frame = (Demands::new(1500.0, 100.0, -50.0, 7.0), timing(20_000));
        let out = smoothing.apply(0, Some(frame), &mut ff);
        assert!(!smoothing.is_initialized());
        assert!(value_close(100.0, out.roll));
        assert!(value_close(-50.0, out.pitch));
        assert!(value_close(1500.0, out.throttle));
        assert_eq!(smoothing.feedforward_cutoff_hz(), 38);
    }

    /// Training waits for power-on plus the guard, then averages 50 frames.
    #[test]
    fn test_initial_training() {
        let mut smoothing = Smoothing::new(SmoothingConfig::new(), DT);
        let mut ff = MockFeedforward::default();
        let mut now = 0;

        feed(&mut smoothing, &mut ff, &mut now, 6_000_000, 20_000);
        assert!(!smoothing.is_initialized(), "Guard time should not have expired.");

        feed(&mut smoothing, &mut ff, &mut now, 8_100_000, 20_000);
        assert!(smoothing.is_initialized());
        assert_eq!(smoothing.average_frame_time_us(), 20_000);
        assert_eq!(smoothing.setpoint_cutoff_hz(), 19);
        assert_eq!(smoothing.throttle_cutoff_hz(), 19);
        assert_eq!(ff.inits, 1);
        assert_eq!(ff.cutoff, 19);
    }

    /// A sustained rate change retrains; scattered outliers do not.
    #[test]
    fn test_retraining() {
        let mut smoothing = Smoothing::new(SmoothingConfig::new(), DT);
        let mut ff = MockFeedforward::default();
        let mut now = 0;
        feed(&mut smoothing, &mut ff, &mut now, 8_100_000, 20_000);
        assert!(smoothing.is_initialized());

        // alternate outliers never form a contiguous block
        for i in 0..200 {
            let period = if i % 2 == 0 { 4_000 } else { 20_000 };
            smoothing.apply(now, Some((Demands::default(), timing(period))), &mut ff);
            now += period;
        }
        assert_eq!(smoothing.average_frame_time_us(), 20_000);

        let until = now + 3_000_000;
        feed(&mut smoothing, &mut ff, &mut now, until, 4_000);
        assert_eq!(smoothing.average_frame_time_us(), 4_000);
        assert_eq!(smoothing.setpoint_cutoff_hz(), 94);
        assert_eq!(ff.updates, 1);
        assert_eq!(ff.cutoff, 94);
    }

    /// Invalid frame rates discard the partial training block.
    #[test]
    fn test_invalid_rate_resets_training() {
        let mut smoothing = Smoothing::new(SmoothingConfig::new(), DT);
        let mut ff = MockFeedforward::default();
        let mut now = 7_000_000;
        for i in 0..400 {
            let timing = FrameTiming {
                rate_valid: i % 10 != 0,
                ..timing(20_000)
            };
            smoothing.apply(now, Some((Demands::default(), timing)), &mut ff);
            now += 20_000;
        }
        assert!(!smoothing.is_initialized());
    }

    /// A constant input settles to itself once filtering.
    #[test]
    fn test_filtered_output_settles() {
        let config = SmoothingConfig {
            setpoint_cutoff_hz: 20,
            throttle_cutoff_hz: 20,
            feedforward_cutoff_hz: 20,
            ..SmoothingConfig::new()
        };
        let mut smoothing = Smoothing::new(config, DT);
        let mut ff = MockFeedforward::default();
        let target = Demands::new(0.6, 3.0, -3.0, 1.0);
        smoothing.apply(0, Some((target, timing(20_000))), &mut ff);
        let mut out = Demands::default();
        for i in 1..16_000 {
            out = smoothing.apply(i * 125, None, &mut ff);
        }
        assert!(value_close(3.0, out.roll));
        assert!(value_close(-3.0, out.pitch));
        assert!(value_close(0.6, out.throttle));
        assert!(value_close(1.0, out.yaw));
    }
}
