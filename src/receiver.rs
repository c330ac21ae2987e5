// src/receiver.rs

//! # Receiver Pipeline
//!
//! Turns raw channel frames into calibrated stick demands and link-health
//! events. The pipeline advances one state per receiver task run:
//!
//! - **Check**: asks the channel source for a frame and decides whether
//!   there is anything to process (new data, or the 15 Hz fallback).
//! - **Process**: applies range calibration, substitutes failsafe values
//!   for channels whose pulses stay invalid, reports link health to
//!   failsafe and runs the failsafe state machine.
//! - **Modes**: updates arming from the fresh channels.
//! - **Update**: converts the channels into stick commands.
//!
//! The control loop then calls [`Receiver::get_demands`] every cycle, which
//! maps the commands through the rate curve and the smoothing filters.

use crate::arming::{Arming, ArmingInputs};
use crate::clock::{cmp_time_ms, cmp_time_us};
use crate::failsafe::Failsafe;
use crate::state::Demands;
use bitflags::bitflags;

pub mod channels;
pub use channels::*;
pub mod rates;
pub use rates::*;
pub mod smoothing;
pub use smoothing::*;

/// Number of receiver channels.
pub const CHANNEL_COUNT: usize = 18;

/// Channel indices.
pub mod channel {
    /// Throttle.
    pub const THROTTLE: usize = 0;
    /// Roll.
    pub const ROLL: usize = 1;
    /// Pitch.
    pub const PITCH: usize = 2;
    /// Yaw.
    pub const YAW: usize = 3;
    /// First auxiliary switch.
    pub const AUX1: usize = 4;
    /// Second auxiliary switch.
    pub const AUX2: usize = 5;
    /// Number of flight channels, which get range calibration.
    pub const FLIGHT_CHANNELS: usize = 4;
}

/// Without a valid frame for this long, the signal counts as lost.
pub const NEED_SIGNAL_MAX_DELAY_US: u32 = 1_000_000 / 10;
/// Processing period when no frames arrive.
pub const FALLBACK_PERIOD_US: u32 = 1_000_000 / 15;
/// Invalid pulses are held for this long before substitution.
pub const MAX_INVALID_PULSE_MS: u32 = 300;
/// Shortest frame interval used for smoothing.
pub const SMOOTHING_RATE_MIN_US: u32 = 950;
/// Longest frame interval used for smoothing.
pub const SMOOTHING_RATE_MAX_US: u32 = 65_500;

bitflags! {
    /// Result of asking the channel source for a frame. Empty means pending.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FrameStatus: u8 {
        /// A complete frame was decoded.
        const COMPLETE = 1 << 0;
        /// The receiver flagged the frame as failsafe.
        const FAILSAFE = 1 << 1;
        /// The source needs its auxiliary processing run.
        const PROCESSING_REQUIRED = 1 << 2;
        /// The receiver reported a dropped frame.
        const DROPPED = 1 << 3;
    }
}

impl FrameStatus {
    /// Nothing new.
    pub const PENDING: Self = Self::empty();
}

/// Last frame written by the channel source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawFrame {
    /// Raw channel values in source units.
    pub channels: [u16; CHANNEL_COUNT],
    /// Source timestamp of the frame.
    pub timestamp_us: u32,
}

/// Receiver hardware or protocol decoder.
pub trait ChannelSource {
    /// Writes any new frame into `frame` and reports its status.
    fn check(&mut self, frame: &mut RawFrame) -> FrameStatus;

    /// Converts one raw channel to a pulse width in microseconds.
    fn convert(&self, frame: &RawFrame, channel: usize) -> f32 {
        frame.channels[channel] as f32
    }
}

/// Pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    /// Waiting for a frame.
    #[default]
    Check,
    /// Calibrating channels and updating failsafe.
    Process,
    /// Updating arming.
    Modes,
    /// Producing stick commands.
    Update,
}

/// Receiver settings.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReceiverConfig {
    /// Calibration of throttle, roll, pitch and yaw.
    pub ranges: [ChannelRange; channel::FLIGHT_CHANNELS],
    /// Substitution per channel.
    pub failsafe_modes: [ChannelFailsafe; CHANNEL_COUNT],
    /// Roll, pitch and yaw rate curve.
    pub rates: RateCurve,
    /// Throttle mid point, percent.
    pub throttle_mid: u8,
    /// Throttle expo, percent.
    pub throttle_expo: u8,
    /// Setpoint smoothing.
    pub smoothing: SmoothingConfig,
}

impl ReceiverConfig {
    /// Default receiver settings.
    pub fn new() -> Self {
        Self {
            ranges: [ChannelRange::new(); channel::FLIGHT_CHANNELS],
            failsafe_modes: default_failsafe_modes(),
            rates: RateCurve::new(),
            throttle_mid: 50,
            throttle_expo: 0,
            smoothing: SmoothingConfig::new(),
        }
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Calibrated channel values exposed after each poll.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RxAxes {
    /// Throttle, roll, pitch and yaw pulses.
    pub demands: Demands,
    /// First auxiliary pulse.
    pub aux1: f32,
    /// Second auxiliary pulse.
    pub aux2: f32,
}

/// Outcome of one [`Receiver::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PollResult {
    /// Set after a processed frame: whether the PID integrators should be
    /// reset (throttle down).
    pub pid_iterm_reset: Option<bool>,
    /// New stick commands are ready for [`Receiver::get_demands`].
    pub got_new_data: bool,
    /// Calibrated channels.
    pub axes: RxAxes,
}

/// Receiver pipeline state.
#[derive(Debug, Clone, PartialEq)]
pub struct Receiver {
    config: ReceiverConfig,
    state: PipelineState,
    frame: RawFrame,
    raw: [f32; CHANNEL_COUNT],
    command: [f32; channel::FLIGHT_CHANNELS],
    throttle_table: ThrottleTable,
    smoothing: Smoothing,
    auxiliary_processing_required: bool,
    data_processing_required: bool,
    got_new_data: bool,
    in_failsafe_mode: bool,
    signal_received: bool,
    is_rate_valid: bool,
    invalid_pulse_period: [u32; CHANNEL_COUNT],
    frame_time_delta_us: i32,
    last_rx_time_us: u32,
    need_signal_before: u32,
    next_update_at_us: u32,
    previous_frame_time_us: u32,
    refresh_period_us: u32,
}

impl Receiver {
    /// Creates a pipeline for a control loop running every `core_dt`
    /// seconds.
    pub fn new(config: ReceiverConfig, core_dt: f32) -> Self {
        Self {
            config,
            state: PipelineState::Check,
            frame: RawFrame::default(),
            raw: [0.0; CHANNEL_COUNT],
            command: [0.0; channel::FLIGHT_CHANNELS],
            throttle_table: ThrottleTable::new(config.throttle_mid, config.throttle_expo),
            smoothing: Smoothing::new(config.smoothing, core_dt),
            auxiliary_processing_required: false,
            data_processing_required: false,
            got_new_data: false,
            in_failsafe_mode: false,
            signal_received: false,
            is_rate_valid: false,
            invalid_pulse_period: [0; CHANNEL_COUNT],
            frame_time_delta_us: 0,
            last_rx_time_us: 0,
            need_signal_before: 0,
            next_update_at_us: 0,
            previous_frame_time_us: 0,
            refresh_period_us: 0,
        }
    }

    /// Current pipeline state.
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Calibrated channel pulses.
    pub fn raw(&self) -> &[f32; CHANNEL_COUNT] {
        &self.raw
    }

    /// True while frames keep arriving.
    pub fn signal_received(&self) -> bool {
        self.signal_received
    }

    /// Smoothing filters and trainer.
    pub fn smoothing(&self) -> &Smoothing {
        &self.smoothing
    }

    /// Measured frame interval, constrained to the smoothing window.
    pub fn refresh_period_us(&self) -> u32 {
        self.refresh_period_us
    }

    /// Decides whether the receiver task has work. Outside the check state
    /// there is always work, so the pipeline keeps advancing.
    pub fn check<S: ChannelSource>(&mut self, source: &mut S, now_us: u32) -> bool {
        if self.state != PipelineState::Check {
            return true;
        }

        let mut signal_received = false;
        let status = source.check(&mut self.frame);

        if status.contains(FrameStatus::COMPLETE) {
            self.in_failsafe_mode = status.contains(FrameStatus::FAILSAFE);
            let dropped = status.contains(FrameStatus::DROPPED);
            signal_received = !(self.in_failsafe_mode || dropped);
            if signal_received {
                self.need_signal_before = now_us.wrapping_add(NEED_SIGNAL_MAX_DELAY_US);
            }
        }

        if status.contains(FrameStatus::PROCESSING_REQUIRED) {
            self.auxiliary_processing_required = true;
        }

        if signal_received {
            self.signal_received = true;
        } else if cmp_time_us(now_us, self.need_signal_before) >= 0 {
            self.signal_received = false;
        }

        if signal_received || cmp_time_us(now_us, self.next_update_at_us) > 0 {
            self.data_processing_required = true;
        }

        self.data_processing_required || self.auxiliary_processing_required
    }

    /// Advances the pipeline by one state.
    pub fn poll<S: ChannelSource>(
        &mut self,
        now_us: u32,
        source: &S,
        inputs: ArmingInputs,
        arming: &mut Arming,
        failsafe: &mut Failsafe,
    ) -> PollResult {
        let mut result = PollResult::default();

        match self.state {
            PipelineState::Check => {
                self.state = PipelineState::Process;
            }

            PipelineState::Process => {
                if self.calculate_channels(now_us, source, arming, failsafe) {
                    result.pid_iterm_reset = Some(self.process_data(now_us, arming, failsafe));
                    self.state = PipelineState::Modes;
                } else {
                    self.state = PipelineState::Check;
                }
            }

            PipelineState::Modes => {
                arming.check(&self.raw, inputs);
                self.state = PipelineState::Update;
            }

            PipelineState::Update => {
                self.got_new_data = true;
                result.got_new_data = true;
                self.update_commands();
                arming.update_status(&self.raw, inputs);
                self.state = PipelineState::Check;
            }
        }

        result.axes = RxAxes {
            demands: Demands::new(
                self.raw[channel::THROTTLE],
                self.raw[channel::ROLL],
                self.raw[channel::PITCH],
                self.raw[channel::YAW],
            ),
            aux1: self.raw[channel::AUX1],
            aux2: self.raw[channel::AUX2],
        };

        result
    }

    /// Stick demands for this control cycle: throttle in `[0, 1]`, roll,
    /// pitch and yaw as rate setpoints in degrees per second.
    pub fn get_demands<F: FeedforwardFilter>(
        &mut self,
        now_us: u32,
        feedforward: &mut F,
    ) -> Demands {
        let sample = if self.got_new_data {
            self.got_new_data = false;
            let rates = &self.config.rates;
            let setpoints = Demands::new(
                self.command[channel::THROTTLE],
                rates.setpoint(self.command[channel::ROLL]),
                rates.setpoint(self.command[channel::PITCH]),
                rates.setpoint(self.command[channel::YAW]),
            );
            let timing = FrameTiming {
                signal_received: self.signal_received,
                rate_valid: self.is_rate_valid,
                refresh_period_us: self.refresh_period_us,
            };
            Some((setpoints, timing))
        } else {
            None
        };

        let smoothed = self.smoothing.apply(now_us, sample, feedforward);

        Demands::new(
            ((smoothed.throttle - PWM_MIN) / (PWM_MAX - PWM_MIN)).clamp(0.0, 1.0),
            smoothed.roll,
            smoothed.pitch,
            smoothed.yaw,
        )
    }

    fn calculate_channels<S: ChannelSource>(
        &mut self,
        now_us: u32,
        source: &S,
        arming: &mut Arming,
        failsafe: &mut Failsafe,
    ) -> bool {
        self.auxiliary_processing_required = false;

        if !self.data_processing_required {
            return false;
        }

        self.data_processing_required = false;
        self.next_update_at_us = now_us.wrapping_add(FALLBACK_PERIOD_US);

        let mut samples = [0.0; CHANNEL_COUNT];
        for (channel, sample) in samples.iter_mut().enumerate() {
            let value = source.convert(&self.frame, channel);
            *sample = match self.config.ranges.get(channel) {
                Some(range) => range.apply(value),
                None => value,
            };
        }

        self.apply_signal_loss(now_us, &samples, arming, failsafe);
        true
    }

    fn apply_signal_loss(
        &mut self,
        now_us: u32,
        samples: &[f32; CHANNEL_COUNT],
        arming: &mut Arming,
        failsafe: &mut Failsafe,
    ) {
        let now_ms = now_us / 1000;
        let use_value_from_rx = self.signal_received && !self.in_failsafe_mode;
        let mut flight_channels_valid = true;

        for (channel, &sample) in samples.iter().enumerate() {
            if use_value_from_rx && is_pulse_valid(sample) {
                self.invalid_pulse_period[channel] = now_ms.wrapping_add(MAX_INVALID_PULSE_MS);
                self.raw[channel] = sample;
            } else if cmp_time_ms(now_ms, self.invalid_pulse_period[channel]) >= 0 {
                // past the hold window
                self.raw[channel] =
                    self.config.failsafe_modes[channel].value(channel, self.raw[channel]);
                if channel < channel::FLIGHT_CHANNELS {
                    flight_channels_valid = false;
                }
            }
        }

        if flight_channels_valid {
            failsafe.on_valid_data_received(now_ms, arming);
        } else {
            self.in_failsafe_mode = true;
            failsafe.on_valid_data_failed(now_ms, arming);
            for channel in 0..CHANNEL_COUNT {
                self.raw[channel] =
                    self.config.failsafe_modes[channel].value(channel, self.raw[channel]);
            }
        }
    }

    fn frame_delta(&mut self, now_us: u32) -> (i32, i32) {
        let frame_time_us = self.frame.timestamp_us;
        let frame_age_us = cmp_time_us(now_us, frame_time_us);

        let delta_us = cmp_time_us(frame_time_us, self.previous_frame_time_us);
        if delta_us != 0 {
            self.frame_time_delta_us = delta_us;
            self.previous_frame_time_us = frame_time_us;
        }

        (self.frame_time_delta_us, frame_age_us)
    }

    fn process_data(&mut self, now_us: u32, arming: &mut Arming, failsafe: &mut Failsafe) -> bool {
        let (mut refresh_period_us, frame_age_us) = self.frame_delta(now_us);

        let since_last_rx = cmp_time_us(now_us, self.last_rx_time_us);
        if refresh_period_us == 0 || since_last_rx <= frame_age_us {
            // source gave no usable timestamps
            refresh_period_us = since_last_rx;
        }
        self.last_rx_time_us = now_us;

        let period = refresh_period_us as u32;
        self.is_rate_valid = (SMOOTHING_RATE_MIN_US..=SMOOTHING_RATE_MAX_US).contains(&period);
        self.refresh_period_us = refresh_period_us
            .clamp(SMOOTHING_RATE_MIN_US as i32, SMOOTHING_RATE_MAX_US as i32)
            as u32;

        let now_ms = now_us / 1000;
        if now_ms > failsafe.config().power_on_delay_ms && !failsafe.is_monitoring() {
            failsafe.start_monitoring();
        }

        failsafe.update(now_ms, &self.raw, arming);

        arming.throttle_is_down(&self.raw)
    }

    fn update_commands(&mut self) {
        for axis in [channel::ROLL, channel::PITCH, channel::YAW] {
            let sign = if axis == channel::YAW { -1.0 } else { 1.0 };
            self.command[axis] = stick_command(self.raw[axis], sign);
        }
        self.command[channel::THROTTLE] = self.throttle_table.apply(self.raw[channel::THROTTLE]);
    }
}
