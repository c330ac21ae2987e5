// src/stats.rs

//! # Statistics Module
//!
//! Running mean and standard deviation, and the gyro bias calibration built
//! on top of them.
//!
//! Calibration averages a fixed window of raw samples on each axis. If any
//! axis moves too much during the window the vehicle is not at rest, so the
//! window is thrown away and started again. The flight law only sees a bias
//! once a quiet window has completed.

use num_traits::Float;

/// Running mean and variance using Welford's method.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RunningStats {
    count: u32,
    mean: f32,
    m2: f32,
}

impl RunningStats {
    /// Creates an empty accumulator.
    pub const fn new() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
        }
    }

    /// Discards all samples.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Adds one sample.
    pub fn push(&mut self, value: f32) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f32;
        self.m2 += delta * (value - self.mean);
    }

    /// Number of samples so far.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Mean of the samples, zero when empty.
    pub fn mean(&self) -> f32 {
        self.mean
    }

    /// Sample variance, zero with fewer than two samples.
    pub fn variance(&self) -> f32 {
        if self.count > 1 {
            self.m2 / (self.count - 1) as f32
        } else {
            0.0
        }
    }

    /// Sample standard deviation.
    pub fn stdev(&self) -> f32 {
        self.variance().sqrt()
    }
}

/// Gyro calibration settings.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GyroConfig {
    /// Samples per calibration window.
    pub calibration_samples: u32,
    /// Largest standard deviation, in raw counts, accepted for a window.
    pub moron_threshold: f32,
    /// Raw counts to degrees per second.
    pub scale: f32,
}

impl GyroConfig {
    /// Default calibration settings: 1 s of samples at 8 kHz.
    pub fn new() -> Self {
        Self {
            calibration_samples: 8000,
            moron_threshold: 48.0,
            scale: 2000.0 / 32768.0,
        }
    }
}

impl Default for GyroConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Gyro zero-rate bias estimator.
#[derive(Debug, Clone, PartialEq)]
pub struct GyroCalibration {
    config: GyroConfig,
    axes: [RunningStats; 3],
    bias: [f32; 3],
    complete: bool,
    restarts: u32,
}

impl GyroCalibration {
    /// Creates a calibration that has not yet seen any samples.
    pub fn new(config: GyroConfig) -> Self {
        Self {
            config,
            axes: [RunningStats::new(); 3],
            bias: [0.0; 3],
            complete: false,
            restarts: 0,
        }
    }

    /// True until a quiet window has completed.
    pub fn is_calibrating(&self) -> bool {
        !self.complete
    }

    /// Completed bias per axis, in raw counts.
    pub fn bias(&self) -> [f32; 3] {
        self.bias
    }

    /// Number of windows discarded because the vehicle moved.
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    /// Feeds one raw sample. Does nothing once calibration has completed.
    pub fn push(&mut self, raw: [i16; 3]) {
        if self.complete {
            return;
        }

        for (stats, value) in self.axes.iter_mut().zip(raw) {
            stats.push(value as f32);
        }

        if self.axes[0].count() < self.config.calibration_samples {
            return;
        }

        if self
            .axes
            .iter()
            .any(|stats| stats.stdev() > self.config.moron_threshold)
        {
            self.restarts += 1;
            log::warn!("gyro moved during calibration, restarting");
            self.axes.iter_mut().for_each(RunningStats::clear);
            return;
        }

        for (bias, stats) in self.bias.iter_mut().zip(self.axes.iter()) {
            *bias = stats.mean();
        }
        self.complete = true;
        log::info!("gyro calibrated: bias {:?}", self.bias);
    }

    /// Removes the bias and converts to degrees per second.
    pub fn apply(&self, raw: [i16; 3]) -> [f32; 3] {
        let mut out = [0.0; 3];
        for ((out, raw), bias) in out.iter_mut().zip(raw).zip(self.bias) {
            *out = (raw as f32 - bias) * self.config.scale;
        }
        out
    }

    /// Starts a new calibration, e.g. on a user request while disarmed.
    pub fn restart(&mut self) {
        self.axes.iter_mut().for_each(RunningStats::clear);
        self.complete = false;
    }
}
