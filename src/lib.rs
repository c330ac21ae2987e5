// src/lib.rs

//! # Multirotor Flight Control Core
//!
//! This crate provides a `no_std`, no-alloc flight control core for small
//! multirotor aircraft. Every control cycle it turns receiver commands and
//! gyro samples into motor outputs, while a cooperative scheduler runs the
//! lower-rate tasks in the time left over.
//!
//! The pieces, leaf to root:
//!
//! - [`clock`] and [`stats`]: time capabilities, wrap-safe comparisons and
//!   gyro calibration.
//! - [`filter`]: PT1/PT2/PT3 low-pass filters with runtime cutoff changes.
//! - [`receiver`]: channel calibration, signal loss, rate curves and
//!   smoothing, as a four-state pipeline.
//! - [`arming`] and [`failsafe`]: arming gate and link-loss supervision.
//! - [`pid`]: the cascaded angle/rate control law.
//! - [`mixer`]: per-motor outputs.
//! - [`scheduler`]: control deadlines and dynamic task selection.
//! - [`flight`]: [`FlightCore`], which ties it all to the board.

#![no_std]
#![deny(missing_docs)]

pub mod arming;
pub mod clock;
pub mod config;
pub mod error;
pub mod failsafe;
pub mod filter;
pub mod flight;
pub mod mixer;
pub mod pid;
pub mod receiver;
pub mod scheduler;
pub mod state;
pub mod stats;

#[doc(inline)]
pub use config::FlightConfig;
#[doc(inline)]
pub use error::ConfigError;
#[doc(inline)]
pub use flight::{AttitudeSource, Board, FlightCore, MotorSink, TelemetryLink};
#[doc(inline)]
pub use state::{Demands, VehicleState};

#[cfg(test)]
mod test_utils;
