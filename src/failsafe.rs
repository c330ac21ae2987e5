// src/failsafe.rs

//! # Failsafe Module
//!
//! Link-loss supervision. The receiver reports every processed frame as
//! valid or failed; failsafe debounces those reports into a link state and,
//! while monitoring, runs a six-phase state machine once per receiver cycle.
//!
//! ## Phases
//!
//! ```text
//! IDLE ──link lost──▶ RX_LOSS_DETECTED ──still lost──▶ LANDED
//!   ▲                        │                           │ disarm
//!   │                  link back                         ▼
//!   └── RX_LOSS_RECOVERED ◀──┴──── link back long ── RX_LOSS_MONITORING
//! ```
//!
//! Activation passes through `LANDING` but immediately forces `LANDED`: no
//! descent is flown and the vehicle is dropped. `LANDING` is kept as a
//! phase so that an auto-landing procedure has a place to live.
//!
//! Several transitions are instantaneous, so one [`Failsafe::update`] keeps
//! stepping until a phase asks to stop. The loop is capped at the number of
//! phases, which is enough for the longest chain.

use crate::arming::Arming;
use crate::clock::cmp_time_ms;
use crate::receiver::{channel, CHANNEL_COUNT};

/// Number of distinct failsafe phases.
pub const PHASE_COUNT: usize = 6;

/// Failsafe state machine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FailsafePhase {
    /// Link healthy or vehicle disarmed.
    #[default]
    Idle,
    /// Link lost while armed.
    RxLossDetected,
    /// Placeholder for a controlled descent.
    Landing,
    /// Vehicle is down; disarm next.
    Landed,
    /// Disarmed, waiting for a sustained link.
    RxLossMonitoring,
    /// Link back; returning to idle.
    RxLossRecovered,
}

/// What the failsafe switch does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SwitchMode {
    /// Switch ignored.
    #[default]
    Stage1,
    /// Switch on kills the motors immediately.
    Kill,
    /// Switch on is treated as a lost link.
    Stage2,
}

/// Failsafe timing.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FailsafeConfig {
    /// Failed data for longer than this declares the link down.
    pub rx_data_failure_ms: u32,
    /// Valid data for longer than this declares the link up.
    pub rx_data_recovery_ms: u32,
    /// Time after power-on before monitoring starts.
    pub power_on_delay_ms: u32,
    /// Throttle-low grace window while armed.
    pub throttle_low_delay_ms: u32,
    /// Landing deadline after activation.
    pub landing_time_ms: u32,
    /// Valid data required to recover after a kill-switch activation.
    pub kill_receiving_period_ms: u32,
    /// Valid data required to recover after a link timeout.
    pub timeout_receiving_period_ms: u32,
    /// Failsafe switch behavior.
    pub switch_mode: SwitchMode,
    /// Channel carrying the failsafe switch.
    pub switch_channel: usize,
    /// Pulse above which the failsafe switch is on.
    pub switch_on_us: f32,
}

impl FailsafeConfig {
    /// Default timing.
    pub fn new() -> Self {
        Self {
            rx_data_failure_ms: 200 + 400,
            rx_data_recovery_ms: 200 + 2000,
            power_on_delay_ms: 5000,
            throttle_low_delay_ms: 10_000,
            landing_time_ms: 1000,
            kill_receiving_period_ms: 1000,
            timeout_receiving_period_ms: 3000,
            switch_mode: SwitchMode::Stage1,
            switch_channel: channel::AUX2,
            switch_on_us: 1200.0,
        }
    }
}

impl Default for FailsafeConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Phases visited by one [`Failsafe::update`], starting with the phase it
/// was entered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTrace {
    phases: [FailsafePhase; PHASE_COUNT + 1],
    len: usize,
}

impl PhaseTrace {
    fn start(phase: FailsafePhase) -> Self {
        let mut phases = [FailsafePhase::Idle; PHASE_COUNT + 1];
        phases[0] = phase;
        Self { phases, len: 1 }
    }

    fn push(&mut self, phase: FailsafePhase) {
        if self.len < self.phases.len() && self.phases[self.len - 1] != phase {
            self.phases[self.len] = phase;
            self.len += 1;
        }
    }

    /// Visited phases in order.
    pub fn as_slice(&self) -> &[FailsafePhase] {
        &self.phases[..self.len]
    }

    /// Phase on exit.
    pub fn last(&self) -> FailsafePhase {
        self.phases[self.len - 1]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxLink {
    Down,
    Up,
}

/// Failsafe state.
#[derive(Debug, Clone, PartialEq)]
pub struct Failsafe {
    config: FailsafeConfig,
    events: u16,
    monitoring: bool,
    active: bool,
    valid_rx_data_received_at: u32,
    valid_rx_data_failed_at: u32,
    throttle_low_period: u32,
    landing_should_be_finished_at: u32,
    receiving_rx_data_period: u32,
    receiving_rx_data_period_preset: u32,
    phase: FailsafePhase,
    rx_link: RxLink,
}

impl Failsafe {
    /// Creates an idle, non-monitoring failsafe with the link down.
    pub fn new(config: FailsafeConfig) -> Self {
        let mut failsafe = Self {
            config,
            events: 0,
            monitoring: false,
            active: false,
            valid_rx_data_received_at: 0,
            valid_rx_data_failed_at: 0,
            throttle_low_period: 0,
            landing_should_be_finished_at: 0,
            receiving_rx_data_period: 0,
            receiving_rx_data_period_preset: 0,
            phase: FailsafePhase::Idle,
            rx_link: RxLink::Down,
        };
        failsafe.reset();
        failsafe
    }

    /// Returns the timers and phase to their initial values.
    pub fn reset(&mut self) {
        self.valid_rx_data_received_at = 0;
        self.valid_rx_data_failed_at = 0;
        self.throttle_low_period = 0;
        self.landing_should_be_finished_at = 0;
        self.receiving_rx_data_period = 0;
        self.receiving_rx_data_period_preset = 0;
        self.phase = FailsafePhase::Idle;
        self.rx_link = RxLink::Down;
    }

    /// Timing in use.
    pub fn config(&self) -> &FailsafeConfig {
        &self.config
    }

    /// Starts running the state machine on [`Failsafe::update`].
    pub fn start_monitoring(&mut self) {
        self.monitoring = true;
    }

    /// True once monitoring has started.
    pub fn is_monitoring(&self) -> bool {
        self.monitoring
    }

    /// True between activation and recovery.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Current phase.
    pub fn phase(&self) -> FailsafePhase {
        self.phase
    }

    /// Number of activations so far.
    pub fn events(&self) -> u16 {
        self.events
    }

    /// Deadline set by the last activation for a landing to complete.
    pub fn landing_deadline_ms(&self) -> u32 {
        self.landing_should_be_finished_at
    }

    /// True when the debounced link state is up.
    pub fn is_receiving(&self) -> bool {
        self.rx_link == RxLink::Up
    }

    /// A frame with a failed flight channel was processed.
    pub fn on_valid_data_failed(&mut self, now_ms: u32, arming: &mut Arming) {
        arming.set_rx_failsafe(false);
        self.valid_rx_data_failed_at = now_ms;
        if now_ms.wrapping_sub(self.valid_rx_data_received_at) > self.config.rx_data_failure_ms {
            self.rx_link = RxLink::Down;
        }
    }

    /// A frame with all flight channels valid was processed.
    pub fn on_valid_data_received(&mut self, now_ms: u32, arming: &mut Arming) {
        self.valid_rx_data_received_at = now_ms;
        if now_ms.wrapping_sub(self.valid_rx_data_failed_at) > self.config.rx_data_recovery_ms {
            self.rx_link = RxLink::Up;
            arming.set_rx_failsafe(true);
        }
    }

    fn switch_is_on(&self, raw: &[f32; CHANNEL_COUNT]) -> bool {
        raw[self.config.switch_channel] > self.config.switch_on_us
    }

    fn activate(&mut self, now_ms: u32) {
        self.active = true;
        self.phase = FailsafePhase::Landing;
        self.landing_should_be_finished_at = now_ms.wrapping_add(self.config.landing_time_ms);
        self.events = self.events.wrapping_add(1);
        log::info!("failsafe activated");
    }

    /// Runs the state machine. Does nothing until monitoring has started.
    pub fn update(
        &mut self,
        now_ms: u32,
        raw: &[f32; CHANNEL_COUNT],
        arming: &mut Arming,
    ) -> PhaseTrace {
        let mut trace = PhaseTrace::start(self.phase);

        if !self.monitoring {
            return trace;
        }

        let switch_on = self.switch_is_on(raw);
        let kill = self.config.switch_mode == SwitchMode::Kill && switch_on;
        let receiving = self.is_receiving()
            && !(self.config.switch_mode == SwitchMode::Stage2 && switch_on);

        for _ in 0..PHASE_COUNT {
            let reprocess = self.step(now_ms, raw, arming, receiving, kill);
            trace.push(self.phase);
            if !reprocess {
                break;
            }
        }

        trace
    }

    fn step(
        &mut self,
        now_ms: u32,
        raw: &[f32; CHANNEL_COUNT],
        arming: &mut Arming,
        receiving: bool,
        kill: bool,
    ) -> bool {
        let from = self.phase;
        let reprocess = match self.phase {
            FailsafePhase::Idle => {
                if arming.is_armed() {
                    if !arming.throttle_is_down(raw) {
                        self.throttle_low_period =
                            now_ms.wrapping_add(self.config.throttle_low_delay_ms);
                    }
                    if kill {
                        self.activate(now_ms);
                        // no descent: drop straight to landed
                        self.phase = FailsafePhase::Landed;
                        self.receiving_rx_data_period_preset =
                            self.config.kill_receiving_period_ms;
                        true
                    } else if !receiving {
                        if cmp_time_ms(now_ms, self.throttle_low_period) > 0 {
                            self.activate(now_ms);
                            self.phase = FailsafePhase::Landed;
                            self.receiving_rx_data_period_preset =
                                self.config.timeout_receiving_period_ms;
                        } else {
                            self.phase = FailsafePhase::RxLossDetected;
                        }
                        true
                    } else {
                        false
                    }
                } else {
                    self.throttle_low_period = 0;
                    false
                }
            }

            FailsafePhase::RxLossDetected => {
                if receiving {
                    self.phase = FailsafePhase::RxLossRecovered;
                    true
                } else {
                    self.activate(now_ms);
                    self.phase = FailsafePhase::Landed;
                    self.receiving_rx_data_period_preset =
                        self.config.timeout_receiving_period_ms;
                    false
                }
            }

            FailsafePhase::Landing => false,

            FailsafePhase::Landed => {
                arming.force_disarm();
                self.receiving_rx_data_period =
                    now_ms.wrapping_add(self.receiving_rx_data_period_preset);
                self.phase = FailsafePhase::RxLossMonitoring;
                true
            }

            FailsafePhase::RxLossMonitoring => {
                if receiving {
                    if cmp_time_ms(now_ms, self.receiving_rx_data_period) > 0
                        && !arming.is_armed()
                    {
                        self.phase = FailsafePhase::RxLossRecovered;
                        true
                    } else {
                        false
                    }
                } else {
                    self.receiving_rx_data_period =
                        now_ms.wrapping_add(self.receiving_rx_data_period_preset);
                    false
                }
            }

            FailsafePhase::RxLossRecovered => {
                self.throttle_low_period =
                    now_ms.wrapping_add(self.config.throttle_low_delay_ms);
                self.phase = FailsafePhase::Idle;
                self.active = false;
                arming.clear_failsafe_lockout();
                log::info!("failsafe recovered");
                true
            }
        };

        if from != self.phase {
            log::debug!("failsafe {:?} -> {:?}", from, self.phase);
        }

        reprocess
    }
}
