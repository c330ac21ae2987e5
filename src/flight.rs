// src/flight.rs

//! # Flight Core
//!
//! [`FlightCore`] owns every flight component and runs them against the
//! capabilities a board injects through [`Board`]: a clock, a spin strategy,
//! a channel source, an attitude source, a motor sink and a telemetry link.
//!
//! The board calls [`FlightCore::step`] from its main loop as often as it
//! can. Each call does at most two things:
//!
//! 1. If the next core deadline is close, spin to it and run the control
//!    cycle: gyro, demands, PID, demand constraint, mixer, motor write.
//!    Motors are written exactly once per control cycle, with the mixer
//!    output while armed and the safe outputs otherwise.
//! 2. If there is time left before the following deadline, run the
//!    highest-priority dynamic task that fits.

use crate::arming::{Arming, ArmingInputs, ArmingStatus};
use crate::clock::{Clock, SampleSignal, SampleStamp, SpinWait};
use crate::config::FlightConfig;
use crate::error::ConfigError;
use crate::failsafe::{Failsafe, FailsafePhase};
use crate::mixer::{Mixer, MAX_MOTORS};
use crate::pid::AnglePid;
use crate::receiver::{ChannelSource, Receiver};
use crate::scheduler::{Scheduler, TaskId, TASK_COUNT};
use crate::state::{Demands, VehicleState};
use crate::stats::GyroCalibration;

/// Roll and pitch PID sum limit.
pub const PID_SUM_LIMIT: f32 = 500.0;
/// Yaw PID sum limit.
pub const PID_SUM_LIMIT_YAW: f32 = 400.0;
/// PID sums are divided by this to form mixer inputs.
pub const PID_MIXER_SCALING: f32 = 1000.0;

/// Inertial sensor and attitude estimator.
pub trait AttitudeSource {
    /// Latest raw gyro sample, in sensor counts.
    fn gyro_raw(&mut self) -> [i16; 3];

    /// Runs the attitude estimator with calibrated rates in degrees per
    /// second.
    fn update_attitude(&mut self, now_us: u32, rates: [f32; 3]);

    /// Reads and integrates the accelerometer.
    fn update_accelerometer(&mut self, now_us: u32);

    /// Roll, pitch and yaw in degrees from the last estimate.
    fn angles(&self) -> [f32; 3];
}

/// Motor output driver.
pub trait MotorSink {
    /// Writes one value per configured motor.
    fn write(&mut self, outputs: &[f32]);
}

/// Telemetry and parameter link.
pub trait TelemetryLink {
    /// Services the link with the current flight state.
    fn run(&mut self, snapshot: &TelemetrySnapshot);
}

/// Flight state handed to the telemetry task.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TelemetrySnapshot {
    /// Coarse arming status.
    pub arming: ArmingStatus,
    /// Failsafe phase.
    pub failsafe_phase: FailsafePhase,
    /// True while failsafe is active.
    pub failsafe_active: bool,
    /// Mixer inputs of the last control cycle.
    pub demands: Demands,
    /// Last motor outputs; entries past `motor_count` are unused.
    pub motors: [f32; MAX_MOTORS],
    /// Number of motors.
    pub motor_count: usize,
    /// Vehicle state of the last control cycle.
    pub state: VehicleState,
    /// Core deadlines missed so far.
    pub missed_deadlines: u32,
    /// Overruns per dynamic task.
    pub task_overruns: [u32; TASK_COUNT],
    /// IMU samples signalled by the interrupt handler.
    pub imu_samples: u32,
}

/// Capabilities supplied by the board.
pub struct Board<'a, C, S, R, A, M, T> {
    /// Time source.
    pub clock: &'a C,
    /// Wait strategy for the core deadline.
    pub spin: S,
    /// Receiver.
    pub rx: R,
    /// IMU and attitude estimator.
    pub attitude: A,
    /// Motor driver.
    pub motors: M,
    /// Telemetry link.
    pub telemetry: T,
    /// Data-ready notification written by the IMU interrupt.
    pub sample_signal: &'a SampleSignal,
}

/// What one [`FlightCore::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepReport {
    /// The control cycle ran.
    pub core_ran: bool,
    /// The dynamic task that ran, if any.
    pub task: Option<TaskId>,
}

/// Limits and scales PID sums into mixer inputs. Yaw is negated to match
/// the mixer's spin convention.
pub fn constrain_demands(demands: &Demands) -> Demands {
    Demands::new(
        demands.throttle,
        demands.roll.clamp(-PID_SUM_LIMIT, PID_SUM_LIMIT) / PID_MIXER_SCALING,
        demands.pitch.clamp(-PID_SUM_LIMIT, PID_SUM_LIMIT) / PID_MIXER_SCALING,
        -demands.yaw.clamp(-PID_SUM_LIMIT_YAW, PID_SUM_LIMIT_YAW) / PID_MIXER_SCALING,
    )
}

/// The flight controller.
pub struct FlightCore<'a, C, S, R, A, M, T> {
    board: Board<'a, C, S, R, A, M, T>,
    scheduler: Scheduler,
    receiver: Receiver,
    arming: Arming,
    arming_status: ArmingStatus,
    failsafe: Failsafe,
    pid: AnglePid,
    mixer: Mixer,
    gyro: GyroCalibration,
    rates: [f32; 3],
    state: VehicleState,
    demands: Demands,
    motors: [f32; MAX_MOTORS],
    reset_pid: bool,
    last_sample: SampleStamp,
    imu_samples: u32,
}

impl<'a, C, S, R, A, M, T> FlightCore<'a, C, S, R, A, M, T>
where
    C: Clock,
    S: SpinWait<C>,
    R: ChannelSource,
    A: AttitudeSource,
    M: MotorSink,
    T: TelemetryLink,
{
    /// Validates `config` and builds the core. The first control deadline
    /// is one period after the clock's current cycle count.
    pub fn new(
        config: FlightConfig,
        board: Board<'a, C, S, R, A, M, T>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let scheduler = Scheduler::new(
            &config.scheduler,
            board.clock.cycles_per_second(),
            board.clock.cycles(),
        )?;
        let mixer = Mixer::new(config.motor_spins(), config.motors)?;
        let dt = config.scheduler.core_dt();
        let max_rate = config.receiver.rates.max_rate();
        let last_sample = board.sample_signal.read();

        log::info!(
            "flight core: {} motors, {} Hz control loop",
            mixer.motor_count(),
            config.scheduler.core_rate_hz
        );

        Ok(Self {
            board,
            scheduler,
            receiver: Receiver::new(config.receiver, dt),
            arming: Arming::new(config.arming),
            arming_status: ArmingStatus::Unready,
            failsafe: Failsafe::new(config.failsafe),
            pid: AnglePid::new(config.pid, max_rate, dt),
            motors: mixer.safe_outputs(),
            mixer,
            gyro: GyroCalibration::new(config.gyro),
            rates: [0.0; 3],
            state: VehicleState::default(),
            demands: Demands::default(),
            reset_pid: true,
            last_sample,
            imu_samples: 0,
        })
    }

    /// Injected capabilities.
    pub fn board(&self) -> &Board<'a, C, S, R, A, M, T> {
        &self.board
    }

    /// Injected capabilities, mutably.
    pub fn board_mut(&mut self) -> &mut Board<'a, C, S, R, A, M, T> {
        &mut self.board
    }

    /// Scheduler state.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Receiver pipeline.
    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    /// Arming state.
    pub fn arming(&self) -> &Arming {
        &self.arming
    }

    /// Arming status as of the last status update.
    pub fn arming_status(&self) -> ArmingStatus {
        self.arming_status
    }

    /// Failsafe state machine.
    pub fn failsafe(&self) -> &Failsafe {
        &self.failsafe
    }

    /// Control law.
    pub fn pid(&self) -> &AnglePid {
        &self.pid
    }

    /// Gyro bias estimator.
    pub fn gyro(&self) -> &GyroCalibration {
        &self.gyro
    }

    /// Motor outputs written by the last control cycle.
    pub fn motors(&self) -> &[f32] {
        &self.motors[..self.mixer.motor_count()]
    }

    /// Mixer inputs of the last control cycle.
    pub fn demands(&self) -> Demands {
        self.demands
    }

    /// Vehicle state of the last control cycle.
    pub fn vehicle_state(&self) -> VehicleState {
        self.state
    }

    /// IMU samples signalled so far.
    pub fn imu_samples(&self) -> u32 {
        self.imu_samples
    }

    /// Latest reading of the IMU data-ready signal.
    pub fn last_sample(&self) -> SampleStamp {
        self.last_sample
    }

    /// Current flight state for telemetry.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            arming: self.arming_status,
            failsafe_phase: self.failsafe.phase(),
            failsafe_active: self.failsafe.is_active(),
            demands: self.demands,
            motors: self.motors,
            motor_count: self.mixer.motor_count(),
            state: self.state,
            missed_deadlines: self.scheduler.missed_deadlines(),
            task_overruns: self.scheduler.task_overruns(),
            imu_samples: self.imu_samples,
        }
    }

    /// One pass of the main loop.
    pub fn step(&mut self) -> StepReport {
        let mut report = StepReport::default();
        let clock = self.board.clock;

        let now_cycles = clock.cycles();
        if self.scheduler.is_core_ready(now_cycles) {
            let target = self.scheduler.core_pre_update(now_cycles);
            self.board.spin.spin_until(clock, target);
            self.run_core(clock.micros());
            self.scheduler.core_post_update(clock.cycles());
            report.core_ran = true;
        }

        if self.scheduler.is_dynamic_ready(clock.cycles()) {
            report.task = self.run_dynamic_tasks(clock.micros());
        }

        report
    }

    fn arming_inputs(&self) -> ArmingInputs {
        ArmingInputs {
            imu_level: self.arming.is_level(&self.state),
            gyro_calibrating: self.gyro.is_calibrating(),
        }
    }

    fn update_arming_status(&mut self) {
        let inputs = self.arming_inputs();
        self.arming.update_status(self.receiver.raw(), inputs);
        let status = self.arming.status(self.failsafe.is_active());
        if status != self.arming_status {
            log::debug!("arming status {:?}", status);
        }
        self.arming_status = status;
    }

    fn run_core(&mut self, now_us: u32) {
        let stamp = self.board.sample_signal.read();
        self.imu_samples = self
            .imu_samples
            .wrapping_add(stamp.sequence.wrapping_sub(self.last_sample.sequence));
        self.last_sample = stamp;

        let raw = self.board.attitude.gyro_raw();
        self.gyro.push(raw);
        self.rates = if self.gyro.is_calibrating() {
            [0.0; 3]
        } else {
            self.gyro.apply(raw)
        };
        self.state = VehicleState::from_degrees(self.board.attitude.angles(), self.rates);

        let demands = self.receiver.get_demands(now_us, &mut self.pid);
        let armed = self.arming.is_armed();
        let corrected = self
            .pid
            .update(now_us, &demands, &self.state, self.reset_pid || !armed);
        self.demands = constrain_demands(&corrected);

        self.motors = if armed {
            self.mixer.run(&self.demands, self.failsafe.is_active())
        } else {
            self.mixer.safe_outputs()
        };
        self.board
            .motors
            .write(&self.motors[..self.mixer.motor_count()]);
    }

    fn run_dynamic_tasks(&mut self, now_us: u32) -> Option<TaskId> {
        let receiver = &mut self.receiver;
        let rx = &mut self.board.rx;
        let id = self
            .scheduler
            .select(now_us, |id, _| id == TaskId::Receiver && receiver.check(&mut *rx, now_us))?;

        match id {
            TaskId::Receiver => {
                self.update_arming_status();
                self.run_task(id)
            }
            TaskId::Attitude => {
                let ran = self.run_task(id);
                self.update_arming_status();
                ran
            }
            TaskId::Accelerometer | TaskId::Telemetry => self.run_task(id),
        }
    }

    fn run_task(&mut self, id: TaskId) -> Option<TaskId> {
        let clock = self.board.clock;
        let anticipated_end = self.scheduler.anticipated_end_cycles(id, clock.cycles())?;
        let start_us = clock.micros();

        match id {
            TaskId::Attitude => self.board.attitude.update_attitude(start_us, self.rates),
            TaskId::Receiver => {
                let inputs = self.arming_inputs();
                let result = self.receiver.poll(
                    start_us,
                    &self.board.rx,
                    inputs,
                    &mut self.arming,
                    &mut self.failsafe,
                );
                if let Some(reset) = result.pid_iterm_reset {
                    self.reset_pid = reset;
                }
            }
            TaskId::Accelerometer => self.board.attitude.update_accelerometer(start_us),
            TaskId::Telemetry => {
                let snapshot = self.snapshot();
                self.board.telemetry.run(&snapshot);
            }
        }

        self.scheduler
            .post_run(id, start_us, clock.micros(), clock.cycles(), anticipated_end);
        Some(id)
    }
}
