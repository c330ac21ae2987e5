// src/scheduler.rs

//! # Scheduler Module
//!
//! Cooperative, cycle-counter driven scheduling of the fixed-rate core task
//! and the dynamic tasks.
//!
//! The core task deadline advances by exactly one period per run from the
//! previous deadline, never from "now", so timing errors do not accumulate.
//! The caller spins only for the residual cycles once the counter is inside
//! the start window. That window adapts: it grows when the scheduler is
//! re-entered too late and shrinks slowly otherwise.
//!
//! Between core runs at most one dynamic task runs per invocation. Each
//! task reports a dynamic priority from its age; the highest wins, ties going
//! to the earlier task in [`TaskId::ALL`]. The winner only runs if its
//! anticipated duration, plus a guard margin, fits before the next core
//! deadline. Tasks that keep ending late are counted and reported.

use crate::clock::{cmp_cycles, micros_to_cycles};
use crate::error::ConfigError;

pub mod task;
pub use task::*;

/// Least time before the deadline at which spinning may start.
pub const SCHED_START_LOOP_MIN_US: u32 = 1;
/// Most time before the deadline at which spinning may start.
pub const SCHED_START_LOOP_MAX_US: u32 = 12;
/// The start window shrinks by one microsecond divided by this.
pub const SCHED_START_LOOP_DOWN_STEP: u32 = 50;
/// The start window grows by one microsecond divided by this.
pub const SCHED_START_LOOP_UP_STEP: u32 = 1;
/// Smallest margin added to a task's anticipated duration.
pub const TASK_GUARD_MARGIN_MIN_US: u32 = 3;
/// Largest margin added to a task's anticipated duration.
pub const TASK_GUARD_MARGIN_MAX_US: u32 = 6;
/// The task guard shrinks by one microsecond divided by this.
pub const TASK_GUARD_MARGIN_DOWN_STEP: u32 = 50;
/// The task guard grows by one microsecond divided by this.
pub const TASK_GUARD_MARGIN_UP_STEP: u32 = 1;
/// Time allowed for a task's readiness check.
pub const CHECK_GUARD_MARGIN_US: u32 = 2;

/// Task rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SchedulerConfig {
    /// Core task (control loop) rate.
    pub core_rate_hz: u32,
    /// Attitude estimation rate.
    pub attitude_rate_hz: u32,
    /// Receiver task rate, used for aging once signalled.
    pub receiver_rate_hz: u32,
    /// Accelerometer rate.
    pub accelerometer_rate_hz: u32,
    /// Telemetry rate.
    pub telemetry_rate_hz: u32,
}

impl SchedulerConfig {
    /// An 8 kHz control loop.
    pub fn new() -> Self {
        Self {
            core_rate_hz: 8000,
            attitude_rate_hz: 100,
            receiver_rate_hz: 33,
            accelerometer_rate_hz: 1000,
            telemetry_rate_hz: 100,
        }
    }

    /// Rate of a dynamic task.
    pub fn task_rate_hz(&self, id: TaskId) -> u32 {
        match id {
            TaskId::Attitude => self.attitude_rate_hz,
            TaskId::Receiver => self.receiver_rate_hz,
            TaskId::Accelerometer => self.accelerometer_rate_hz,
            TaskId::Telemetry => self.telemetry_rate_hz,
        }
    }

    /// Core task period in seconds.
    pub fn core_dt(&self) -> f32 {
        1.0 / self.core_rate_hz as f32
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Highest-priority candidate seen so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Prioritizer {
    /// Selected task.
    pub id: Option<TaskId>,
    /// Its dynamic priority.
    pub priority: u16,
}

impl Prioritizer {
    /// Takes `id` if it beats the current candidate.
    pub fn consider(&mut self, id: TaskId, priority: u16) {
        if priority > self.priority {
            self.id = Some(id);
            self.priority = priority;
        }
    }
}

/// An adaptive margin kept in cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    cycles: i32,
    min: i32,
    max: i32,
    down: i32,
    up: i32,
}

impl Window {
    fn new(min_us: u32, max_us: u32, down_step: u32, up_step: u32, cycles_per_second: u32) -> Self {
        let one_us = micros_to_cycles(1, cycles_per_second) as i32;
        let min = micros_to_cycles(min_us, cycles_per_second) as i32;
        Self {
            cycles: min,
            min,
            max: micros_to_cycles(max_us, cycles_per_second) as i32,
            down: (one_us / down_step as i32).max(1),
            up: (one_us / up_step as i32).max(1),
        }
    }

    fn grow(&mut self) {
        if self.cycles < self.max {
            self.cycles = (self.cycles + self.up).min(self.max);
        }
    }

    fn shrink(&mut self) {
        if self.cycles > self.min {
            self.cycles = (self.cycles - self.down).max(self.min);
        }
    }
}

/// Core deadline tracking and dynamic task selection.
#[derive(Debug, Clone, PartialEq)]
pub struct Scheduler {
    cycles_per_second: u32,
    period_cycles: i32,
    last_target_cycles: u32,
    next_target_cycles: u32,
    loop_start: Window,
    task_guard: Window,
    check_cycles: i32,
    core_runs: u32,
    missed_deadlines: u32,
    tasks: [Task; TASK_COUNT],
}

impl Scheduler {
    /// Creates a scheduler whose first core deadline is one period after
    /// `start_cycles`.
    pub fn new(
        config: &SchedulerConfig,
        cycles_per_second: u32,
        start_cycles: u32,
    ) -> Result<Self, ConfigError> {
        if config.core_rate_hz == 0 {
            return Err(ConfigError::ControlPeriod);
        }
        let period_cycles = cycles_per_second / config.core_rate_hz;
        let loop_start = Window::new(
            SCHED_START_LOOP_MIN_US,
            SCHED_START_LOOP_MAX_US,
            SCHED_START_LOOP_DOWN_STEP,
            SCHED_START_LOOP_UP_STEP,
            cycles_per_second,
        );
        if period_cycles > i32::MAX as u32 || period_cycles as i32 <= loop_start.max {
            return Err(ConfigError::CoreRate {
                rate_hz: config.core_rate_hz,
                cycles_per_second,
            });
        }

        let task = |id: TaskId| Task::new(id, config.task_rate_hz(id));

        Ok(Self {
            cycles_per_second,
            period_cycles: period_cycles as i32,
            last_target_cycles: start_cycles,
            next_target_cycles: start_cycles.wrapping_add(period_cycles),
            loop_start,
            task_guard: Window::new(
                TASK_GUARD_MARGIN_MIN_US,
                TASK_GUARD_MARGIN_MAX_US,
                TASK_GUARD_MARGIN_DOWN_STEP,
                TASK_GUARD_MARGIN_UP_STEP,
                cycles_per_second,
            ),
            check_cycles: micros_to_cycles(CHECK_GUARD_MARGIN_US, cycles_per_second) as i32,
            core_runs: 0,
            missed_deadlines: 0,
            tasks: [
                task(TaskId::Attitude)?,
                task(TaskId::Receiver)?,
                task(TaskId::Accelerometer)?,
                task(TaskId::Telemetry)?,
            ],
        })
    }

    /// Core period in cycles.
    pub fn period_cycles(&self) -> u32 {
        self.period_cycles as u32
    }

    /// Deadline of the next core run.
    pub fn target_cycles(&self) -> u32 {
        self.next_target_cycles
    }

    /// Deadline of the last core run.
    pub fn last_target_cycles(&self) -> u32 {
        self.last_target_cycles
    }

    /// Current start window in cycles.
    pub fn loop_start_cycles(&self) -> i32 {
        self.loop_start.cycles
    }

    /// Current task guard in cycles.
    pub fn task_guard_cycles(&self) -> i32 {
        self.task_guard.cycles
    }

    /// Completed core runs.
    pub fn core_runs(&self) -> u32 {
        self.core_runs
    }

    /// Core deadlines missed or skipped.
    pub fn missed_deadlines(&self) -> u32 {
        self.missed_deadlines
    }

    /// Dynamic task record.
    pub fn task(&self, id: TaskId) -> &Task {
        &self.tasks[id.index()]
    }

    /// Overrun counts of every dynamic task, in [`TaskId::ALL`] order.
    pub fn task_overruns(&self) -> [u32; TASK_COUNT] {
        let mut overruns = [0; TASK_COUNT];
        for (count, task) in overruns.iter_mut().zip(&self.tasks) {
            *count = task.overruns();
        }
        overruns
    }

    fn remaining_cycles(&self, now_cycles: u32) -> i32 {
        cmp_cycles(self.next_target_cycles, now_cycles)
    }

    /// True once the counter is inside the start window of the next core
    /// deadline.
    pub fn is_core_ready(&self, now_cycles: u32) -> bool {
        self.remaining_cycles(now_cycles) < self.loop_start.cycles
    }

    /// Prepares a core run and returns the deadline to spin to.
    ///
    /// If a whole period or more has been lost, the deadline moves forward by
    /// whole periods, staying on the deadline grid, and the skipped runs
    /// count as missed.
    pub fn core_pre_update(&mut self, now_cycles: u32) -> u32 {
        let mut remaining = self.remaining_cycles(now_cycles);

        if remaining < -self.period_cycles {
            let skipped = 1 + (-remaining / self.period_cycles) as u32;
            self.next_target_cycles = self
                .next_target_cycles
                .wrapping_add(skipped.wrapping_mul(self.period_cycles as u32));
            self.missed_deadlines = self.missed_deadlines.wrapping_add(skipped);
            log::warn!("core task skipped {} periods", skipped);
            remaining = self.remaining_cycles(now_cycles);
        }

        // re-entered late: start spinning earlier
        if remaining < self.loop_start.min {
            self.loop_start.grow();
        } else {
            self.loop_start.shrink();
        }

        self.next_target_cycles
    }

    /// Closes a core run that finished at `now_cycles` and schedules the
    /// next deadline.
    pub fn core_post_update(&mut self, now_cycles: u32) {
        self.last_target_cycles = self.next_target_cycles;
        self.next_target_cycles = self
            .next_target_cycles
            .wrapping_add(self.period_cycles as u32);
        self.core_runs = self.core_runs.wrapping_add(1);

        if self.remaining_cycles(now_cycles) < 0 {
            self.missed_deadlines = self.missed_deadlines.wrapping_add(1);
            log::warn!("core deadline missed");
        }
    }

    /// True when there is room for a dynamic task before the next core run.
    pub fn is_dynamic_ready(&self, now_cycles: u32) -> bool {
        self.remaining_cycles(now_cycles) > self.task_guard.cycles
    }

    /// Prioritizes every dynamic task and returns the winner. `check` is the
    /// readiness check of event-driven tasks.
    pub fn select<F>(&mut self, now_us: u32, mut check: F) -> Option<TaskId>
    where
        F: FnMut(TaskId, u32) -> bool,
    {
        let mut prioritizer = Prioritizer::default();
        for task in self.tasks.iter_mut() {
            let id = task.id();
            let priority = task.prioritize(now_us, |since_last_us| check(id, since_last_us));
            prioritizer.consider(id, priority);
        }
        prioritizer.id
    }

    /// Cycle count at which `id` is expected to finish if started at
    /// `now_cycles`, or `None` if it does not fit before the next core
    /// deadline. A task that does not fit is expedited for next time.
    pub fn anticipated_end_cycles(&mut self, id: TaskId, now_cycles: u32) -> Option<u32> {
        let remaining = self.remaining_cycles(now_cycles) - self.task_guard.cycles;
        let task = &mut self.tasks[id.index()];
        let required = micros_to_cycles(task.required_time_us(), self.cycles_per_second) as i32
            + self.check_cycles
            + self.task_guard.cycles;

        if required < remaining {
            Some(now_cycles.wrapping_add(required as u32))
        } else {
            task.expedite();
            None
        }
    }

    /// Records a dynamic task run and tunes the task guard from whether it
    /// ended by its anticipated end.
    pub fn post_run(
        &mut self,
        id: TaskId,
        start_us: u32,
        end_us: u32,
        end_cycles: u32,
        anticipated_end_cycles: u32,
    ) {
        let task = &mut self.tasks[id.index()];
        task.executed(start_us, end_us);

        if cmp_cycles(end_cycles, anticipated_end_cycles) > 0 {
            if task.overran() {
                log::warn!("{:?} task persistently overrunning", id);
            }
            self.task_guard.grow();
        } else {
            task.on_time();
            self.task_guard.shrink();
        }
    }
}
