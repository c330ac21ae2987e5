// src/scheduler/task.rs

//! Dynamic task records: due-time aging, dynamic priority and execution
//! time estimates.

use crate::clock::cmp_time_us;
use crate::error::ConfigError;

/// Estimated execution time is kept scaled up by `1 << TASK_EXEC_TIME_SHIFT`
/// and decays by one unit per run, so peaks fade slowly.
pub const TASK_EXEC_TIME_SHIFT: u32 = 7;
/// A task aged past this many periods gets its estimate scaled down.
pub const TASK_AGE_EXPEDITE_COUNT: u16 = 1;
/// Scale applied to the estimate of an aged task that did not fit.
pub const TASK_AGE_EXPEDITE_SCALE: f32 = 0.9;
/// Consecutive overruns after which a task's overruns are reported.
pub const PERSISTENT_OVERRUN_COUNT: u32 = 8;

/// The dynamic tasks, in tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TaskId {
    /// Attitude estimation.
    Attitude,
    /// Receiver pipeline; runs when a frame or fallback is pending.
    Receiver,
    /// Accelerometer read.
    Accelerometer,
    /// Telemetry and parameter link.
    Telemetry,
}

/// Number of dynamic tasks.
pub const TASK_COUNT: usize = 4;

impl TaskId {
    /// Every task, highest tie-break priority first.
    pub const ALL: [TaskId; TASK_COUNT] = [
        TaskId::Attitude,
        TaskId::Receiver,
        TaskId::Accelerometer,
        TaskId::Telemetry,
    ];

    /// Position in [`TaskId::ALL`].
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Weight multiplied by the task age.
    pub const fn static_priority(self) -> u16 {
        match self {
            TaskId::Attitude | TaskId::Receiver => 3,
            TaskId::Accelerometer => 2,
            TaskId::Telemetry => 1,
        }
    }

    /// Event-driven tasks are signalled by a check instead of a period.
    pub const fn is_event_driven(self) -> bool {
        matches!(self, TaskId::Receiver)
    }
}

/// Scheduling record of one dynamic task.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    id: TaskId,
    desired_period_us: u32,
    dynamic_priority: u16,
    age_periods: u16,
    last_executed_at_us: u32,
    last_desired_at_us: u32,
    last_signaled_at_us: u32,
    anticipated_execution_time: u32,
    run_count: u32,
    overruns: u32,
    consecutive_overruns: u32,
}

impl Task {
    /// Creates a task due `rate_hz` times per second.
    pub fn new(id: TaskId, rate_hz: u32) -> Result<Self, ConfigError> {
        if rate_hz == 0 {
            return Err(ConfigError::TaskRate);
        }
        Ok(Self {
            id,
            desired_period_us: (1_000_000 / rate_hz).max(1),
            dynamic_priority: 0,
            age_periods: 0,
            last_executed_at_us: 0,
            last_desired_at_us: 0,
            last_signaled_at_us: 0,
            anticipated_execution_time: 0,
            run_count: 0,
            overruns: 0,
            consecutive_overruns: 0,
        })
    }

    /// Task identity.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Desired period in microseconds.
    pub fn desired_period_us(&self) -> u32 {
        self.desired_period_us
    }

    /// Priority computed by the last [`Task::prioritize`].
    pub fn dynamic_priority(&self) -> u16 {
        self.dynamic_priority
    }

    /// Whole periods the task is overdue.
    pub fn age_periods(&self) -> u16 {
        self.age_periods
    }

    /// Anticipated execution time, microseconds.
    pub fn required_time_us(&self) -> u32 {
        self.anticipated_execution_time >> TASK_EXEC_TIME_SHIFT
    }

    /// Completed runs.
    pub fn run_count(&self) -> u32 {
        self.run_count
    }

    /// Runs that ended after their anticipated end.
    pub fn overruns(&self) -> u32 {
        self.overruns
    }

    fn age_since(&self, now_us: u32, since_us: u32) -> u16 {
        let elapsed = cmp_time_us(now_us, since_us).max(0) as u32;
        (elapsed / self.desired_period_us).min(u16::MAX as u32) as u16
    }

    /// Updates age and dynamic priority. `check` is consulted by
    /// event-driven tasks that are not already signalled; it receives the
    /// time since the last run.
    pub fn prioritize<F: FnMut(u32) -> bool>(&mut self, now_us: u32, mut check: F) -> u16 {
        let weight = self.id.static_priority();
        if self.id.is_event_driven() {
            if self.dynamic_priority > 0 {
                self.age_periods = self
                    .age_since(now_us, self.last_signaled_at_us)
                    .saturating_add(1);
                self.dynamic_priority = weight.saturating_mul(self.age_periods).saturating_add(1);
            } else if check(now_us.wrapping_sub(self.last_executed_at_us)) {
                self.last_signaled_at_us = now_us;
                self.age_periods = 1;
                self.dynamic_priority = weight + 1;
            } else {
                self.age_periods = 0;
            }
        } else {
            self.age_periods = self.age_since(now_us, self.last_desired_at_us);
            if self.age_periods > 0 {
                self.dynamic_priority = weight.saturating_mul(self.age_periods).saturating_add(1);
            }
        }
        self.dynamic_priority
    }

    /// Makes an aged task easier to fit by shrinking its estimate.
    pub fn expedite(&mut self) {
        if self.age_periods > TASK_AGE_EXPEDITE_COUNT {
            self.anticipated_execution_time =
                (self.anticipated_execution_time as f32 * TASK_AGE_EXPEDITE_SCALE) as u32;
        }
    }

    /// Records a run from `start_us` to `end_us`.
    pub fn executed(&mut self, start_us: u32, end_us: u32) {
        self.last_executed_at_us = start_us;
        self.last_desired_at_us = self
            .last_desired_at_us
            .wrapping_add(self.age_periods as u32 * self.desired_period_us);
        self.dynamic_priority = 0;
        self.run_count = self.run_count.wrapping_add(1);

        let duration_us = end_us.wrapping_sub(start_us);
        if duration_us > self.required_time_us() {
            self.anticipated_execution_time = duration_us.saturating_mul(1 << TASK_EXEC_TIME_SHIFT);
        } else if self.anticipated_execution_time > 1 {
            self.anticipated_execution_time -= 1;
        }
    }

    /// Counts an overrun. Returns true when the task has just become a
    /// persistent overrunner.
    pub fn overran(&mut self) -> bool {
        self.overruns = self.overruns.wrapping_add(1);
        self.consecutive_overruns = self.consecutive_overruns.saturating_add(1);
        self.consecutive_overruns == PERSISTENT_OVERRUN_COUNT
    }

    /// Ends an overrun streak.
    pub fn on_time(&mut self) {
        self.consecutive_overruns = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_rate_rejected() {
        assert_eq!(Task::new(TaskId::Telemetry, 0), Err(ConfigError::TaskRate));
    }

    /// A periodic task's priority grows with its age.
    #[test]
    fn test_periodic_aging() {
        let mut task = Task::new(TaskId::Accelerometer, 1000).unwrap();
        assert_eq!(task.prioritize(500, |_| false), 0);
        assert_eq!(task.prioritize(1000, |_| false), 3);
        assert_eq!(task.prioritize(3000, |_| false), 7);
        assert_eq!(task.age_periods(), 3);

        task.executed(3000, 3010);
        assert_eq!(task.dynamic_priority(), 0);
        // caught up to the 3 ms grid point
        assert_eq!(task.prioritize(3500, |_| false), 0);
        assert_eq!(task.prioritize(4000, |_| false), 3);
    }

    /// An event-driven task stays signalled until it runs.
    #[test]
    fn test_event_driven_signal() {
        let mut task = Task::new(TaskId::Receiver, 33).unwrap();
        assert_eq!(task.prioritize(100, |_| false), 0);

        let mut checks = 0;
        assert_eq!(
            task.prioritize(200, |_| {
                checks += 1;
                true
            }),
            4
        );
        // signalled: no further check, priority ages
        let later = 200 + 2 * task.desired_period_us();
        let priority = task.prioritize(later, |_| {
            checks += 1;
            false
        });
        assert_eq!(checks, 1);
        assert_eq!(priority, 10);

        task.executed(later, later + 5);
        assert_eq!(task.prioritize(later + 10, |_| false), 0);
    }

    /// The estimate jumps to a new peak and decays slowly.
    #[test]
    fn test_execution_time_estimate() {
        let mut task = Task::new(TaskId::Telemetry, 100).unwrap();
        task.executed(0, 40);
        assert_eq!(task.required_time_us(), 40);
        for _ in 0..(1 << TASK_EXEC_TIME_SHIFT) {
            task.executed(0, 10);
        }
        assert_eq!(task.required_time_us(), 39);
    }

    #[test]
    fn test_expedite_only_aged_tasks() {
        let mut task = Task::new(TaskId::Attitude, 100).unwrap();
        task.executed(0, 100);
        let _ = task.prioritize(15_000, |_| false);
        task.expedite();
        assert_eq!(task.required_time_us(), 100);

        let _ = task.prioritize(30_000, |_| false);
        task.expedite();
        assert_eq!(task.required_time_us(), 90);
    }

    #[test]
    fn test_persistent_overrun_reported_once() {
        let mut task = Task::new(TaskId::Telemetry, 100).unwrap();
        let reports = (0..20).filter(|_| task.overran()).count();
        assert_eq!(reports, 1);
        assert_eq!(task.overruns(), 20);
        task.on_time();
        assert!(!task.overran());
    }
}
