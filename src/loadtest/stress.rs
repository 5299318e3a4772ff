//! Breaking point search under stepwise increasing load.
//!
//! [`StressTestRunner`] runs one [`LoadTestRunner`] phase per step, starting
//! at `step_size` users and adding `step_size` each step. The search stops at
//! the first step whose error rate exceeds the threshold (the breaking
//! point), when the next step would exceed `max_users`, or once the time
//! budget is spent.
//!
//! Steps never overlap: each one drains completely before the next starts,
//! and each uses its own recorder. A step cut short by the shutdown token is
//! left out of the results and never counts as the breaking point.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::loadtest::config::StressConfig;
use crate::loadtest::engine::LoadTestRunner;
use crate::loadtest::error::LoadTestError;
use crate::loadtest::operation::Operation;
use crate::loadtest::result::{PhaseResult, TestType};

/// Why a stress search ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A step exceeded the error threshold.
    ThresholdExceeded,
    /// The next step would exceed `max_users`.
    MaxUsersReached,
    /// Cumulative elapsed time reached `max_duration_secs`.
    MaxDurationReached,
    /// The shutdown token fired.
    Interrupted,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ThresholdExceeded => "threshold_exceeded",
            Self::MaxUsersReached => "max_users_reached",
            Self::MaxDurationReached => "max_duration_reached",
            Self::Interrupted => "interrupted",
        }
    }
}

/// One planned step of the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StressStep {
    /// One-based step number.
    pub index: u32,
    pub users: u32,
}

impl StressStep {
    pub fn label(&self) -> String {
        format!("step {}", self.index)
    }
}

/// The full step sequence for `config`: `step_size, 2*step_size, ...` up to
/// and including `max_users`.
pub fn plan_steps(config: &StressConfig) -> Vec<StressStep> {
    (1..=config.max_steps())
        .map(|index| StressStep {
            index,
            users: index * config.step_size,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StressTestResult {
    pub test_type: TestType,
    /// Smallest tested user count whose error rate exceeded the threshold;
    /// `None` when no step did.
    pub breaking_point: Option<u32>,
    pub stop_reason: StopReason,
    pub error_threshold: f64,
    /// One entry per executed step, in order.
    pub results: Vec<PhaseResult>,
    /// Total elapsed seconds across all steps.
    pub duration: f64,
}

impl StressTestResult {
    /// The step that breached the threshold, if any.
    pub fn breaking_step(&self) -> Option<&PhaseResult> {
        let users = self.breaking_point?;
        self.results.iter().find(|p| p.users == users)
    }

    /// Highest user count that was actually run.
    pub fn max_users_tested(&self) -> u32 {
        self.results.last().map_or(0, |p| p.users)
    }
}

pub struct StressTestRunner {
    runner: LoadTestRunner,
}

impl StressTestRunner {
    pub fn new<O: Operation + 'static>(operation: O) -> Self {
        Self::from_runner(LoadTestRunner::new(operation))
    }

    pub fn from_runner(runner: LoadTestRunner) -> Self {
        Self { runner }
    }

    /// Searches for the breaking point.
    ///
    /// Every step runs with zero ramp-up and zero think time.
    pub async fn stress_test(
        &self,
        config: &StressConfig,
    ) -> Result<StressTestResult, LoadTestError> {
        config.validate()?;

        let steps = plan_steps(config);
        tracing::info!(
            max_users = config.max_users,
            step_size = config.step_size,
            step_duration_secs = config.step_duration_secs,
            max_duration_secs = config.max_duration_secs,
            error_threshold = config.error_threshold,
            planned_steps = steps.len(),
            "starting stress test"
        );

        let started = Instant::now();
        let mut results = Vec::with_capacity(steps.len());
        let mut breaking_point = None;
        let mut stop_reason = StopReason::MaxUsersReached;

        for (i, step) in steps.iter().enumerate() {
            if self.runner.is_shut_down() {
                stop_reason = StopReason::Interrupted;
                break;
            }

            let run = self
                .runner
                .run_phase(step.users, config.step_duration())
                .await?;
            if self.runner.is_shut_down() {
                // A cut-off step says nothing about its concurrency level.
                tracing::warn!(
                    step = step.index,
                    users = step.users,
                    "stress test interrupted; discarding the partial step"
                );
                stop_reason = StopReason::Interrupted;
                break;
            }
            tracing::debug!(
                step = step.index,
                users = step.users,
                error_rate = run.error_rate,
                avg_response_time = run.avg_response_time,
                "stress step complete"
            );
            results.push(run.to_phase(step.label()));

            if run.error_rate > config.error_threshold {
                breaking_point = Some(step.users);
                stop_reason = StopReason::ThresholdExceeded;
                break;
            }
            if i + 1 == steps.len() {
                break;
            }
            if started.elapsed() >= config.max_duration() {
                stop_reason = StopReason::MaxDurationReached;
                break;
            }
        }

        let elapsed: Duration = started.elapsed();
        match breaking_point {
            Some(users) => tracing::info!(breaking_point = users, "breaking point found"),
            None => tracing::info!(
                ?stop_reason,
                max_users_tested = results.last().map_or(0, |p: &PhaseResult| p.users),
                "no breaking point within bounds"
            ),
        }

        Ok(StressTestResult {
            test_type: TestType::Stress,
            breaking_point,
            stop_reason,
            error_threshold: config.error_threshold,
            results,
            duration: elapsed.as_secs_f64(),
        })
    }
}
