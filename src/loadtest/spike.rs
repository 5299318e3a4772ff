//! Base, spike, recovery: three back-to-back load phases.
//!
//! Each phase is an independent [`LoadTestRunner`] run with its own recorder,
//! zero ramp-up and zero think time. The result reports raw per-phase
//! statistics; judging recovery is left to the caller through
//! [`SpikeTestResult::recovered_within`].

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::loadtest::config::SpikeConfig;
use crate::loadtest::engine::LoadTestRunner;
use crate::loadtest::error::LoadTestError;
use crate::loadtest::operation::Operation;
use crate::loadtest::result::{PhaseResult, TestType};

/// Which of the three phases a descriptor stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpikePhaseKind {
    Base,
    Spike,
    Recovery,
}

impl SpikePhaseKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::Spike => "spike",
            Self::Recovery => "recovery",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpikePhase {
    pub kind: SpikePhaseKind,
    pub users: u32,
    pub duration: Duration,
}

/// The phase sequence for `config`, in execution order.
pub fn plan_phases(config: &SpikeConfig) -> [SpikePhase; 3] {
    [
        SpikePhase {
            kind: SpikePhaseKind::Base,
            users: config.base_users,
            duration: Duration::from_secs(config.base_duration_secs),
        },
        SpikePhase {
            kind: SpikePhaseKind::Spike,
            users: config.spike_users,
            duration: Duration::from_secs(config.spike_duration_secs),
        },
        SpikePhase {
            kind: SpikePhaseKind::Recovery,
            users: config.base_users,
            duration: Duration::from_secs(config.recovery_duration_secs),
        },
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpikeTestResult {
    pub test_type: TestType,
    /// Base, spike and recovery, in that order.
    pub results: Vec<PhaseResult>,
    /// Total elapsed seconds across all phases.
    pub duration: f64,
}

impl SpikeTestResult {
    fn phase(&self, kind: SpikePhaseKind) -> Option<&PhaseResult> {
        self.results.iter().find(|p| p.label == kind.label())
    }

    pub fn base(&self) -> Option<&PhaseResult> {
        self.phase(SpikePhaseKind::Base)
    }

    pub fn spike(&self) -> Option<&PhaseResult> {
        self.phase(SpikePhaseKind::Spike)
    }

    pub fn recovery(&self) -> Option<&PhaseResult> {
        self.phase(SpikePhaseKind::Recovery)
    }

    /// Recovery average latency minus base average latency (milliseconds).
    pub fn recovery_delta_ms(&self) -> Option<f64> {
        Some(self.recovery()?.avg_response_time - self.base()?.avg_response_time)
    }

    /// Returns `true` if recovery latency is within `tolerance` (a fraction,
    /// e.g. `0.5` for 50%) of base latency, in either direction.
    pub fn recovered_within(&self, tolerance: f64) -> bool {
        match (self.base(), self.recovery_delta_ms()) {
            (Some(base), Some(delta)) => delta.abs() <= base.avg_response_time * tolerance,
            _ => false,
        }
    }
}

pub struct SpikeTestRunner {
    runner: LoadTestRunner,
}

impl SpikeTestRunner {
    pub fn new<O: Operation + 'static>(operation: O) -> Self {
        Self::from_runner(LoadTestRunner::new(operation))
    }

    pub fn from_runner(runner: LoadTestRunner) -> Self {
        Self { runner }
    }

    /// Runs the base, spike and recovery phases in order.
    ///
    /// If the shutdown token fires, the phase it cuts short and every later
    /// phase are left out, so the result holds fewer than three entries.
    pub async fn spike_test(&self, config: &SpikeConfig) -> Result<SpikeTestResult, LoadTestError> {
        config.validate()?;

        tracing::info!(
            base_users = config.base_users,
            spike_users = config.spike_users,
            base_duration_secs = config.base_duration_secs,
            spike_duration_secs = config.spike_duration_secs,
            recovery_duration_secs = config.recovery_duration_secs,
            "starting spike test"
        );

        let started = Instant::now();
        let mut results = Vec::with_capacity(3);

        for phase in plan_phases(config) {
            if self.runner.is_shut_down() {
                tracing::warn!(phase = phase.kind.label(), "spike test interrupted");
                break;
            }
            let run = self.runner.run_phase(phase.users, phase.duration).await?;
            if self.runner.is_shut_down() {
                tracing::warn!(
                    phase = phase.kind.label(),
                    "spike test interrupted; discarding the partial phase"
                );
                break;
            }
            tracing::info!(
                phase = phase.kind.label(),
                users = phase.users,
                avg_response_time = run.avg_response_time,
                error_rate = run.error_rate,
                "spike phase complete"
            );
            results.push(run.to_phase(phase.kind.label()));
        }

        Ok(SpikeTestResult {
            test_type: TestType::Spike,
            results,
            duration: started.elapsed().as_secs_f64(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loadtest::error::OperationError;
    use tokio_util::sync::CancellationToken;

    fn config() -> SpikeConfig {
        SpikeConfig {
            base_users: 2,
            spike_users: 8,
            base_duration_secs: 2,
            spike_duration_secs: 1,
            recovery_duration_secs: 2,
        }
    }

    fn phase(label: &str, avg: f64) -> PhaseResult {
        PhaseResult {
            label: label.to_string(),
            users: 1,
            avg_response_time: avg,
            p95: avg as u64,
            error_rate: 0.0,
            sample_count: 10,
            throughput: 1.0,
            duration_secs: 1.0,
        }
    }

    #[test]
    fn test_plan_phases_returns_to_base_users() {
        let phases = plan_phases(&config());
        let users: Vec<_> = phases.iter().map(|p| p.users).collect();
        assert_eq!(users, vec![2, 8, 2]);
        assert_eq!(phases[1].duration, Duration::from_secs(1));
        assert_eq!(phases[2].kind, SpikePhaseKind::Recovery);
    }

    #[test]
    fn test_recovery_comparison() {
        let result = SpikeTestResult {
            test_type: TestType::Spike,
            results: vec![phase("base", 100.0), phase("spike", 400.0), phase("recovery", 140.0)],
            duration: 3.0,
        };
        assert_eq!(result.recovery_delta_ms(), Some(40.0));
        assert!(result.recovered_within(0.5));
        assert!(!result.recovered_within(0.3));
    }

    #[test]
    fn test_incomplete_result_never_recovered() {
        let result = SpikeTestResult {
            test_type: TestType::Spike,
            results: vec![phase("base", 100.0)],
            duration: 1.0,
        };
        assert_eq!(result.recovery_delta_ms(), None);
        assert!(!result.recovered_within(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spike_runs_three_phases() {
        let runner = SpikeTestRunner::new(|| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<(), OperationError>(())
        });
        let result = runner.spike_test(&config()).await.unwrap();

        assert_eq!(result.results.len(), 3);
        let labels: Vec<_> = result.results.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["base", "spike", "recovery"]);
        let users: Vec<_> = result.results.iter().map(|p| p.users).collect();
        assert_eq!(users, vec![2, 8, 2]);
        assert!(result.duration >= 5.0);
        assert!(result.recovered_within(0.1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_spike_keeps_only_completed_phases() {
        let shutdown = CancellationToken::new();
        let runner = SpikeTestRunner::from_runner(
            LoadTestRunner::new(|| async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<(), OperationError>(())
            })
            .with_shutdown(shutdown.clone()),
        );
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            // Base runs 0..2s, the spike phase is cut at 2.5s.
            tokio::time::sleep(Duration::from_millis(2500)).await;
            trigger.cancel();
        });

        let result = runner.spike_test(&config()).await.unwrap();

        let labels: Vec<_> = result.results.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["base"]);
        assert!(result.spike().is_none());
        assert_eq!(result.recovery_delta_ms(), None);
        assert!(!result.recovered_within(1.0));
        assert!(result.duration < 3.0);
    }

    #[tokio::test]
    async fn test_zero_phase_duration_is_rejected() {
        let runner = SpikeTestRunner::new(|| async { Ok::<(), OperationError>(()) });
        let bad = SpikeConfig {
            spike_duration_secs: 0,
            ..config()
        };
        assert!(runner
            .spike_test(&bad)
            .await
            .unwrap_err()
            .is_configuration_error());
    }
}
