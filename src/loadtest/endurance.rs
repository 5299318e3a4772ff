//! Long-running fixed-concurrency test with periodic monitoring.
//!
//! [`EnduranceTestRunner`] drives a [`VirtualUserScheduler`] for the whole
//! run and, concurrently, snapshots the shared recorder at every monitoring
//! interval boundary. Each [`MonitoringPoint`] is cumulative: it covers
//! everything recorded since the run began.
//!
//! # Degradation analysis
//!
//! Cumulative points hide late slowdowns, so [`EnduranceTestResult::interval_deltas`]
//! differences consecutive points to recover per-interval latency.
//! [`EnduranceTestResult::degradation`] then splits that series in half and
//! compares the newer half against the older one, the same self-calibrating
//! half-window comparison used for breaking point detection elsewhere: no
//! absolute thresholds, each target is measured against its own baseline.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::loadtest::config::EnduranceConfig;
use crate::loadtest::engine::LoadTestRunner;
use crate::loadtest::error::LoadTestError;
use crate::loadtest::metrics::{MetricsRecorder, MetricsSnapshot};
use crate::loadtest::operation::Operation;
use crate::loadtest::result::TestType;
use crate::loadtest::vu::{VirtualUserScheduler, WaitOutcome};

/// Cumulative statistics at one interval boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitoringPoint {
    /// Seconds since the run started.
    pub elapsed_secs: f64,
    pub sample_count: u64,
    pub error_count: u64,
    pub total_response_time_ms: f64,
    pub avg_response_time: f64,
    pub max_response_time: f64,
    pub error_rate: f64,
}

impl MonitoringPoint {
    fn from_snapshot(snapshot: &MetricsSnapshot, elapsed: Duration) -> Self {
        let stats = snapshot.stats(elapsed);
        Self {
            elapsed_secs: elapsed.as_secs_f64(),
            sample_count: stats.total_requests,
            error_count: stats.failed_requests,
            total_response_time_ms: stats.total_response_time_ms,
            avg_response_time: stats.avg_response_time,
            max_response_time: stats.max_response_time,
            error_rate: stats.error_rate,
        }
    }
}

/// Activity between two consecutive monitoring points.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntervalDelta {
    /// End of the interval, seconds since the run started.
    pub elapsed_secs: f64,
    pub sample_count: u64,
    pub error_count: u64,
    /// Mean latency of samples completed within the interval.
    pub avg_response_time: f64,
}

/// Newer-half versus older-half latency comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Degradation {
    pub baseline_avg_ms: f64,
    pub recent_avg_ms: f64,
    /// `(recent - baseline) / baseline * 100`; negative means faster.
    pub change_pct: f64,
}

impl Degradation {
    /// Returns `true` if latency grew by more than `pct` percent.
    pub fn exceeds(&self, pct: f64) -> bool {
        self.change_pct > pct
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnduranceTestResult {
    pub test_type: TestType,
    pub users: u32,
    /// Configured run length in hours.
    pub duration: f64,
    /// Actual elapsed seconds, including the drain.
    pub elapsed_secs: f64,
    pub monitoring_data: Vec<MonitoringPoint>,
    pub total_requests: u64,
    pub avg_response_time: f64,
    pub max_response_time: f64,
    pub p95: u64,
    /// Mean of the monitoring points' error rates; the overall rate when no
    /// point was taken.
    pub avg_error_rate: f64,
    /// Error rate over every sample of the run.
    pub overall_error_rate: f64,
}

impl EnduranceTestResult {
    /// Per-interval activity, obtained by differencing consecutive points.
    pub fn interval_deltas(&self) -> Vec<IntervalDelta> {
        let mut deltas = Vec::with_capacity(self.monitoring_data.len());
        let mut prev_count = 0;
        let mut prev_errors = 0;
        let mut prev_total_ms = 0.0;

        for point in &self.monitoring_data {
            let sample_count = point.sample_count.saturating_sub(prev_count);
            let total_ms = point.total_response_time_ms - prev_total_ms;
            deltas.push(IntervalDelta {
                elapsed_secs: point.elapsed_secs,
                sample_count,
                error_count: point.error_count.saturating_sub(prev_errors),
                avg_response_time: if sample_count > 0 {
                    total_ms / sample_count as f64
                } else {
                    0.0
                },
            });
            prev_count = point.sample_count;
            prev_errors = point.error_count;
            prev_total_ms = point.total_response_time_ms;
        }
        deltas
    }

    /// Compares the newer half of the interval series against the older half.
    ///
    /// `None` with fewer than two intervals or a zero baseline.
    pub fn degradation(&self) -> Option<Degradation> {
        let latencies: Vec<f64> = self
            .interval_deltas()
            .iter()
            .filter(|d| d.sample_count > 0)
            .map(|d| d.avg_response_time)
            .collect();
        if latencies.len() < 2 {
            return None;
        }

        let mid = latencies.len() / 2;
        let baseline_avg_ms = mean(&latencies[..mid]);
        let recent_avg_ms = mean(&latencies[mid..]);
        if baseline_avg_ms <= 0.0 {
            return None;
        }

        Some(Degradation {
            baseline_avg_ms,
            recent_avg_ms,
            change_pct: (recent_avg_ms - baseline_avg_ms) / baseline_avg_ms * 100.0,
        })
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub struct EnduranceTestRunner {
    operation: Arc<dyn Operation>,
    shutdown: CancellationToken,
}

impl EnduranceTestRunner {
    pub fn new<O: Operation + 'static>(operation: O) -> Self {
        Self::from_runner(&LoadTestRunner::new(operation))
    }

    /// Shares the operation and shutdown token of an existing runner.
    pub fn from_runner(runner: &LoadTestRunner) -> Self {
        Self {
            operation: runner.operation().clone(),
            shutdown: runner.shutdown_token().clone(),
        }
    }

    /// Runs `config.users` users for `config.duration_hours`, taking a
    /// monitoring point every `config.monitoring_interval_minutes`.
    ///
    /// Workers use zero ramp-up and zero think time.
    pub async fn endurance_test(
        &self,
        config: &EnduranceConfig,
    ) -> Result<EnduranceTestResult, LoadTestError> {
        config.validate()?;

        let duration = config.duration();
        let interval = config.monitoring_interval();
        let expected_points = config.expected_points();
        tracing::info!(
            users = config.users,
            duration_hours = config.duration_hours,
            monitoring_interval_minutes = config.monitoring_interval_minutes,
            expected_points,
            "starting endurance test"
        );

        let recorder = Arc::new(MetricsRecorder::new());
        let scheduler =
            VirtualUserScheduler::new(self.operation.clone(), recorder.clone(), config.users);
        let mut run = scheduler.start(self.shutdown.child_token())?;
        let started = run.started_at();

        let mut monitoring_data = Vec::new();
        let mut waited = WaitOutcome::DeadlineReached;
        for k in 1..=expected_points {
            let offset = u32::try_from(k)
                .ok()
                .and_then(|k| interval.checked_mul(k))
                .unwrap_or(Duration::MAX);
            let boundary = run.deadline_after(offset)?;
            waited = run.wait_until(boundary).await;
            if waited != WaitOutcome::DeadlineReached {
                break;
            }
            let snapshot = recorder.snapshot();
            let point = MonitoringPoint::from_snapshot(&snapshot, snapshot.captured_at - started);
            tracing::debug!(
                point = k,
                elapsed_secs = point.elapsed_secs,
                samples = point.sample_count,
                avg_response_time = point.avg_response_time,
                error_rate = point.error_rate,
                "monitoring point"
            );
            monitoring_data.push(point);
        }

        if waited == WaitOutcome::DeadlineReached {
            let end = run.deadline_after(duration)?;
            waited = run.wait_until(end).await;
        }
        if waited == WaitOutcome::Stopped {
            tracing::warn!(
                points = monitoring_data.len(),
                "endurance test interrupted before its configured duration"
            );
        }
        run.stop();

        let outcome = run.join().await?;
        let snapshot = recorder.snapshot();
        snapshot.check_consistency()?;
        let stats = snapshot.stats(outcome.elapsed);

        let avg_error_rate = if monitoring_data.is_empty() {
            stats.error_rate
        } else {
            mean(
                &monitoring_data
                    .iter()
                    .map(|p| p.error_rate)
                    .collect::<Vec<_>>(),
            )
        };

        let result = EnduranceTestResult {
            test_type: TestType::Endurance,
            users: config.users,
            duration: config.duration_hours,
            elapsed_secs: outcome.elapsed.as_secs_f64(),
            monitoring_data,
            total_requests: stats.total_requests,
            avg_response_time: stats.avg_response_time,
            max_response_time: stats.max_response_time,
            p95: stats.p95,
            avg_error_rate,
            overall_error_rate: stats.error_rate,
        };

        if let Some(d) = result.degradation().filter(|d| d.exceeds(50.0)) {
            tracing::warn!(
                baseline_avg_ms = d.baseline_avg_ms,
                recent_avg_ms = d.recent_avg_ms,
                change_pct = d.change_pct,
                "latency degraded over the run"
            );
        }
        tracing::info!(
            total_requests = result.total_requests,
            points = result.monitoring_data.len(),
            avg_response_time = result.avg_response_time,
            avg_error_rate = result.avg_error_rate,
            "endurance test complete"
        );
        Ok(result)
    }
}
