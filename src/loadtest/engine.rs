//! Fixed-duration load runs and the mode dispatcher.
//!
//! [`LoadTestRunner`] is the building block every other mode reuses:
//! - Creates a fresh [`MetricsRecorder`] per run
//! - Drives a [`VirtualUserScheduler`] for the configured duration
//! - Waits for in-flight operations, then derives a [`LoadTestResult`]
//!
//! [`PerformanceTester`] bundles one operation with all four runners and
//! dispatches a [`TestConfig`] to the matching mode.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::loadtest::config::{EnduranceConfig, LoadConfig, SpikeConfig, StressConfig, TestConfig};
use crate::loadtest::endurance::{EnduranceTestResult, EnduranceTestRunner};
use crate::loadtest::error::LoadTestError;
use crate::loadtest::metrics::{MetricsRecorder, MetricsSnapshot, Sample};
use crate::loadtest::operation::Operation;
use crate::loadtest::result::{LoadTestResult, TestResult};
use crate::loadtest::spike::{SpikeTestResult, SpikeTestRunner};
use crate::loadtest::stress::{StressTestResult, StressTestRunner};
use crate::loadtest::vu::{VirtualUserScheduler, WaitOutcome};

/// Runs an operation at fixed concurrency for a fixed duration.
///
/// Cloning is cheap: clones share the operation and the shutdown token.
#[derive(Clone)]
pub struct LoadTestRunner {
    operation: Arc<dyn Operation>,
    shutdown: CancellationToken,
}

impl LoadTestRunner {
    /// Creates a runner for the given operation.
    pub fn new<O: Operation + 'static>(operation: O) -> Self {
        Self::from_arc(Arc::new(operation))
    }

    /// Creates a runner for an already shared operation.
    pub fn from_arc(operation: Arc<dyn Operation>) -> Self {
        Self {
            operation,
            shutdown: CancellationToken::new(),
        }
    }

    /// Ends runs early when `token` is cancelled (e.g. on Ctrl+C).
    ///
    /// Each run stops through a child of this token, so cancelling one run
    /// never affects the parent.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Returns the shared operation.
    pub fn operation(&self) -> &Arc<dyn Operation> {
        &self.operation
    }

    /// Returns the shutdown token.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Returns `true` once the shutdown token has fired.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Runs `config.users` virtual users for `config.duration_secs`.
    ///
    /// Rejects an invalid config before any worker starts. The reported
    /// `duration` is the actual elapsed time including the wait for
    /// in-flight operations, so it is never shorter than requested unless
    /// the shutdown token fired.
    pub async fn load_test(&self, config: &LoadConfig) -> Result<LoadTestResult, LoadTestError> {
        config.validate()?;

        tracing::info!(
            users = config.users,
            duration_secs = config.duration_secs,
            ramp_up_secs = config.ramp_up_secs,
            think_time_ms = config.think_time_ms,
            "starting load test"
        );

        let result = self
            .execute(
                config.users,
                config.duration(),
                config.ramp_up(),
                config.think_time(),
            )
            .await?;

        tracing::info!(
            total_requests = result.total_requests,
            error_rate = result.error_rate,
            avg_response_time = result.avg_response_time,
            throughput = result.throughput,
            "load test complete"
        );
        Ok(result)
    }

    /// Runs one stress step or spike phase: no ramp-up, no think time.
    pub(crate) async fn run_phase(
        &self,
        users: u32,
        duration: Duration,
    ) -> Result<LoadTestResult, LoadTestError> {
        self.execute(users, duration, Duration::ZERO, Duration::ZERO)
            .await
    }

    async fn execute(
        &self,
        users: u32,
        duration: Duration,
        ramp_up: Duration,
        think_time: Duration,
    ) -> Result<LoadTestResult, LoadTestError> {
        let recorder = Arc::new(MetricsRecorder::new());
        let scheduler = VirtualUserScheduler::new(self.operation.clone(), recorder.clone(), users)
            .with_ramp_up(ramp_up)
            .with_think_time(think_time);

        let mut run = scheduler.start(self.shutdown.child_token())?;
        let deadline = match run.deadline_after(duration) {
            Ok(deadline) => deadline,
            Err(err) => {
                run.stop();
                run.join().await?;
                return Err(err);
            },
        };

        if run.wait_until(deadline).await == WaitOutcome::Stopped {
            tracing::warn!(users, "run interrupted before its configured duration");
        }
        run.stop();

        let outcome = run.join().await?;
        let snapshot = recorder.snapshot();
        snapshot.check_consistency()?;

        tracing::debug!(
            users,
            started_users = outcome.started_users(),
            samples = snapshot.total(),
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "run drained"
        );

        Ok(LoadTestResult::from_stats(
            users,
            snapshot.stats(outcome.elapsed),
            outcome.elapsed,
        ))
    }
}

/// One operation under test, with every test mode and an ad-hoc monitor.
///
/// The monitor recorder collects samples from [`measure`](Self::measure)
/// only; test runs always use their own fresh recorders.
pub struct PerformanceTester {
    runner: LoadTestRunner,
    monitor: Arc<MetricsRecorder>,
}

impl PerformanceTester {
    /// Creates a tester for the given operation.
    pub fn new<O: Operation + 'static>(operation: O) -> Self {
        Self::from_runner(LoadTestRunner::new(operation))
    }

    /// Wraps an existing runner, keeping its shutdown token.
    pub fn from_runner(runner: LoadTestRunner) -> Self {
        Self {
            runner,
            monitor: Arc::new(MetricsRecorder::new()),
        }
    }

    /// See [`LoadTestRunner::with_shutdown`].
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.runner = self.runner.with_shutdown(token);
        self
    }

    pub fn runner(&self) -> &LoadTestRunner {
        &self.runner
    }

    pub async fn load_test(&self, config: &LoadConfig) -> Result<LoadTestResult, LoadTestError> {
        self.runner.load_test(config).await
    }

    pub async fn stress_test(
        &self,
        config: &StressConfig,
    ) -> Result<StressTestResult, LoadTestError> {
        StressTestRunner::from_runner(self.runner.clone())
            .stress_test(config)
            .await
    }

    pub async fn spike_test(&self, config: &SpikeConfig) -> Result<SpikeTestResult, LoadTestError> {
        SpikeTestRunner::from_runner(self.runner.clone())
            .spike_test(config)
            .await
    }

    pub async fn endurance_test(
        &self,
        config: &EnduranceConfig,
    ) -> Result<EnduranceTestResult, LoadTestError> {
        EnduranceTestRunner::from_runner(&self.runner)
            .endurance_test(config)
            .await
    }

    /// Runs whichever mode `config` selects.
    pub async fn run(&self, config: &TestConfig) -> Result<TestResult, LoadTestError> {
        let result = match config {
            TestConfig::Load(c) => self.load_test(c).await?.into(),
            TestConfig::Stress(c) => self.stress_test(c).await?.into(),
            TestConfig::Spike(c) => self.spike_test(c).await?.into(),
            TestConfig::Endurance(c) => self.endurance_test(c).await?.into(),
        };
        Ok(result)
    }

    /// Invokes the operation once, records the sample in the monitor and
    /// returns it. Failures are recorded, not returned.
    pub async fn measure(&self) -> Sample {
        let start = Instant::now();
        let outcome = self.runner.operation().execute().await;
        let sample = Sample::from_outcome(start.elapsed(), &outcome);
        self.monitor.record(sample.clone());
        sample
    }

    /// Snapshot of everything [`measure`](Self::measure) has recorded.
    pub fn current_metrics(&self) -> MetricsSnapshot {
        self.monitor.snapshot()
    }

    /// Empties the monitor.
    pub fn clear_metrics(&self) {
        self.monitor.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loadtest::error::OperationError;

    fn sleeping_op(ms: u64) -> impl Operation + 'static {
        move || async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok::<(), OperationError>(())
        }
    }

    fn load(duration_secs: u64, users: u32) -> LoadConfig {
        LoadConfig {
            duration_secs,
            users,
            ramp_up_secs: 0,
            think_time_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_running() {
        let invoked = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = invoked.clone();
        let runner = LoadTestRunner::new(move || {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
            async { Ok::<(), OperationError>(()) }
        });

        let err = runner.load_test(&load(10, 0)).await.unwrap_err();
        assert!(err.is_configuration_error());
        let err = runner.load_test(&load(0, 5)).await.unwrap_err();
        assert!(err.is_configuration_error());
        assert!(!invoked.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_test_counts_add_up() {
        let runner = LoadTestRunner::new(sleeping_op(100));
        let result = runner.load_test(&load(2, 3)).await.unwrap();

        assert_eq!(
            result.total_requests,
            result.successful_requests + result.failed_requests
        );
        // 3 users * 2000ms / 100ms.
        assert!((57..=63).contains(&result.total_requests), "{result:?}");
        assert_eq!(result.error_rate, 0.0);
        assert_eq!(result.users, 3);
        assert!(result.duration >= 2.0);
        assert!(result.avg_response_time >= 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throughput_uses_actual_elapsed() {
        let runner = LoadTestRunner::new(sleeping_op(700));
        let result = runner.load_test(&load(1, 1)).await.unwrap();

        // Calls at 0ms and 700ms; the second drains at 1400ms.
        assert_eq!(result.total_requests, 2);
        assert!(result.duration >= 1.4);
        assert!((result.throughput - 2.0 / result.duration).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_ends_run_early() {
        let shutdown = CancellationToken::new();
        let runner = LoadTestRunner::new(sleeping_op(50)).with_shutdown(shutdown.clone());

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result = runner.load_test(&load(60, 2)).await.unwrap();
        assert!(result.duration < 2.0);
        assert!(runner.is_shut_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_panic_aborts_run_early() {
        let runner = LoadTestRunner::new(|| async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if true {
                panic!("bug in the harness");
            }
            Ok::<(), OperationError>(())
        });

        let started = Instant::now();
        let err = runner.load_test(&load(3600, 2)).await.unwrap_err();
        assert!(matches!(err, LoadTestError::EngineFault { .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_ramp_up_is_rejected_without_panicking() {
        let runner = LoadTestRunner::new(sleeping_op(10));
        let config = LoadConfig {
            ramp_up_secs: u64::MAX,
            ..load(1, 3)
        };
        let err = runner.load_test(&config).await.unwrap_err();
        assert!(matches!(err, LoadTestError::ConfigValidation { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tester_dispatches_by_mode() {
        let tester = PerformanceTester::new(sleeping_op(20));
        let config = TestConfig::Load(load(1, 2));

        let result = tester.run(&config).await.unwrap();
        assert!(matches!(result, TestResult::Load(_)));
        assert!(result.total_requests() > 0);
    }

    #[tokio::test]
    async fn test_measure_and_clear_metrics() {
        let tester = PerformanceTester::new(|| async { Ok::<(), OperationError>(()) });

        for _ in 0..3 {
            assert!(tester.measure().await.success);
        }
        assert_eq!(tester.current_metrics().total(), 3);

        tester.clear_metrics();
        let snap = tester.current_metrics();
        assert_eq!(snap.total(), 0);
        assert_eq!(snap.error_count, 0);
    }

    #[tokio::test]
    async fn test_measure_records_failures() {
        let tester = PerformanceTester::new(|| async { Err::<(), _>(OperationError::Timeout) });

        let sample = tester.measure().await;
        assert!(!sample.success);
        assert_eq!(sample.error_kind.as_deref(), Some("timeout"));
        assert_eq!(tester.current_metrics().error_count, 1);
    }
}
