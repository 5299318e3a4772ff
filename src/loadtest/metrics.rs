//! Concurrency-safe sample recorder with snapshot-based statistics.
//!
//! Provides [`MetricsRecorder`], the only object shared between virtual users
//! during a run. Every worker appends [`Sample`]s through [`MetricsRecorder::record`];
//! readers take a [`MetricsSnapshot`] and derive [`SnapshotStats`] from it.
//!
//! # Design
//!
//! - **Lock-protected append**: a `parking_lot::Mutex` guards the sample
//!   vector. Writers hold it for one `push`, snapshots for one `Vec` clone.
//! - **Snapshot statistics**: averages, rates and percentiles are computed from
//!   an immutable snapshot, never from the live store, so every number in a
//!   result describes the same instant.
//! - **Completion order**: samples are stored in the order operations finished,
//!   not the order they started.
//! - **Millisecond resolution** for percentiles, via HdrHistogram with 3
//!   significant figures.

use std::collections::BTreeMap;
use std::time::Duration;

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::loadtest::error::{LoadTestError, OperationError};

/// A single timed invocation of the operation under test.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// When the invocation completed.
    pub timestamp: Instant,
    /// Wall-clock duration of the invocation.
    pub duration: Duration,
    /// Whether the operation returned `Ok`.
    pub success: bool,
    /// [`OperationError::kind`] of a failed invocation.
    pub error_kind: Option<String>,
}

impl Sample {
    /// Create a success sample with the current timestamp.
    pub fn success(duration: Duration) -> Self {
        Self {
            timestamp: Instant::now(),
            duration,
            success: true,
            error_kind: None,
        }
    }

    /// Create a failure sample with the current timestamp.
    pub fn failure(duration: Duration, err: &OperationError) -> Self {
        Self {
            timestamp: Instant::now(),
            duration,
            success: false,
            error_kind: Some(err.kind().to_owned()),
        }
    }

    /// Build a sample from an operation outcome.
    pub fn from_outcome(duration: Duration, outcome: &Result<(), OperationError>) -> Self {
        match outcome {
            Ok(()) => Self::success(duration),
            Err(err) => Self::failure(duration, err),
        }
    }

    /// Duration in fractional milliseconds.
    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }
}

#[derive(Debug, Default)]
struct RecorderState {
    samples: Vec<Sample>,
    error_count: u64,
}

/// Append-only, thread-safe sample store for one test run.
///
/// Share it between workers behind an `Arc`. A fresh recorder is created for
/// every run (every stress step and spike phase), so [`clear`](Self::clear)
/// is only needed when a caller reuses one between runs.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use loadrig::loadtest::metrics::{MetricsRecorder, Sample};
///
/// let recorder = MetricsRecorder::new();
/// recorder.record(Sample::success(Duration::from_millis(42)));
///
/// let snapshot = recorder.snapshot();
/// assert_eq!(snapshot.samples.len(), 1);
/// assert_eq!(snapshot.error_count, 0);
/// ```
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    state: Mutex<RecorderState>,
}

impl MetricsRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a sample. Safe to call from any number of concurrent workers.
    pub fn record(&self, sample: Sample) {
        let mut state = self.state.lock();
        if !sample.success {
            state.error_count += 1;
        }
        state.samples.push(sample);
    }

    /// Copies the current samples and error count.
    ///
    /// The lock is held only for the copy; recording continues afterwards and
    /// never affects the returned snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.lock();
        MetricsSnapshot {
            samples: state.samples.clone(),
            error_count: state.error_count,
            captured_at: Instant::now(),
        }
    }

    /// Number of samples recorded so far.
    pub fn len(&self) -> usize {
        self.state.lock().samples.len()
    }

    /// Returns `true` if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resets the recorder to empty.
    ///
    /// Must not be called while workers are still recording.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.samples.clear();
        state.error_count = 0;
    }
}

/// Immutable point-in-time copy of a recorder's contents.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Samples in completion order.
    pub samples: Vec<Sample>,
    /// Number of failed samples.
    pub error_count: u64,
    /// When the snapshot was taken.
    pub captured_at: Instant,
}

/// Statistics derived from a [`MetricsSnapshot`].
///
/// Latencies are milliseconds, rates are percentage points (0..=100),
/// throughput is successful requests per second.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SnapshotStats {
    /// Total samples (success + failure).
    pub total_requests: u64,
    /// Successful samples.
    pub successful_requests: u64,
    /// Failed samples.
    pub failed_requests: u64,
    /// Sum of all sample durations (milliseconds).
    pub total_response_time_ms: f64,
    /// Mean latency across all samples (milliseconds).
    pub avg_response_time: f64,
    /// Minimum latency across all samples (milliseconds).
    pub min_response_time: f64,
    /// Maximum latency across all samples (milliseconds).
    pub max_response_time: f64,
    /// Latency P50 across all samples (milliseconds).
    pub p50: u64,
    /// Latency P95 across all samples (milliseconds).
    pub p95: u64,
    /// Latency P99 across all samples (milliseconds).
    pub p99: u64,
    /// Share of successful samples (0..=100).
    pub success_rate: f64,
    /// Share of failed samples (0..=100).
    pub error_rate: f64,
    /// Successful samples per second of `elapsed`.
    pub throughput: f64,
    /// Failed sample counts keyed by error kind.
    pub error_kinds: BTreeMap<String, u64>,
}

impl MetricsSnapshot {
    /// Total number of samples in the snapshot.
    pub fn total(&self) -> u64 {
        self.samples.len() as u64
    }

    /// Number of successful samples in the snapshot.
    pub fn success_count(&self) -> u64 {
        self.total().saturating_sub(self.error_count)
    }

    /// Returns `true` if the snapshot holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Verifies that the recorded error count agrees with the samples.
    ///
    /// A mismatch means the recorder was corrupted, which is an engine bug
    /// and must abort the run rather than produce wrong statistics.
    pub fn check_consistency(&self) -> Result<(), LoadTestError> {
        let failed = self.samples.iter().filter(|s| !s.success).count() as u64;
        if self.error_count > self.total() || self.error_count != failed {
            return Err(LoadTestError::engine(format!(
                "recorder inconsistent: error_count={} but {} of {} samples failed",
                self.error_count,
                failed,
                self.total()
            )));
        }
        Ok(())
    }

    /// Derives summary statistics; `elapsed` is the denominator for throughput.
    pub fn stats(&self, elapsed: Duration) -> SnapshotStats {
        let total = self.total();
        if total == 0 {
            return SnapshotStats::default();
        }

        let mut histogram = Histogram::<u64>::new(3).expect("3 sigfigs is always valid");
        histogram.auto(true);

        let mut sum_ms = 0.0;
        let mut min_ms = f64::MAX;
        let mut max_ms: f64 = 0.0;
        let mut error_kinds: BTreeMap<String, u64> = BTreeMap::new();

        for sample in &self.samples {
            let ms = sample.duration_ms();
            sum_ms += ms;
            min_ms = min_ms.min(ms);
            max_ms = max_ms.max(ms);
            let _ = histogram.record(sample.duration.as_millis() as u64);
            if let Some(kind) = &sample.error_kind {
                *error_kinds.entry(kind.clone()).or_insert(0) += 1;
            }
        }

        let successful = self.success_count();
        let elapsed_secs = elapsed.as_secs_f64();
        let throughput = if elapsed_secs > 0.0 {
            successful as f64 / elapsed_secs
        } else {
            0.0
        };
        let success_rate = successful as f64 / total as f64 * 100.0;

        SnapshotStats {
            total_requests: total,
            successful_requests: successful,
            failed_requests: self.error_count,
            total_response_time_ms: sum_ms,
            avg_response_time: sum_ms / total as f64,
            min_response_time: min_ms,
            max_response_time: max_ms,
            p50: histogram.value_at_quantile(0.50),
            p95: histogram.value_at_quantile(0.95),
            p99: histogram.value_at_quantile(0.99),
            success_rate,
            error_rate: 100.0 - success_rate,
            throughput,
            error_kinds,
        }
    }
}
