//! Result types shared by every test mode.
//!
//! Each runner returns its own result struct carrying a [`TestType`]
//! discriminant; [`TestResult`] wraps them for the CLI, the summary renderer
//! and the JSON report. Latencies are milliseconds, rates percentage points.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::loadtest::endurance::EnduranceTestResult;
use crate::loadtest::metrics::SnapshotStats;
use crate::loadtest::spike::SpikeTestResult;
use crate::loadtest::stress::StressTestResult;

/// Discriminant carried by every result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TestType {
    #[serde(rename = "Load Test")]
    Load,
    #[serde(rename = "Stress Test")]
    Stress,
    #[serde(rename = "Spike Test")]
    Spike,
    #[serde(rename = "Endurance Test")]
    Endurance,
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Load => "Load Test",
            Self::Stress => "Stress Test",
            Self::Spike => "Spike Test",
            Self::Endurance => "Endurance Test",
        };
        f.write_str(name)
    }
}

/// Outcome of one fixed-duration, fixed-concurrency run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadTestResult {
    pub test_type: TestType,
    /// Configured concurrency.
    pub users: u32,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// `(1 - successful / total) * 100`, 0 when nothing was recorded.
    pub error_rate: f64,
    pub avg_response_time: f64,
    pub min_response_time: f64,
    pub max_response_time: f64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    /// Total requests per second of actual elapsed time.
    pub throughput: f64,
    /// Actual elapsed seconds, including the wait for in-flight work.
    pub duration: f64,
    /// Failed request counts keyed by error kind.
    pub error_kinds: BTreeMap<String, u64>,
}

impl LoadTestResult {
    pub(crate) fn from_stats(users: u32, stats: SnapshotStats, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        let throughput = if secs > 0.0 {
            stats.total_requests as f64 / secs
        } else {
            0.0
        };
        Self {
            test_type: TestType::Load,
            users,
            total_requests: stats.total_requests,
            successful_requests: stats.successful_requests,
            failed_requests: stats.failed_requests,
            error_rate: stats.error_rate,
            avg_response_time: stats.avg_response_time,
            min_response_time: stats.min_response_time,
            max_response_time: stats.max_response_time,
            p50: stats.p50,
            p95: stats.p95,
            p99: stats.p99,
            throughput,
            duration: secs,
            error_kinds: stats.error_kinds,
        }
    }

    /// Condenses the run into a phase entry for stress and spike results.
    pub fn to_phase(&self, label: impl Into<String>) -> PhaseResult {
        PhaseResult {
            label: label.into(),
            users: self.users,
            avg_response_time: self.avg_response_time,
            p95: self.p95,
            error_rate: self.error_rate,
            sample_count: self.total_requests,
            throughput: self.throughput,
            duration_secs: self.duration,
        }
    }
}

/// One step of a stress search or one phase of a spike test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseResult {
    /// `"base"`, `"spike"`, `"recovery"`, or `"step N"`.
    pub label: String,
    pub users: u32,
    pub avg_response_time: f64,
    pub p95: u64,
    pub error_rate: f64,
    pub sample_count: u64,
    pub throughput: f64,
    pub duration_secs: f64,
}

/// Result of any test mode.
///
/// Serializes as the wrapped struct, whose `test_type` field identifies the
/// variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TestResult {
    Load(LoadTestResult),
    Stress(StressTestResult),
    Spike(SpikeTestResult),
    Endurance(EnduranceTestResult),
}

impl TestResult {
    pub fn test_type(&self) -> TestType {
        match self {
            Self::Load(r) => r.test_type,
            Self::Stress(r) => r.test_type,
            Self::Spike(r) => r.test_type,
            Self::Endurance(r) => r.test_type,
        }
    }

    /// Total requests recorded across every phase of the run.
    pub fn total_requests(&self) -> u64 {
        match self {
            Self::Load(r) => r.total_requests,
            Self::Stress(r) => r.results.iter().map(|p| p.sample_count).sum(),
            Self::Spike(r) => r.results.iter().map(|p| p.sample_count).sum(),
            Self::Endurance(r) => r.total_requests,
        }
    }
}

impl From<LoadTestResult> for TestResult {
    fn from(r: LoadTestResult) -> Self {
        Self::Load(r)
    }
}

impl From<StressTestResult> for TestResult {
    fn from(r: StressTestResult) -> Self {
        Self::Stress(r)
    }
}

impl From<SpikeTestResult> for TestResult {
    fn from(r: SpikeTestResult) -> Self {
        Self::Spike(r)
    }
}

impl From<EnduranceTestResult> for TestResult {
    fn from(r: EnduranceTestResult) -> Self {
        Self::Endurance(r)
    }
}
