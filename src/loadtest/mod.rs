//! Performance test engine.
//!
//! Drives concurrent virtual users against a caller-supplied [`Operation`]
//! and derives load, stress, spike and endurance statistics. Provides typed
//! TOML configuration, error classification, HdrHistogram-based metrics, a
//! terminal summary and a JSON report.

pub mod config;
pub mod endurance;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod operation;
pub mod report;
pub mod result;
pub mod spike;
pub mod stress;
pub mod summary;
pub mod vu;

pub use config::{EnduranceConfig, LoadConfig, SpikeConfig, StressConfig, TestConfig};
pub use endurance::{EnduranceTestResult, EnduranceTestRunner, MonitoringPoint};
pub use engine::{LoadTestRunner, PerformanceTester};
pub use error::{LoadTestError, OperationError};
pub use metrics::{MetricsRecorder, MetricsSnapshot, Sample, SnapshotStats};
pub use operation::{HttpProbe, Operation};
pub use result::{LoadTestResult, PhaseResult, TestResult, TestType};
pub use spike::{SpikeTestResult, SpikeTestRunner};
pub use stress::{StressTestResult, StressTestRunner};
pub use vu::VirtualUserScheduler;
