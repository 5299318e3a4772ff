//! JSON report serialization for test results.
//!
//! A report is self-contained: the resolved config, the target and the full
//! serialized [`TestResult`], under a schema version that external tools key
//! on. Reports land in `.loadrig/reports/` relative to the working directory.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::loadtest::config::TestConfig;
use crate::loadtest::error::LoadTestError;
use crate::loadtest::result::TestResult;

/// Schema version for the JSON report format.
///
/// Increment when making breaking changes to the report structure.
const SCHEMA_VERSION: &str = "1.0";

/// Top-level JSON report structure.
#[derive(Debug, Serialize)]
pub struct PerfTestReport<'a> {
    /// Report format version for parser compatibility.
    pub schema_version: &'static str,
    /// RFC 3339 timestamp when the report was generated.
    pub timestamp: String,
    /// Target the operation was run against.
    pub target_url: &'a str,
    /// Configuration exactly as validated.
    pub config: &'a TestConfig,
    pub result: &'a TestResult,
}

impl<'a> PerfTestReport<'a> {
    pub fn new(result: &'a TestResult, config: &'a TestConfig, target_url: &'a str) -> Self {
        Self::at(Utc::now(), result, config, target_url)
    }

    /// Build a report stamped with an explicit time.
    pub fn at(
        timestamp: DateTime<Utc>,
        result: &'a TestResult,
        config: &'a TestConfig,
        target_url: &'a str,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            timestamp: timestamp.to_rfc3339(),
            target_url,
            config,
            result,
        }
    }
}

/// Write a report to `<base_dir>/.loadrig/reports/`, creating the directory
/// when needed. Returns the path of the new file.
pub fn write_report(report: &PerfTestReport<'_>, base_dir: &Path) -> Result<PathBuf, LoadTestError> {
    let reports_dir = base_dir.join(".loadrig").join("reports");
    let report_err = |path: &Path, message: String| LoadTestError::Report {
        path: path.display().to_string(),
        message,
    };

    std::fs::create_dir_all(&reports_dir).map_err(|e| report_err(&reports_dir, e.to_string()))?;

    let report_path = reports_dir.join(report_filename(&Utc::now()));
    let json =
        serde_json::to_string_pretty(report).map_err(|e| report_err(&report_path, e.to_string()))?;
    std::fs::write(&report_path, json).map_err(|e| report_err(&report_path, e.to_string()))?;

    tracing::debug!(path = %report_path.display(), "report written");
    Ok(report_path)
}

/// Report filename for a given timestamp.
///
/// Uses hyphens instead of colons for cross-platform filename compatibility.
pub fn report_filename(timestamp: &DateTime<Utc>) -> String {
    format!("perftest-{}.json", timestamp.format("%Y-%m-%dT%H-%M-%S"))
}
