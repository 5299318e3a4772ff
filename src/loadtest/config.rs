//! Typed test configuration, one variant per test mode.
//!
//! Each mode has its own plain record ([`LoadConfig`], [`StressConfig`],
//! [`SpikeConfig`], [`EnduranceConfig`]) with a `validate()` method that the
//! runners call before any worker starts. [`TestConfig`] is the tagged union
//! read from TOML files by the CLI.
//!
//! # Example TOML
//!
//! ```toml
//! type = "stress"
//! max_users = 20
//! step_size = 2
//! step_duration_secs = 10
//! max_duration_secs = 120
//! error_threshold = 5.0
//! ```
//!
//! Note: the target URL is NOT part of the config file. It is provided on the
//! command line.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::loadtest::error::LoadTestError;

/// Longest accepted run, step, phase or ramp-up window: 30 days.
pub const MAX_RUN_SECS: u64 = 30 * 24 * 60 * 60;

/// Longest accepted think time: one hour.
pub const MAX_THINK_TIME_MS: u64 = 60 * 60 * 1000;

/// Largest accepted number of concurrent virtual users.
pub const MAX_USERS: u32 = 100_000;

/// Most monitoring points a single endurance run may take.
pub const MAX_MONITORING_POINTS: u64 = 100_000;

/// Shortest accepted monitoring interval.
pub const MIN_MONITORING_INTERVAL: Duration = Duration::from_secs(1);

fn check_users(field: &str, users: u32) -> Result<(), LoadTestError> {
    if users == 0 {
        return Err(LoadTestError::validation(format!(
            "{field} must be greater than 0"
        )));
    }
    if users > MAX_USERS {
        return Err(LoadTestError::validation(format!(
            "{field} ({users}) exceeds the limit of {MAX_USERS}"
        )));
    }
    Ok(())
}

fn check_secs(field: &str, secs: u64) -> Result<(), LoadTestError> {
    if secs == 0 {
        return Err(LoadTestError::validation(format!(
            "{field} must be greater than 0"
        )));
    }
    check_secs_limit(field, secs)
}

fn check_secs_limit(field: &str, secs: u64) -> Result<(), LoadTestError> {
    if secs > MAX_RUN_SECS {
        return Err(LoadTestError::validation(format!(
            "{field} ({secs}) exceeds the limit of {MAX_RUN_SECS} seconds"
        )));
    }
    Ok(())
}

/// Converts float seconds, clamping negatives and NaN to zero and overflow to
/// [`Duration::MAX`].
fn saturating_secs_f64(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Fixed-concurrency run.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoadConfig {
    /// Run length in seconds.
    pub duration_secs: u64,
    /// Number of concurrent virtual users.
    pub users: u32,
    /// Window in seconds over which user start times are spread.
    #[serde(default)]
    pub ramp_up_secs: u64,
    /// Pause in milliseconds between a user's invocations.
    #[serde(default)]
    pub think_time_ms: u64,
}

/// Step search for the breaking point.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StressConfig {
    /// Upper bound on tested concurrency.
    pub max_users: u32,
    /// Users added per step; also the first step's user count.
    pub step_size: u32,
    /// Length of each step in seconds.
    pub step_duration_secs: u64,
    /// Budget for the whole search in seconds.
    pub max_duration_secs: u64,
    /// Error rate in percent (0..=100) above which a step counts as broken.
    pub error_threshold: f64,
}

/// Base, spike, recovery.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SpikeConfig {
    /// Users during the base and recovery phases.
    pub base_users: u32,
    /// Users during the spike phase.
    pub spike_users: u32,
    /// Base phase length in seconds.
    pub base_duration_secs: u64,
    /// Spike phase length in seconds.
    pub spike_duration_secs: u64,
    /// Recovery phase length in seconds.
    pub recovery_duration_secs: u64,
}

/// Long run with periodic monitoring.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EnduranceConfig {
    /// Number of concurrent virtual users.
    pub users: u32,
    /// Run length in hours.
    pub duration_hours: f64,
    /// Minutes between monitoring points.
    pub monitoring_interval_minutes: f64,
}

/// Tagged configuration for any test mode.
///
/// The `type` field in TOML selects the variant.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TestConfig {
    /// `type = "load"`
    Load(LoadConfig),
    /// `type = "stress"`
    Stress(StressConfig),
    /// `type = "spike"`
    Spike(SpikeConfig),
    /// `type = "endurance"`
    Endurance(EnduranceConfig),
}

impl LoadConfig {
    /// Run length as a [`Duration`].
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    /// Ramp-up window as a [`Duration`].
    pub fn ramp_up(&self) -> Duration {
        Duration::from_secs(self.ramp_up_secs)
    }

    /// Think time as a [`Duration`].
    pub fn think_time(&self) -> Duration {
        Duration::from_millis(self.think_time_ms)
    }

    /// Rejects a zero duration or zero users, and any value past the
    /// engine limits.
    pub fn validate(&self) -> Result<(), LoadTestError> {
        check_secs("load test duration_secs", self.duration_secs)?;
        check_users("load test users", self.users)?;
        check_secs_limit("load test ramp_up_secs", self.ramp_up_secs)?;
        if self.think_time_ms > MAX_THINK_TIME_MS {
            return Err(LoadTestError::validation(format!(
                "load test think_time_ms ({}) exceeds the limit of {MAX_THINK_TIME_MS}",
                self.think_time_ms
            )));
        }
        if self.ramp_up_secs > self.duration_secs {
            tracing::warn!(
                ramp_up_secs = self.ramp_up_secs,
                duration_secs = self.duration_secs,
                "ramp-up is longer than the test; late users will never start"
            );
        }
        Ok(())
    }
}

impl StressConfig {
    /// Step length as a [`Duration`].
    pub fn step_duration(&self) -> Duration {
        Duration::from_secs(self.step_duration_secs)
    }

    /// Search budget as a [`Duration`].
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }

    /// Maximum number of steps the search can take, ignoring the time budget.
    pub fn max_steps(&self) -> u32 {
        if self.step_size == 0 {
            0
        } else {
            self.max_users / self.step_size
        }
    }

    /// Rejects zero sizes or durations, a first step above `max_users`, and
    /// thresholds outside 0..=100.
    pub fn validate(&self) -> Result<(), LoadTestError> {
        check_users("stress test max_users", self.max_users)?;
        if self.step_size == 0 {
            return Err(LoadTestError::validation(
                "stress test step_size must be greater than 0",
            ));
        }
        if self.step_size > self.max_users {
            return Err(LoadTestError::validation(format!(
                "stress test step_size ({}) exceeds max_users ({})",
                self.step_size, self.max_users
            )));
        }
        check_secs("stress test step_duration_secs", self.step_duration_secs)?;
        check_secs("stress test max_duration_secs", self.max_duration_secs)?;
        if !self.error_threshold.is_finite() || !(0.0..=100.0).contains(&self.error_threshold) {
            return Err(LoadTestError::validation(format!(
                "stress test error_threshold must be within 0..=100, got {}",
                self.error_threshold
            )));
        }
        Ok(())
    }
}

impl SpikeConfig {
    /// Rejects zero users or any zero phase duration.
    pub fn validate(&self) -> Result<(), LoadTestError> {
        check_users("spike test base_users", self.base_users)?;
        check_users("spike test spike_users", self.spike_users)?;
        for (name, secs) in [
            ("base_duration_secs", self.base_duration_secs),
            ("spike_duration_secs", self.spike_duration_secs),
            ("recovery_duration_secs", self.recovery_duration_secs),
        ] {
            check_secs(&format!("spike test {name}"), secs)?;
        }
        if self.spike_users <= self.base_users {
            tracing::warn!(
                base_users = self.base_users,
                spike_users = self.spike_users,
                "spike phase does not add load over the base phase"
            );
        }
        Ok(())
    }
}

impl EnduranceConfig {
    /// Run length as a [`Duration`].
    pub fn duration(&self) -> Duration {
        saturating_secs_f64(self.duration_hours * 3600.0)
    }

    /// Monitoring interval as a [`Duration`].
    pub fn monitoring_interval(&self) -> Duration {
        saturating_secs_f64(self.monitoring_interval_minutes * 60.0)
    }

    /// Number of monitoring points a full run produces.
    pub fn expected_points(&self) -> u64 {
        let duration_minutes = self.duration_hours * 60.0;
        (duration_minutes / self.monitoring_interval_minutes).floor() as u64
    }

    /// Rejects zero users, non-positive or non-finite durations, an
    /// interval longer than the run, and intervals so short that the run
    /// would take more than [`MAX_MONITORING_POINTS`] points.
    pub fn validate(&self) -> Result<(), LoadTestError> {
        check_users("endurance test users", self.users)?;
        if !self.duration_hours.is_finite() || self.duration_hours <= 0.0 {
            return Err(LoadTestError::validation(format!(
                "endurance test duration_hours must be a positive number, got {}",
                self.duration_hours
            )));
        }
        if !self.monitoring_interval_minutes.is_finite() || self.monitoring_interval_minutes <= 0.0
        {
            return Err(LoadTestError::validation(format!(
                "endurance test monitoring_interval_minutes must be a positive number, got {}",
                self.monitoring_interval_minutes
            )));
        }
        if self.duration() > Duration::from_secs(MAX_RUN_SECS) {
            return Err(LoadTestError::validation(format!(
                "endurance test duration_hours ({}) exceeds the limit of {} hours",
                self.duration_hours,
                MAX_RUN_SECS / 3600
            )));
        }
        if self.monitoring_interval() < MIN_MONITORING_INTERVAL {
            return Err(LoadTestError::validation(format!(
                "endurance test monitoring_interval_minutes ({}) is shorter than {} second(s)",
                self.monitoring_interval_minutes,
                MIN_MONITORING_INTERVAL.as_secs()
            )));
        }
        if self.expected_points() > MAX_MONITORING_POINTS {
            return Err(LoadTestError::validation(format!(
                "endurance test would take {} monitoring points, more than the limit of {MAX_MONITORING_POINTS}",
                self.expected_points()
            )));
        }
        if self.monitoring_interval_minutes > self.duration_hours * 60.0 {
            return Err(LoadTestError::validation(format!(
                "endurance test monitoring_interval_minutes ({}) exceeds the run length ({} minutes)",
                self.monitoring_interval_minutes,
                self.duration_hours * 60.0
            )));
        }
        Ok(())
    }
}

impl TestConfig {
    /// Parse a TOML string into a validated [`TestConfig`].
    pub fn from_toml(content: &str) -> Result<Self, LoadTestError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a [`TestConfig`] from a file path.
    ///
    /// Returns [`LoadTestError::ConfigIo`] if the file cannot be read,
    /// [`LoadTestError::ConfigParse`] if the TOML is malformed, or
    /// [`LoadTestError::ConfigValidation`] if validation fails.
    pub fn load(path: &Path) -> Result<Self, LoadTestError> {
        let content = std::fs::read_to_string(path).map_err(|source| LoadTestError::ConfigIo {
            source,
            path: path.display().to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Validates whichever variant this is.
    pub fn validate(&self) -> Result<(), LoadTestError> {
        match self {
            Self::Load(c) => c.validate(),
            Self::Stress(c) => c.validate(),
            Self::Spike(c) => c.validate(),
            Self::Endurance(c) => c.validate(),
        }
    }

    /// Serializes the config back to TOML.
    pub fn to_toml(&self) -> Result<String, LoadTestError> {
        Ok(toml::to_string(self)?)
    }

    /// The mode name used as the TOML `type` tag.
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Load(_) => "load",
            Self::Stress(_) => "stress",
            Self::Spike(_) => "spike",
            Self::Endurance(_) => "endurance",
        }
    }

    /// Wall-clock upper bound of the run, excluding drain time.
    pub fn planned_duration(&self) -> Duration {
        match self {
            Self::Load(c) => c.duration(),
            Self::Stress(c) => {
                let all_steps = c.step_duration().saturating_mul(c.max_steps());
                // A step that starts before the budget runs out finishes.
                all_steps.min(c.max_duration().saturating_add(c.step_duration()))
            },
            Self::Spike(c) => Duration::from_secs(
                c.base_duration_secs
                    .saturating_add(c.spike_duration_secs)
                    .saturating_add(c.recovery_duration_secs),
            ),
            Self::Endurance(c) => c.duration(),
        }
    }
}
