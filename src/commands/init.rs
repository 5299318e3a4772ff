//! `loadrig init` command implementation.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::{CONFIG_FILE, LOADRIG_DIR};

/// Execute the `init` command.
///
/// Writes the starter template for `mode` to `<base_dir>/.loadrig/perftest.toml`
/// and returns its path. Refuses to overwrite an existing file unless `force`.
pub fn execute_init(mode: &str, force: bool, base_dir: &Path) -> Result<PathBuf> {
    let config_dir = base_dir.join(LOADRIG_DIR);
    let config_path = config_dir.join(CONFIG_FILE);

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}\n\
             Use `--force` to overwrite.",
            config_path.display()
        );
    }

    let content = generate_template(mode)?;

    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("Failed to create {}", config_dir.display()))?;
    std::fs::write(&config_path, content)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    Ok(config_path)
}

/// Starter TOML for one test mode.
fn generate_template(mode: &str) -> Result<&'static str> {
    let template = match mode {
        "load" => LOAD_TEMPLATE,
        "stress" => STRESS_TEMPLATE,
        "spike" => SPIKE_TEMPLATE,
        "endurance" => ENDURANCE_TEMPLATE,
        other => anyhow::bail!("Unknown test mode '{other}'"),
    };
    Ok(template)
}

const LOAD_TEMPLATE: &str = r#"# loadrig load test: fixed concurrency for a fixed duration.
type = "load"

# Test duration in seconds
duration_secs = 30

# Number of concurrent virtual users
users = 5

# Spread user start times over this many seconds
ramp_up_secs = 10

# Pause between a user's requests, in milliseconds
think_time_ms = 1000
"#;

const STRESS_TEMPLATE: &str = r#"# loadrig stress test: add users step by step until the error rate
# exceeds the threshold (the breaking point).
type = "stress"

# Upper bound for the search
max_users = 20

# Users added per step (the first step runs this many)
step_size = 2

# Length of each step in seconds
step_duration_secs = 10

# Stop searching once this many seconds have elapsed
max_duration_secs = 120

# Error rate in percent (0-100) that marks the breaking point
error_threshold = 5.0
"#;

const SPIKE_TEMPLATE: &str = r#"# loadrig spike test: base load, a sudden spike, then recovery at base load.
type = "spike"

base_users = 2
spike_users = 20

# Phase lengths in seconds
base_duration_secs = 10
spike_duration_secs = 5
recovery_duration_secs = 10
"#;

const ENDURANCE_TEMPLATE: &str = r#"# loadrig endurance test: steady load for a long time, sampled periodically
# to detect degradation.
type = "endurance"

users = 5

# Run length in hours (fractions allowed)
duration_hours = 1.0

# Take a cumulative monitoring point every this many minutes
monitoring_interval_minutes = 5.0
"#;
