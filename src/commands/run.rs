//! `loadrig run` command implementation.

use anyhow::{Context, Result};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use loadrig::loadtest::config::TestConfig;
use loadrig::loadtest::engine::PerformanceTester;
use loadrig::loadtest::operation::HttpProbe;
use loadrig::loadtest::report::{write_report, PerfTestReport};
use loadrig::loadtest::summary::render_summary;

use super::{CONFIG_FILE, LOADRIG_DIR};

/// Execute the `run` command.
///
/// Loads config (via explicit path or auto-discovery), runs the selected mode
/// against an [`HttpProbe`], prints the summary and writes the JSON report.
pub async fn execute_run(
    url: String,
    config_path: Option<PathBuf>,
    timeout_ms: u64,
    no_report: bool,
    no_color: bool,
) -> Result<()> {
    let config_file = match config_path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: {}\nUse `loadrig init <mode>` to create one.",
                    path.display()
                );
            }
            path
        },
        None => {
            let cwd = std::env::current_dir()?;
            match discover_config(&cwd) {
                Some(path) => path,
                None => anyhow::bail!(
                    "No perftest config found.\n\
                     Run `loadrig init <mode>` to create {LOADRIG_DIR}/{CONFIG_FILE},\n\
                     or use `--config path/to/file.toml` to specify one."
                ),
            }
        },
    };

    eprintln!("Loading config from: {}", config_file.display());
    let config = TestConfig::load(&config_file)
        .with_context(|| format!("Failed to load config '{}'", config_file.display()))?;

    let probe = HttpProbe::new(url.clone()).with_timeout(Duration::from_millis(timeout_ms));
    let shutdown = CancellationToken::new();
    tokio::spawn(handle_ctrl_c(shutdown.clone()));
    let tester = PerformanceTester::new(probe).with_shutdown(shutdown);

    eprintln!(
        "Running {} test against {} (about {}s, Ctrl+C to stop early)",
        config.mode(),
        url,
        config.planned_duration().as_secs()
    );

    let result = tester
        .run(&config)
        .await
        .context("Performance test failed")?;

    if no_color || !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }
    println!("{}", render_summary(&result, &url));

    if !no_report {
        let report = PerfTestReport::new(&result, &config, &url);
        let cwd = std::env::current_dir()?;
        match write_report(&report, &cwd) {
            Ok(path) => {
                eprintln!();
                eprintln!("Report written to: {}", path.display());
            },
            // Non-fatal: the test itself completed.
            Err(e) => tracing::warn!(error = %e, "failed to write report"),
        }
    }

    Ok(())
}

/// Discover `.loadrig/perftest.toml` by walking parent directories from
/// `start`, like `.git` discovery.
fn discover_config(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(LOADRIG_DIR).join(CONFIG_FILE);
        if candidate.exists() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// First Ctrl+C stops the run gracefully; the second aborts.
async fn handle_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("failed to install Ctrl+C handler");
        return;
    }
    eprintln!("\nReceived Ctrl+C, stopping gracefully...");
    cancel.cancel();

    if tokio::signal::ctrl_c().await.is_ok() {
        eprintln!("\nReceived second Ctrl+C, aborting immediately.");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_config_walks_up() {
        let root = tempfile::tempdir().unwrap();
        let config_dir = root.path().join(LOADRIG_DIR);
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join(CONFIG_FILE), "type = \"load\"").unwrap();
        let nested = root.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = discover_config(&nested).unwrap();
        assert_eq!(found, config_dir.join(CONFIG_FILE));
    }

    #[test]
    fn test_discover_config_returns_none_without_config() {
        let root = tempfile::tempdir().unwrap();
        // Nothing above a fresh temp dir should carry a loadrig config.
        let found = discover_config(root.path());
        assert!(found.map_or(true, |p| !p.starts_with(root.path())));
    }
}
