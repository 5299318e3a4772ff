//! `loadrig` CLI subcommands.
//!
//! Provides `run` (execute the configured test) and `init` (generate a
//! starter config).

mod init;
mod run;

use anyhow::Result;
use clap::Subcommand;
use std::path::PathBuf;

/// Directory holding the config file and reports.
pub const LOADRIG_DIR: &str = ".loadrig";

/// Config file name inside [`LOADRIG_DIR`].
pub const CONFIG_FILE: &str = "perftest.toml";

#[derive(Debug, Subcommand)]
pub enum PerfCommand {
    /// Run a performance test against an HTTP endpoint
    ///
    /// Executes the test mode defined in .loadrig/perftest.toml (or a custom
    /// config path), one GET request per invocation. Reports results to the
    /// terminal and writes a JSON report to .loadrig/reports/.
    Run {
        /// Target URL
        url: String,

        /// Path to config file (default: auto-discover .loadrig/perftest.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Per-request timeout in milliseconds
        #[arg(long, default_value_t = 30_000)]
        timeout_ms: u64,

        /// Disable JSON report output
        #[arg(long)]
        no_report: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Generate a starter config file
    ///
    /// Creates .loadrig/perftest.toml for the chosen test mode.
    Init {
        /// Test mode
        #[arg(value_parser = ["load", "stress", "spike", "endurance"])]
        mode: String,

        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
}

impl PerfCommand {
    /// Execute the selected subcommand.
    pub fn execute(self) -> Result<()> {
        match self {
            PerfCommand::Run {
                url,
                config,
                timeout_ms,
                no_report,
                no_color,
            } => {
                let runtime = tokio::runtime::Runtime::new()?;
                runtime.block_on(run::execute_run(
                    url, config, timeout_ms, no_report, no_color,
                ))
            },
            PerfCommand::Init { mode, force } => {
                let cwd = std::env::current_dir()?;
                let path = init::execute_init(&mode, force, &cwd)?;
                eprintln!("Created {}", path.display());
                eprintln!("Edit the file to tune the {mode} test.");
                Ok(())
            },
        }
    }
}
