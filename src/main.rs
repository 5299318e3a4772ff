//! loadrig: load, stress, spike and endurance testing from the command line.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

/// Load, stress, spike and endurance testing for HTTP endpoints
#[derive(Parser)]
#[command(name = "loadrig")]
#[command(about = "Load, stress, spike and endurance testing for HTTP endpoints", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::PerfCommand,
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    cli.command.execute()
}

/// Logs go to stderr so the summary on stdout stays pipeable.
///
/// `RUST_LOG` overrides the default `info` level.
fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
