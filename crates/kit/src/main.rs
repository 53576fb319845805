use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Context;
use color_eyre::{Report, Result};

mod client;
mod disk;
#[cfg(test)]
mod fake;
mod model;
mod pipeline;
mod run;
mod utils;
mod wait;

/// Exercise disk updates against an oVirt engine.
///
/// ovdk takes one disk attached to a virtual machine through a fixed series
/// of updates (alias, description, QCOW version, size), waits for the engine
/// to settle after each one and checks that the change took effect.
#[derive(Parser)]
struct Cli {
    /// Also write the log to this file
    #[clap(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available ovdk commands.
#[derive(Subcommand)]
enum Commands {
    /// Run the full disk-update pipeline
    ///
    /// Normalizes the disk, then renames it, flips its QCOW version back and
    /// forth and grows it twice, verifying each change. Steps depend on each
    /// other and always run in the same order; the first failure stops the
    /// run.
    Run(run::RunOpts),

    /// Inspect, update or wait for a single disk
    #[clap(subcommand)]
    Disk(disk::DiskCommands),
}

/// Install and configure the tracing/logging system.
///
/// Logs are filtered by RUST_LOG environment variable, defaulting to 'info',
/// and go to stderr. With a log file, the same events are also appended to
/// it without ANSI colors.
fn install_tracing(log_file: Option<&Path>) -> Result<()> {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Configuring log filter")?;

    let file_layer = match log_file {
        Some(path) => {
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Opening log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(file_layer)
        .with(ErrorLayer::default())
        .init();
    Ok(())
}

/// Main entry point for the ovdk CLI application.
fn main() -> Result<(), Report> {
    let cli = Cli::parse();
    install_tracing(cli.log_file.as_deref())?;
    color_eyre::install()?;

    match cli.command {
        Commands::Run(opts) => run::run(opts)?,
        Commands::Disk(cmd) => cmd.run()?,
    }
    Ok(())
}
