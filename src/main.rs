//! # Tiddler Entry Point
//!
//! Command line front end for the feed workflow:
//!
//! - `tiddler run`: one full refresh (generate, transform, publish). This is
//!   what the weekly scheduler invokes; the exit status is non-zero unless the
//!   run succeeded.
//! - `tiddler transform <csv> <ics>`: turn a local readings file into a
//!   calendar file without touching the object store.
//! - `tiddler init-config`: write the default configuration file.

#[cfg(test)]
mod tests;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tiddler_lib::calendar::FeedConfig;
use tiddler_lib::config::{Config, CONFIG_FILE};
use tiddler_lib::job::CommandDispatcher;
use tiddler_lib::orchestrator::{Orchestrator, RunReport};
use tiddler_lib::pipeline;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tiddler", version, about = "High-tide calendar feed publisher")]
struct Cli {
    /// Configuration file
    #[arg(long, short, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate fresh readings and publish the feed
    Run,
    /// Convert a local readings CSV into an iCalendar file
    Transform {
        /// Readings CSV (location,date,time,height,tag)
        input: PathBuf,
        /// Calendar file to write
        output: PathBuf,
    },
    /// Write the default configuration to the config path
    InitConfig,
}

/// Initialize tracing with `RUST_LOG` filtering, defaulting to `info`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Run => {
            let config = Config::load_from_path(&cli.config);
            let rt = tokio::runtime::Runtime::new()?;
            let report = rt.block_on(run_once(&config))?;
            finish(report)
        }
        Command::Transform { input, output } => {
            let config = Config::load_from_path(&cli.config);
            let feed = config.feed()?;
            let events = transform_file(&input, &output, &feed)?;
            tracing::info!(events, output = %output.display(), "calendar written");
            Ok(())
        }
        Command::InitConfig => {
            if cli.config.exists() {
                bail!("{} already exists", cli.config.display());
            }
            Config::default().save(&cli.config)
        }
    }
}

/// Build the workflow from configuration and execute a single run.
async fn run_once(config: &Config) -> anyhow::Result<RunReport> {
    let run_config = config.run_config().context("invalid run configuration")?;
    let store = config.open_store().context("opening object store")?;
    let command = config.job_command()?;
    let dispatcher = CommandDispatcher::from_command_line(command, Arc::clone(&store))
        .context("job command is empty")?;

    let orchestrator = Orchestrator::new(run_config, Arc::new(dispatcher), store);
    Ok(orchestrator.run().await)
}

/// Turn a run report into the process outcome.
fn finish(report: RunReport) -> anyhow::Result<()> {
    let elapsed = report.finished_at - report.started_at;
    match report.cause {
        None => {
            tracing::info!(
                run_id = %report.run_id,
                events = report.events,
                elapsed_ms = elapsed.num_milliseconds(),
                "run succeeded"
            );
            Ok(())
        }
        Some(cause) => Err(anyhow::Error::new(cause)
            .context(format!("run {} ended {}", report.run_id, report.state))),
    }
}

/// Local file transform: CSV in, iCalendar out. Returns the event count.
fn transform_file(input: &Path, output: &Path, feed: &FeedConfig) -> anyhow::Result<usize> {
    let raw = std::fs::read_to_string(input)
        .with_context(|| format!("reading {}", input.display()))?;
    let transformed = pipeline::transform(&raw, feed)
        .with_context(|| format!("parsing {}", input.display()))?;
    std::fs::write(output, &transformed.ics)
        .with_context(|| format!("writing {}", output.display()))?;
    Ok(transformed.events.len())
}
