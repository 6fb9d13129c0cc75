//! railyard binary: boot the workbench for the current project.

use clap::Parser;
use ry_core::db::NullDriver;
use ry_core::logs::LogFilter;
use ry_core::{ExitCode, Workbench};
use ry_config::ConfigStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Developer-workstation observability and control plane for Rails/web
/// applications.
#[derive(Parser, Debug)]
#[command(name = "railyard", version, about)]
struct Cli {
    /// Project root (defaults to the current directory).
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Start all configured processes immediately.
    #[arg(long)]
    start_all: bool,

    /// Print the last N log lines on shutdown.
    #[arg(long, default_value_t = 0)]
    tail: usize,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    std::process::exit(run(cli).await.as_i32());
}

async fn run(cli: Cli) -> ExitCode {
    let config = match ConfigStore::new(&cli.root).load() {
        Ok(config) => config,
        Err(err) => {
            error!("configuration error: {}", err);
            return ExitCode::ConfigError;
        }
    };

    let workbench = Workbench::new(&cli.root, config, Arc::new(NullDriver::new()));
    let seeded = workbench.seed_processes();
    if seeded == 0 {
        info!("no processes configured or detected; supervisor is idle");
    }

    if cli.start_all {
        for (name, outcome) in workbench.processes.start_all() {
            if let Err(err) = outcome {
                error!(process = %name, "start failed: {}", err);
            }
        }
    }

    info!("railyard up; ctrl-c to shut down");
    if tokio::signal::ctrl_c().await.is_err() {
        error!("signal handler unavailable");
        workbench.shutdown().await;
        return ExitCode::Failure;
    }

    info!("shutting down");
    workbench.shutdown().await;

    if cli.tail > 0 {
        let lines = workbench.logs(&LogFilter {
            limit: Some(cli.tail),
            ..Default::default()
        });
        for line in lines {
            println!("[{}] {}", line.process, line.content);
        }
    }

    ExitCode::Clean
}
