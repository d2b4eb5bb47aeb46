//! rsync-courier - Queued rsync transfer agent
//!
//! Entry point for the daemon.

use anyhow::{Context, Result};
use clap::Parser;
use rsync_courier::config::{CliArgs, CourierConfig};
use rsync_courier::server::{self, AppState};
use rsync_courier::worker::Worker;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args = CliArgs::parse();

    setup_logging(args.verbose);

    let config = Arc::new(
        CourierConfig::load(&args.config).context("Invalid configuration")?,
    );
    config
        .ensure_marker()
        .context("Failed to prepare the completion marker")?;

    info!(
        "rsync-courier is running, data will be sent to {}",
        config.remote_display()
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create async runtime")?;

    runtime.block_on(run_inner(args, config))
}

async fn run_inner(args: CliArgs, config: Arc<CourierConfig>) -> Result<()> {
    let state = Arc::new(AppState::new(Arc::clone(&config)));

    let worker = Worker::new(
        config,
        state.queue.clone(),
        state.cancel.clone(),
        state.current.clone(),
    );
    tokio::spawn(worker.run());

    server::serve(state, &args.bind, args.port)
        .await
        .context("Server failed")
}

fn setup_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("rsync_courier=debug,warn")
    } else {
        EnvFilter::new("rsync_courier=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
