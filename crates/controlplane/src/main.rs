mod cli;
mod client;
mod log;
mod reconcile;
mod storage;

use std::{process::ExitCode, time::Duration};

use clap::Parser;
use cli::Cli;
use client::NodeClient;
use reconcile::{driver::ReconcileDriver, NodeController};
use storage::FileStorage;
use tokio::{
    signal::unix::{signal, SignalKind},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let _guard = log::init_logging();

    let args = Cli::parse();
    if let Err(e) = args.validate() {
        error!("invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    let storage = match FileStorage::load(args.state_file.clone()).await {
        Ok(s) => s,
        Err(e) => {
            error!("failed to load node state: {e}");
            return ExitCode::FAILURE;
        }
    };

    let api = match NodeClient::new(&args.endpoint, &args.access_key) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to build node client: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!("reconciling node at {} from {}", args.endpoint, args.state_file.display());

    let controller = NodeController::new(storage, api);
    let driver = ReconcileDriver::new(controller, Duration::from_secs(args.interval));

    let cancel = CancellationToken::new();
    // Wake channel for the management surface; held open so on-demand
    // reconcile requests can be wired in.
    let (_wake_tx, wake_rx) = mpsc::channel(5);

    let mut interrupt = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    let mut terminate = signal(SignalKind::terminate()).expect("install SIGTERM handler");

    tokio::select! {
        _ = driver.run(cancel.clone(), wake_rx) => {}
        _ = interrupt.recv() => info!("received SIGINT, shutting down"),
        _ = terminate.recv() => info!("received SIGTERM, shutting down"),
    }

    cancel.cancel();
    ExitCode::SUCCESS
}
