mod app;
mod cli;
mod log;
mod server;
mod service;
mod supervisor;
mod xray;

use std::{process::ExitCode, sync::Arc, time::Duration};

use app::App;
use clap::Parser;
use cli::Cli;
use proxops_common::error::Error;
use server::auth::AuthState;
use service::NodeService;
use supervisor::Supervisor;
use tokio::{
    net::TcpListener,
    signal::unix::{signal, SignalKind},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use xray::{admin::AdminClient, config::server::ServerConfig};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> ExitCode {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let _guard = log::init_logging();

    let args = Cli::parse();
    if let Err(e) = args.validate() {
        error!("invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    let mut app = App::new();
    let result = run(&args, &mut app).await;

    // bounded close of everything that got initialized, in reverse
    if tokio::time::timeout(CLOSE_TIMEOUT, app.close()).await.is_err() {
        error!("component close timed out");
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("daemon failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Cli, app: &mut App) -> Result<(), Error> {
    let server_cfg = ServerConfig::load(&args.server_config_path())?;
    let client_cfg = xray::config::client::load(&args.client_config_path())?;
    let auth = AuthState::new(&args.access_key)?;
    let tls_config = args
        .tls_paths()?
        .map(|paths| server::tls::load_server_config(&paths))
        .transpose()?;

    let listener = TcpListener::bind(&args.endpoint)
        .await
        .map_err(|e| Error::Config(format!("bind {}: {e}", args.endpoint)))?;

    let command = vec![
        args.xray_exec().display().to_string(),
        "run".to_string(),
        "-config".to_string(),
        args.run_config_path().display().to_string(),
    ];
    let supervisor = Arc::new(supervisor::platform("xray", command)?);
    {
        let supervisor = Arc::clone(&supervisor);
        app.component("supervisor", move || async move { supervisor.close().await });
    }

    let admin = Arc::new(AdminClient::new(
        server_cfg.api_listen(),
        server_cfg.inbounds().to_vec(),
    ));
    {
        let admin = Arc::clone(&admin);
        app.component("admin api", move || async move { admin.close().await });
    }

    let service = Arc::new(NodeService::new(
        server_cfg,
        client_cfg,
        args.run_config_path(),
        supervisor,
        admin,
    ));
    let router = server::router(service, auth);

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let mut interrupt = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        let mut terminate = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = interrupt.recv() => info!("received SIGINT, shutting down"),
            _ = terminate.recv() => info!("received SIGTERM, shutting down"),
        }
        signal_shutdown.cancel();
    });

    info!("node daemon listening on {}", args.endpoint);
    match tls_config {
        Some(tls_config) => {
            tokio::select! {
                result = server::tls::serve(listener, tls_config, router) => result,
                _ = shutdown.cancelled() => Ok(()),
            }
        }
        None => server::serve(listener, router, shutdown).await,
    }
}
