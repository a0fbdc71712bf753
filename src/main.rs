//! API gateway (v1)
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────────┐
//!                        │                    API GATEWAY                   │
//!                        │                                                  │
//!   Client Request       │  ┌────────┐   ┌────────┐   ┌──────────┐          │
//!   ─────────────────────┼─▶│ agent  │──▶│service │──▶│authorize │          │
//!                        │  │ ident. │   │resolve │   │ (tiers)  │          │
//!                        │  └────────┘   └───┬────┘   └────┬─────┘          │
//!                        │                   │             ▼                │
//!                        │            ┌──────┴──────┐ ┌──────────┐          │
//!                        │            │  Forwarder  │ │ forward  │──────────┼──▶ Backend
//!                        │            │ mount table │ │HTTP / RPC│          │   (handshake,
//!                        │            └──────▲──────┘ └──────────┘          │    dispatch)
//!                        │                   │ mount                        │
//!                        │            ┌──────┴──────┐   ┌───────────┐      │
//!                        │            │ Registration│◀──│ Directory │◀─────┼─── Backend
//!                        │            │ controller  │   │  (watch)  │      │   register
//!                        │            └─────────────┘   └───────────┘      │
//!                        └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use api_gateway::auth::AuthEngines;
use api_gateway::composite::Connector;
use api_gateway::config::load_config;
use api_gateway::directory::file::{apply, load_directory_file, sync_updates, DirectoryFileWatcher};
use api_gateway::directory::MemoryDirectory;
use api_gateway::lifecycle::{shutdown_signal, Shutdown};
use api_gateway::observability::{init_logging, init_metrics};
use api_gateway::rpc::HttpDialer;
use api_gateway::{Forwarder, GatewayServer, GatewayState, RegistrationController};

#[derive(Parser)]
#[command(name = "api-gateway")]
#[command(about = "Directory-driven API gateway", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory file of service descriptors and caller credentials.
    #[arg(short, long)]
    directory: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("warning: failed to load .env: {}", e);
        }
    }

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_logging(&config.observability);

    tracing::info!("api-gateway v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        base_path = %config.listener.base_path,
        environment = %config.auth.environment,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let directory = MemoryDirectory::new();

    // Kept alive for the lifetime of the process.
    let mut _watcher = None;
    if let Some(path) = cli.directory.or_else(|| config.directory.file.clone().map(PathBuf::from)) {
        let file = load_directory_file(&path)?;
        apply(&directory, &file, false).await?;
        tracing::info!(path = %path.display(), services = file.services.len(), "Directory file loaded");

        let (watcher, updates) = DirectoryFileWatcher::new(&path);
        _watcher = Some(watcher.run()?);
        tokio::spawn(sync_updates(directory.clone(), updates, shutdown.subscribe()));
    }

    let dialer = HttpDialer::new().with_max_reply_bytes(config.forwarding.max_reply_bytes);
    let mut connector = Connector::new(Arc::new(dialer))
        .with_static_routes(config.static_route_table()?);
    if !config.directory.key.is_empty() {
        connector = connector.with_hostname(config.directory.key.clone());
    }

    let forwarder = Arc::new(Forwarder::new());
    let engines = Arc::new(AuthEngines::from_config(&config.auth, Arc::new(directory.clone())));

    let controller = Arc::new(RegistrationController::new(
        Arc::new(directory.clone()),
        connector,
        forwarder.clone(),
    ));
    let controller_task = {
        let controller = controller.clone();
        let stop = shutdown.subscribe();
        tokio::spawn(async move { controller.run(stop).await })
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let stopped = shutdown.wait();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.trigger();
        });
    }

    let state = GatewayState::new(&config, forwarder.clone(), engines);
    GatewayServer::new(&config, state)
        .run(listener, stopped)
        .await?;

    shutdown.trigger();
    match controller_task.await {
        Ok(Err(e)) => tracing::error!(error = %e, "Registration controller failed"),
        Err(e) => tracing::error!(error = %e, "Registration controller panicked"),
        Ok(Ok(())) => {}
    }
    forwarder.stop_all();

    tracing::info!("Shutdown complete");
    Ok(())
}
