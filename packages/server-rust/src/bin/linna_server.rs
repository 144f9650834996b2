//! `linna-server`: load the built-in modules and serve them over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use linna_core::ProviderKind;
use linna_server::logging::{self, TracingSink};
use linna_server::modules::{AccountsModule, FacebookInstantVerifier};
use linna_server::storage::MemoryDatabase;
use linna_server::{HostBuilder, NetworkModule, ServerConfig};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();
    logging::init(config.log_format)?;

    if let Some(port) = config.metrics_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        info!(%addr, "metrics endpoint listening");
    }

    let fb_secret = config.facebook_instant_app_secret.clone();
    let mut builder = HostBuilder::new(
        config,
        Arc::new(MemoryDatabase::new()),
        Arc::new(TracingSink),
    );

    let mut accounts = AccountsModule::new(builder.sessions());
    if let Some(secret) = fb_secret {
        accounts = accounts.with_verifier(
            ProviderKind::FacebookInstantGame,
            Arc::new(FacebookInstantVerifier::new(secret)),
        );
    }
    builder.load_module(Arc::new(accounts))?;

    let host = builder.build();
    info!(rpcs = ?host.rpc_ids(), providers = ?host.capabilities(), "host ready");

    let mut network = NetworkModule::new(host);
    let port = network.start().await?;
    info!(port, "linna-server started");
    network.serve(shutdown_signal()).await
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {err}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => error!("failed to install SIGTERM handler: {err}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
