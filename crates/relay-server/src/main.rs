//! Group relay server.
//!
//! Run with: `RELAY_ADMIN_KEY=... cargo run -p relay-server`
//!
//! Clients connect to `ws://127.0.0.1:8080/ws`, or poll
//! `http://127.0.0.1:8080/history` when WebSocket is unavailable.

mod settings;

use std::{process::ExitCode, sync::Arc};

use anyhow::Context;
use clap::Parser;
use relay_gateway::{MemoryObjectStore, RelayGateway, router, schedule};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::settings::{ADMIN_KEY_VAR, Settings, admin_key};

#[derive(Parser)]
#[command(name = "relay-server", about = "Real-time group chat relay")]
struct Cli {
    /// Settings file, extension optional
    #[arg(long, default_value = "config/relay")]
    config: String,
    /// Override `server.host`
    #[arg(long)]
    host: Option<String>,
    /// Override `server.port`
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut settings = Settings::load(&cli.config)?;
    if let Some(host) = cli.host {
        settings.server.host = host;
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    let admin = admin_key(std::env::var(ADMIN_KEY_VAR).ok().as_deref())?;

    let gateway = Arc::new(RelayGateway::new(
        settings.gateway_config(),
        admin,
        Arc::new(MemoryObjectStore::with_max_bytes(settings.relay.max_object_bytes)),
    ));

    let mut tasks = vec![
        Arc::clone(gateway.hub()).spawn_heartbeat(settings.heartbeat_interval()),
        schedule::spawn_rotation(Arc::clone(&gateway), settings.rotation_interval()),
    ];
    if settings.purge.daily {
        tasks.push(schedule::spawn_daily_purge(Arc::clone(&gateway)));
    }

    let listener = tokio::net::TcpListener::bind((settings.server.host.as_str(), settings.server.port))
        .await
        .with_context(|| {
            format!(
                "failed to bind {}:{}",
                settings.server.host, settings.server.port
            )
        })?;
    tracing::info!("Relay listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(gateway))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    for task in tasks {
        task.abort();
    }
    tracing::info!("Relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
