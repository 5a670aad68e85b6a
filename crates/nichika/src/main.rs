//! # nichika
//!
//! Broadcast server binary: loads settings, starts the hub and the
//! HTTP/WebSocket front end, and shuts both down on ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use nichika_hub::Hub;
use nichika_logging::LogFormat;
use nichika_server::{NichikaServer, ServerConfig};
use nichika_settings::{NichikaSettings, ServerSettings};

/// nichika broadcast server.
#[derive(Parser, Debug)]
#[command(name = "nichika", about = "WebSocket broadcast hub", version)]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.nichika/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter directive, e.g. `info` or `nichika_hub=debug`.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn settings_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(nichika_settings::settings_path)
    }

    /// Command-line flags win over file and environment.
    fn apply(&self, settings: &mut NichikaSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.format = LogFormat::Json;
        }
    }
}

fn server_config(settings: &ServerSettings) -> ServerConfig {
    ServerConfig {
        host: settings.host.clone(),
        port: settings.port,
        max_connections: settings.max_connections,
        heartbeat_interval_secs: settings.heartbeat_interval_secs,
        heartbeat_timeout_secs: settings.heartbeat_timeout_secs,
        max_message_size: settings.max_message_size,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let path = args.settings_path();
    let mut settings = nichika_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    args.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    nichika_logging::init_subscriber(&settings.logging.to_config())
        .context("Failed to initialize logging")?;
    let metrics = nichika_server::metrics::install_recorder()?;

    let (hub, handle) = Hub::new(&settings.hub);
    let server = NichikaServer::new(server_config(&settings.server), handle, metrics);
    let hub_task = hub.with_shutdown(server.shutdown().token()).spawn();
    let (addr, serve_task) = server.listen().await.context("Failed to start server")?;

    tracing::info!(
        intake_capacity = settings.hub.intake_capacity,
        client_buffer = settings.hub.client_buffer,
        "nichika listening on http://{addr}"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let hub_report = tokio::spawn(async move {
        match hub_task.await {
            Ok(stats) => tracing::info!(
                registered = stats.registered,
                evicted = stats.evicted,
                delivered = stats.delivered,
                "hub drained"
            ),
            Err(e) => tracing::warn!(error = %e, "hub task failed"),
        }
    });
    let clean = server
        .shutdown()
        .graceful_shutdown(vec![serve_task, hub_report], None)
        .await;

    tracing::info!(clean, "Shutdown complete");
    Ok(())
}
