//! relpd - RELP collector
//!
//! Accepts RELP sessions and writes every received message to stdout.

use relp_server::{Config, Listener, OutputFormat, ServerMessage};
use serde::Serialize;
use std::io::Write;
use std::sync::atomic::Ordering;
use tracing_subscriber::EnvFilter;

/// One received message as printed by relpd.
#[derive(Debug, Serialize)]
struct Record<'a> {
    txn: u64,
    remote: String,
    connection: String,
    message: &'a str,
}

impl<'a> Record<'a> {
    fn new(msg: &ServerMessage, message: &'a str) -> Self {
        Self {
            txn: msg.txn(),
            remote: msg.remote_addr().to_string(),
            connection: msg.connection_id().to_string(),
            message,
        }
    }

    fn render(&self, format: OutputFormat) -> Result<String, serde_json::Error> {
        match format {
            OutputFormat::Text => Ok(format!("{} txn={} {}", self.remote, self.txn, self.message)),
            OutputFormat::Json => serde_json::to_string(self),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout carries the records.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load configuration (from file if RELP_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("RELP_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if std::env::var("RELP_CONFIG").is_ok() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::warn!("Invalid environment configuration ({}), using defaults", e);
            Config::default()
        }
    };

    tracing::info!("Starting relpd");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Auto-ack: {}", config.network.auto_ack);
    tracing::info!("  Max connections: {}", config.network.max_connections);
    tracing::info!("  Output: {:?}", config.output.format);

    let (listener, mut receiver) = Listener::start(config.listener_config()).await?;
    let auto_ack = config.network.auto_ack;
    let format = config.output.format;
    let mut stdout = std::io::stdout().lock();

    loop {
        tokio::select! {
            msg = receiver.recv() => {
                let Some(msg) = msg else {
                    tracing::warn!("Listener stopped");
                    break;
                };

                let text = msg.payload_lossy();
                writeln!(stdout, "{}", Record::new(&msg, &text).render(format)?)?;
                stdout.flush()?;

                if !auto_ack {
                    if let Err(e) = msg.acknowledge().await {
                        tracing::warn!(
                            "Failed to acknowledge txn {} from {}: {}",
                            msg.txn(),
                            msg.remote_addr(),
                            e
                        );
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal, stopping listener...");
                break;
            }
        }
    }

    listener.close().await;

    let stats = listener.stats();
    tracing::info!(
        "Listener stopped ({} connections, {} messages, {} rejected)",
        stats.connections_total.load(Ordering::Relaxed),
        stats.messages_received.load(Ordering::Relaxed),
        stats.connections_rejected.load(Ordering::Relaxed)
    );
    Ok(())
}
