//! relp-cli - send syslog messages to a RELP collector
//!
//! Provides both a REPL and one-shot sending.

mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use relp_client::{Client, ClientError, ConnectionConfig};
use relp_protocol::DEFAULT_PORT;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relp-cli")]
#[command(about = "Send syslog messages to a RELP collector")]
#[command(version)]
struct Cli {
    /// Collector host
    #[arg(short = 'H', long, env = "RELP_SERVER", default_value = "127.0.0.1")]
    server: String,

    /// Collector port
    #[arg(short, long, env = "RELP_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Timeout in seconds for connecting and for each send
    #[arg(short, long, default_value_t = 10)]
    timeout: u64,

    /// Do not wait for acknowledgements
    #[arg(long)]
    no_ack: bool,

    /// Extra offer line (name=value), repeatable
    #[arg(long = "offer", value_parser = parse_offer_param)]
    offer: Vec<(String, String)>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start interactive REPL
    Repl,

    /// Send messages and exit
    Send {
        /// Messages to send; lines from stdin when none are given
        messages: Vec<String>,
    },
}

fn parse_offer_param(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.is_empty() && !value.contains('\n') => {
            Ok((name.to_string(), value.to_string()))
        }
        _ => Err(format!("expected name=value, got {:?}", s)),
    }
}

impl Cli {
    fn connection_config(&self) -> ConnectionConfig {
        let config = ConnectionConfig::new(&self.server, self.port)
            .with_connect_timeout(self.timeout())
            .with_wait_ack(!self.no_ack);
        self.offer
            .iter()
            .fold(config, |config, (name, value)| config.with_offer_param(name, value))
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.connection_config();

    match &cli.command {
        Some(Commands::Repl) | None => {
            repl::run(config, cli.timeout()).await?;
        }
        Some(Commands::Send { messages }) => {
            let mut client = Client::connect(config).await.map_err(|e| {
                eprintln!("{}: {}", "Connection failed".red(), e);
                e
            })?;

            let sent = if messages.is_empty() {
                send_stdin(&mut client, cli.timeout()).await
            } else {
                send_all(&mut client, messages, cli.timeout()).await
            };

            match sent {
                Ok(count) => {
                    client.close().await?;
                    eprintln!("{} {} message(s)", "Sent".green(), count);
                }
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    let _ = client.close().await;
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

async fn send_one(client: &mut Client, message: &str, timeout: Duration) -> Result<u64, ClientError> {
    client.set_deadline(Some(Instant::now() + timeout))?;
    client.send(message.to_string()).await
}

async fn send_all(
    client: &mut Client,
    messages: &[String],
    timeout: Duration,
) -> Result<usize, ClientError> {
    for message in messages {
        let txn = send_one(client, message, timeout).await?;
        tracing::debug!("Sent txn {}", txn);
    }
    Ok(messages.len())
}

async fn send_stdin(client: &mut Client, timeout: Duration) -> Result<usize, ClientError> {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut count = 0;
    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            continue;
        }
        let txn = send_one(client, &line, timeout).await?;
        tracing::debug!("Sent txn {}", txn);
        count += 1;
    }
    Ok(count)
}
