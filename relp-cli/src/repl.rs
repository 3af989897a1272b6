//! Interactive REPL.

use colored::Colorize;
use relp_client::{Client, ConnectionConfig};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;

const HELP_TEXT: &str = r#"
Every line is sent as one syslog message.

Meta commands:
  :help                 Show this help
  :state                Show session state and next txn
  :offer                Show the offer the collector answered with
  :reconnect            Drop the connection and open a new session
  :quit                 Close the session and exit
"#;

enum Outcome {
    Print(String),
    Quit,
}

pub async fn run(config: ConnectionConfig, timeout: Duration) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "relp-cli".bold().cyan());
    println!("Connecting to {}...", config.addr());

    let mut client = Client::connect(config).await?;
    println!("{}", "Connected!".green());

    let rl_config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(rl_config)?;

    let history_path = history_path();
    let _ = rl.load_history(&history_path);

    println!("Type ':help' for available commands.\n");

    loop {
        let prompt = format!("{} ", "relp>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim_end_matches(['\r', '\n']);
                if line.trim().is_empty() {
                    continue;
                }

                match execute_line(&mut client, line, timeout).await {
                    Ok(Outcome::Print(output)) => println!("{}", output),
                    Ok(Outcome::Quit) => break,
                    Err(e) => println!("{}: {}", "Error".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);

    let _ = client.close().await;
    println!("{}", "Disconnected.".dimmed());

    Ok(())
}

fn history_path() -> PathBuf {
    home::home_dir()
        .map(|h| h.join(".relp_history"))
        .unwrap_or_else(|| ".relp_history".into())
}

async fn execute_line(
    client: &mut Client,
    line: &str,
    timeout: Duration,
) -> Result<Outcome, Box<dyn std::error::Error>> {
    if let Some(meta) = line.strip_prefix(':') {
        return execute_meta(client, meta.trim()).await;
    }

    client.set_deadline(Some(Instant::now() + timeout))?;
    match client.send(line.to_string()).await {
        Ok(txn) => {
            let verb = if client.config().wait_ack { "acked" } else { "sent" };
            Ok(Outcome::Print(format!("{} txn {}", verb.green(), txn.to_string().cyan())))
        }
        Err(e) if e.is_retryable() => Ok(Outcome::Print(format!(
            "{}: {} (try :reconnect)",
            "Error".red(),
            e
        ))),
        Err(e) => Err(e.into()),
    }
}

async fn execute_meta(
    client: &mut Client,
    command: &str,
) -> Result<Outcome, Box<dyn std::error::Error>> {
    match command.to_lowercase().as_str() {
        "help" | "h" | "?" => Ok(Outcome::Print(HELP_TEXT.to_string())),

        "quit" | "exit" | "q" => Ok(Outcome::Quit),

        "state" | "s" => Ok(Outcome::Print(format!(
            "{:?}, next txn {}",
            client.state(),
            client.next_txn()
        ))),

        "offer" => match client.server_offer() {
            Some(offer) => Ok(Outcome::Print(offer.to_string())),
            None => Ok(Outcome::Print("No offer".yellow().to_string())),
        },

        "reconnect" | "r" => {
            client.recreate().await?;
            Ok(Outcome::Print(format!(
                "{} to {}",
                "Reconnected".green(),
                client.config().addr()
            )))
        }

        other => Ok(Outcome::Print(format!(
            "Unknown command: :{}. Type ':help' for help.",
            other
        ))),
    }
}
