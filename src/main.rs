mod ask;
mod client;
mod conversation;
mod decoder;
mod protocol;
mod ui;

use clap::{Parser, Subcommand};
use client::HttpTransport;
use conversation::Reconciler;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:5000/api/chat";

#[derive(Parser)]
#[command(name = "chatstream", version, about = "Chat with a streaming NDJSON endpoint")]
struct Cli {
    /// Chat endpoint that accepts `{messages}` and streams NDJSON back.
    #[arg(long, env = "CHATSTREAM_ENDPOINT", default_value = DEFAULT_ENDPOINT, global = true)]
    endpoint: String,

    /// Append logs to this file instead of stderr.
    #[arg(long, env = "CHATSTREAM_LOG_FILE", global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat in the terminal (default).
    Chat,
    /// Send one message and print the streamed reply.
    Ask {
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Chat);
    let interactive = matches!(command, Command::Chat);
    init_logging(cli.log_file.as_deref(), interactive)?;

    let reconciler = Reconciler::new(HttpTransport::new(cli.endpoint));

    match command {
        Command::Chat => ui::run_tui(reconciler),
        Command::Ask { message } => match ask::run(&reconciler, &message.join(" ")).await {
            Ok(_) => Ok(()),
            Err(_) => std::process::exit(1),
        },
    }
}

// Stderr logging would draw over the inline viewport, so the interactive UI
// stays quiet unless RUST_LOG or a log file asks otherwise.
fn init_logging(
    log_file: Option<&Path>,
    interactive: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let default_filter = if interactive && log_file.is_none() {
        "off"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command, DEFAULT_ENDPOINT};
    use clap::Parser;

    #[test]
    fn defaults_to_interactive_chat() {
        let cli = Cli::try_parse_from(["chatstream"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.log_file.is_none());
        if std::env::var_os("CHATSTREAM_ENDPOINT").is_none() {
            assert_eq!(cli.endpoint, DEFAULT_ENDPOINT);
        }
    }

    #[test]
    fn ask_joins_words_after_global_flag() {
        let cli = Cli::try_parse_from([
            "chatstream",
            "ask",
            "--endpoint",
            "http://localhost:9000/api/chat",
            "hello",
            "there",
        ])
        .unwrap();

        assert_eq!(cli.endpoint, "http://localhost:9000/api/chat");
        match cli.command {
            Some(Command::Ask { message }) => assert_eq!(message.join(" "), "hello there"),
            _ => panic!("expected ask command"),
        }
    }
}
