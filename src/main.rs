use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use parley_client::{ChatConnection, ConnectionConfig};
use parley_core::message::ChatMessage;
use parley_core::state::ChatEvent;
use parley_server::{EchoProvider, ServerConfig};

#[derive(Parser)]
#[command(name = "parley", about = "Resilient dual-transport chat", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the chat server with the demo echo backend.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Interactive chat against a running server.
    Chat {
        /// HTTP base URL of the server.
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        server: String,
        /// Channel endpoint. Defaults to `<server>/ws`; pass `--no-channel`
        /// to pin every turn to the HTTP fallback.
        #[arg(long)]
        ws_url: Option<String>,
        #[arg(long, default_value_t = false)]
        no_channel: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Serve { port } => serve(port).await,
        Command::Chat { server, ws_url, no_channel } => chat(server, ws_url, no_channel).await,
    }
}

async fn serve(port: u16) -> anyhow::Result<()> {
    let provider = Arc::new(EchoProvider::new());
    let handle = parley_server::start(ServerConfig { port }, provider)
        .await
        .context("failed to start server")?;
    tracing::info!(port = handle.port, "serving, ctrl+c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;
    tracing::info!("shutting down");
    Ok(())
}

async fn chat(server: String, ws_url: Option<String>, no_channel: bool) -> anyhow::Result<()> {
    let base = server.trim_end_matches('/').to_string();
    let mut config = ConnectionConfig::new(base.clone());
    if !no_channel {
        let ws_url = ws_url.unwrap_or_else(|| {
            format!("{}/ws", base.replacen("http", "ws", 1))
        });
        config = config.with_channel(ws_url);
    }
    let (handle, mut events) = ChatConnection::spawn(config)?;

    // Give the channel a moment to open so the first turn takes it.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let transport = if handle.transport_connected() {
        "channel"
    } else if parley_client::SseClient::new(base.clone())?.supports_streaming().await {
        "http streaming"
    } else {
        "http"
    };
    println!("connected ({transport}), type a message, ctrl+d to quit");

    let stdin = std::io::stdin();
    let mut history: Vec<ChatMessage> = Vec::new();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        handle.send_message(line, history.clone());
        history.push(ChatMessage::user(line));

        // Print deltas as the buffer grows, then record the final message.
        let mut printed = 0usize;
        while let Some(event) = events.recv().await {
            match event {
                ChatEvent::StreamingUpdate { content, .. } => {
                    print!("{}", &content[printed..]);
                    std::io::stdout().flush()?;
                    printed = content.len();
                }
                ChatEvent::Message(msg) => {
                    if printed == 0 {
                        print!("{}", msg.content);
                    }
                    println!();
                    history.push(msg);
                    break;
                }
                ChatEvent::Error(text) => {
                    println!("error: {text}");
                    break;
                }
                ChatEvent::LoadingState(_) => {}
            }
        }
    }

    handle.shutdown();
    Ok(())
}
