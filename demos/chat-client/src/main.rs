//! Line-based terminal chat client.
//!
//! Run with: `cargo run -p chat-client-demo -- --url ws://127.0.0.1:8080/ws`
//!
//! Type `help` for commands. Plain lines are sent as chat messages while
//! autosay is on.

use std::{sync::Arc, time::Duration};

use clap::Parser;
use relay_client::{
    ClientConfig, ClientSession, HttpPullApi, Output, WsConnector,
};
use relay_core::{PlainRenderer, Renderer};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "chat-client", about = "Chat over a group relay")]
struct Cli {
    /// Relay to connect to on start (ws://, wss://, http:// or https://)
    #[arg(long)]
    url: Option<String>,
    /// Nickname
    #[arg(long, default_value = "anon")]
    nick: String,
    /// Poll interval when on the pull transport, in milliseconds
    #[arg(long, default_value_t = 2000)]
    poll_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    // One crypto provider shared by the WebSocket and HTTP clients
    let _ = rustls::crypto::ring::default_provider().install_default();

    let (output_tx, mut output_rx) = mpsc::unbounded_channel();
    let session = ClientSession::new(
        ClientConfig {
            nick: cli.nick,
            poll_interval: Duration::from_millis(cli.poll_ms),
            autosay: true,
        },
        Arc::new(WsConnector::default()),
        Arc::new(HttpPullApi::new(Duration::from_secs(10))?),
        output_tx,
    );

    let printer = tokio::spawn(async move {
        let renderer = PlainRenderer;
        while let Some(output) = output_rx.recv().await {
            println!("{}", render(&renderer, &output));
        }
    });

    let (line_tx, line_rx) = mpsc::channel(32);
    if let Some(url) = cli.url {
        line_tx.send(format!("connect {url}")).await?;
    }
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line_tx.send(line).await.is_err() {
                break;
            }
        }
    });

    session.run(line_rx).await;
    printer.await?;
    Ok(())
}

fn render(renderer: &impl Renderer, output: &Output) -> String {
    match output {
        Output::Chat { message, own: true } => format!("> [me] {}", renderer.render(message)),
        Output::Chat { message, own: false } => format!("> {}", renderer.render(message)),
        Output::Notice(notice) => renderer.render_notice(notice),
        Output::Presence(count) => format!("> {count} online"),
        Output::Info(text) => format!("> {text}"),
        Output::Error(text) => format!("> error: {text}"),
    }
}
