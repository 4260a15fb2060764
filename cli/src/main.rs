use std::future::pending;

use clap::{Args, Parser, Subcommand};
use client::{AutoWs, ClientError, ClientEvent, Subsocket};
use frames::Frame;
use server::{Accepted, AutoWsServer, ConnectionEvent};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid websocket URL: {0}")]
    InvalidUrl(String),
    #[error("io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("health check failed: HTTP {0}")]
    Unhealthy(u16),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "autows", about = "Multiplexed websocket server and client")]
struct Cli {
    #[arg(long, env = "AUTOWS_URL", default_value = "ws://127.0.0.1:3000/ws")]
    url: String,

    #[arg(long, env = "AUTOWS_BIND", default_value = "127.0.0.1:3000")]
    bind: String,

    #[arg(long, env = "AUTOWS_PATH", default_value = "/ws")]
    path: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an echo server on `--bind`.
    Serve(ServeArgs),
    /// Connect to `--url`, send stdin lines, print inbound frames as JSON.
    Connect(ConnectArgs),
    /// Probe the server's `/healthz` endpoint.
    Ping,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Channels clients may bind, besides the root connection.
    #[arg(long = "channel")]
    channels: Vec<String>,
}

#[derive(Args, Debug)]
struct ConnectArgs {
    /// Channel to send on; the root connection when omitted.
    #[arg(long)]
    channel: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => run_serve(&cli.bind, &cli.path, args).await,
        Command::Connect(args) => run_connect(&cli.url, args).await,
        Command::Ping => run_ping(&cli.url).await,
    }
}

// =============================================================================
// SERVE
// =============================================================================

async fn run_serve(bind: &str, path: &str, args: ServeArgs) -> Result<(), CliError> {
    let server = AutoWsServer::new();
    tokio::spawn(echo_all(server.connections()));
    for name in &args.channels {
        tokio::spawn(echo_all(server.channel(name).connections()));
    }

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, %path, channels = ?args.channels, "autows listening");
    axum::serve(listener, server.router(path)).await?;
    Ok(())
}

async fn echo_all(mut accepted: mpsc::UnboundedReceiver<Accepted>) {
    while let Some(accepted) = accepted.recv().await {
        tokio::spawn(echo(accepted));
    }
}

async fn echo(mut accepted: Accepted) {
    let conn = accepted.connection;
    info!(conn_id = %conn.id(), channel = %conn.name(), "echo: connection bound");
    while let Some(event) = accepted.events.recv().await {
        match event {
            ConnectionEvent::Message(frame) => {
                if conn.send(frame).is_err() {
                    break;
                }
            }
            ConnectionEvent::Error(error) => warn!(conn_id = %conn.id(), %error, "echo: socket error"),
            ConnectionEvent::Close => break,
        }
    }
}

// =============================================================================
// CONNECT
// =============================================================================

async fn run_connect(url: &str, args: ConnectArgs) -> Result<(), CliError> {
    let ws = AutoWs::connect(url);
    let mut events = ws.events()?;
    let channel = args.channel.as_deref().map(|name| ws.channel(name)).transpose()?;
    let mut messages = channel.as_ref().map(Subsocket::messages).transpose()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match &channel {
                    Some(channel) => channel.send(line)?,
                    None => ws.send(line)?,
                }
            }
            Some(event) = events.recv() => match event {
                ClientEvent::Message(frame) => print_frame(&frame)?,
                ClientEvent::Error(error) => warn!(%error, "connect: transport error"),
                other => info!(event = ?other, "connect: connection event"),
            },
            Some(frame) = next_message(messages.as_mut()) => print_frame(&frame)?,
        }
    }

    ws.destroy();
    Ok(())
}

async fn next_message(messages: Option<&mut mpsc::UnboundedReceiver<Frame>>) -> Option<Frame> {
    match messages {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

fn print_frame(frame: &Frame) -> Result<(), CliError> {
    let rendered = serde_json::to_string(frame)?;
    println!("{rendered}");
    Ok(())
}

// =============================================================================
// PING
// =============================================================================

async fn run_ping(url: &str) -> Result<(), CliError> {
    let response = reqwest::get(health_url(url)?).await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::Unhealthy(status.as_u16()));
    }
    println!("ok");
    Ok(())
}

/// Map a websocket URL onto the same host's health endpoint.
fn health_url(url: &str) -> Result<String, CliError> {
    let (scheme, rest) = if let Some(rest) = url.strip_prefix("ws://") {
        ("http", rest)
    } else if let Some(rest) = url.strip_prefix("wss://") {
        ("https", rest)
    } else {
        return Err(CliError::InvalidUrl(url.to_owned()));
    };

    let authority = rest.split(['/', '?']).next().unwrap_or_default();
    if authority.is_empty() {
        return Err(CliError::InvalidUrl(url.to_owned()));
    }
    Ok(format!("{scheme}://{authority}/healthz"))
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
