//! Ferry Sender Daemon
//!
//! Serves `data.txt` from the working directory to a single client over the
//! ferry reliable datagram transport.
//!
//! - Binds `0.0.0.0:<port>` and waits for the one-byte transfer request
//! - Pumps the byte-budget sliding window until every segment (EOF
//!   included) is cumulatively acknowledged
//! - Exits 0 on clean termination, 1 on a terminal error

mod transfer;

use anyhow::Context;
use clap::Parser;
use tokio::net::UdpSocket;
use tracing_subscriber::EnvFilter;

/// Input file served from the working directory.
const INPUT_PATH: &str = "data.txt";

/// Serve `data.txt` over the ferry transport.
#[derive(Parser, Debug)]
#[command(name = "ferry-sender", about = "Ferry file-transfer sender")]
struct Cli {
    /// Advertised server address (informational; the socket binds 0.0.0.0).
    server_ip: String,

    /// UDP port to bind.
    server_port: u16,

    /// Sliding window budget in bytes of unacknowledged payload.
    window_bytes: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let file = std::fs::read(INPUT_PATH).with_context(|| format!("reading {INPUT_PATH}"))?;

    let socket = UdpSocket::bind(("0.0.0.0", cli.server_port))
        .await
        .with_context(|| format!("binding 0.0.0.0:{}", cli.server_port))?;

    tracing::info!(
        server_ip = %cli.server_ip,
        port = cli.server_port,
        window_bytes = cli.window_bytes,
        file_len = file.len(),
        "ferry-sender listening"
    );

    let config = transfer::TransferConfig::default();
    let outcome = tokio::select! {
        outcome = transfer::run(&socket, &file, cli.window_bytes, &config) => outcome?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
            std::process::exit(1);
        }
    };

    match outcome {
        transfer::SenderOutcome::Complete(stats) => {
            tracing::info!(stats = %serde_json::to_string(&stats)?, "transfer complete");
            Ok(())
        }
        transfer::SenderOutcome::NoClient => {
            tracing::error!("no client request arrived within the wait deadline");
            std::process::exit(1);
        }
    }
}
