//! Ferry Receiver
//!
//! Requests a file from a ferry sender and reconstructs it byte-for-byte.
//!
//! - Solicits the transfer with a one-byte request, retrying on timeout
//! - Reassembles segments in order, acknowledging as it goes
//! - Exits 0 only when every data segment and the EOF terminator arrived;
//!   on failure the contiguous prefix is kept and the missing ranges are
//!   reported

mod transfer;

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::net::UdpSocket;
use tracing_subscriber::EnvFilter;

/// Fetch a file over the ferry transport.
#[derive(Parser, Debug)]
#[command(name = "ferry-receiver", about = "Ferry file-transfer receiver")]
struct Cli {
    /// Sender address.
    server_ip: String,

    /// Sender UDP port.
    server_port: u16,

    /// Where to write the reconstructed file.
    #[arg(default_value = "received_data.txt")]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .context("binding local socket")?;
    socket
        .connect((cli.server_ip.as_str(), cli.server_port))
        .await
        .with_context(|| format!("connecting to {}:{}", cli.server_ip, cli.server_port))?;

    let file = File::create(&cli.output)
        .with_context(|| format!("creating {}", cli.output.display()))?;
    let mut sink = BufWriter::new(file);

    tracing::info!(
        server_ip = %cli.server_ip,
        server_port = cli.server_port,
        output = %cli.output.display(),
        "ferry-receiver starting"
    );

    let config = transfer::TransferConfig::default();
    let outcome = tokio::select! {
        outcome = transfer::run(&socket, &mut sink, &config) => outcome?,
        _ = tokio::signal::ctrl_c() => {
            // Writes are flushed per batch, so the contiguous prefix is
            // already on disk.
            tracing::info!(output = %cli.output.display(), "received SIGINT, keeping contiguous prefix");
            std::process::exit(1);
        }
    };

    match outcome {
        transfer::ReceiverOutcome::Complete(stats) => {
            tracing::info!(stats = %serde_json::to_string(&stats)?, "transfer complete");
            Ok(())
        }
        transfer::ReceiverOutcome::Unresponsive => {
            tracing::error!("sender unresponsive, giving up");
            std::process::exit(1);
        }
        transfer::ReceiverOutcome::Incomplete { missing } => {
            tracing::error!(?missing, "transfer incomplete, wrote contiguous prefix only");
            std::process::exit(1);
        }
    }
}
