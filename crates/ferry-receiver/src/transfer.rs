//! Receiver event loop.
//!
//! Solicit the transfer, then react to one socket: every received segment
//! updates the reassembly state, appends any newly contiguous payloads to
//! the sink, and is answered with an ACK. Read timeouts re-emit the current
//! ACK so the sender keeps making progress even when ACKs are being lost.
//! Termination is completeness (EOF seen and every prior segment
//! delivered), post-EOF idleness, or a hard silence cap.

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};

use ferry_transport::receiver::{Receiver, SegmentDisposition};
use ferry_transport::stats::ReceiverStats;
use ferry_transport::wire::{Segment, MAX_DATAGRAM, REQUEST_BYTE};

// ─── Configuration ──────────────────────────────────────────────────────────

/// Event-loop timing. Defaults are the protocol constants; tests shrink
/// them.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Solicitation attempts before declaring the sender unresponsive.
    pub request_retries: u32,
    /// Wait per solicitation attempt.
    pub request_timeout: Duration,
    /// Socket read timeout during the transfer.
    pub read_timeout: Duration,
    /// Minimum spacing between timeout-driven ACK re-emissions.
    pub ack_interval: Duration,
    /// Give up this long after EOF if no new segment fills the gaps.
    pub post_eof_idle: Duration,
    /// Hard cap on consecutive read timeouts.
    pub max_consecutive_timeouts: u32,
    /// Replicas of the final ACK.
    pub final_ack_count: u32,
    /// Spacing between final ACK replicas.
    pub final_ack_spacing: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            request_retries: 5,
            request_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_millis(300),
            ack_interval: Duration::from_millis(50),
            post_eof_idle: Duration::from_secs(3),
            max_consecutive_timeouts: 100,
            final_ack_count: 5,
            final_ack_spacing: Duration::from_millis(20),
        }
    }
}

// ─── Outcome ────────────────────────────────────────────────────────────────

/// How the transfer ended.
#[derive(Debug)]
pub enum ReceiverOutcome {
    /// Every data segment and the EOF terminator arrived; the sink holds the
    /// whole file.
    Complete(ReceiverStats),
    /// The sender never answered the solicitation.
    Unresponsive,
    /// EOF was seen but some segments never arrived; the sink holds the
    /// contiguous prefix.
    Incomplete { missing: Vec<(u32, u32)> },
}

// ─── Event Loop ─────────────────────────────────────────────────────────────

/// Fetch the file from the connected peer, writing in-order payloads to
/// `sink` as they become contiguous.
pub async fn run<W: Write>(
    socket: &UdpSocket,
    sink: &mut W,
    config: &TransferConfig,
) -> Result<ReceiverOutcome> {
    let mut buf = [0u8; MAX_DATAGRAM];

    let Some(first_len) = solicit(socket, config, &mut buf).await? else {
        return Ok(ReceiverOutcome::Unresponsive);
    };

    let mut rx = Receiver::new();
    let mut consecutive_timeouts = 0u32;
    let mut last_ack_at: Option<Instant> = None;
    let mut last_progress = Instant::now();
    // The solicitation already consumed the first datagram.
    let mut pending = Some(first_len);

    loop {
        if let Some(len) = pending.take() {
            match Segment::decode(&buf[..len]) {
                Some(seg) => {
                    let disposition = rx.handle_segment(seg);
                    if !matches!(
                        disposition,
                        SegmentDisposition::Duplicate | SegmentDisposition::DuplicateEof
                    ) {
                        last_progress = Instant::now();
                    }

                    let mut wrote = false;
                    for payload in rx.drain_writes().collect::<Vec<_>>() {
                        sink.write_all(&payload).context("writing output")?;
                        wrote = true;
                    }
                    if wrote {
                        sink.flush().context("flushing output")?;
                    }

                    // Every valid segment is answered, duplicates included:
                    // a re-ACK is what unblocks a sender whose ACKs are
                    // being lost.
                    send_ack(socket, &mut rx).await;
                    last_ack_at = Some(Instant::now());
                    consecutive_timeouts = 0;

                    if rx.is_complete() {
                        return finish(socket, &mut rx, config).await;
                    }
                }
                None => tracing::trace!(len, "dropping malformed datagram"),
            }
        }

        match timeout(config.read_timeout, socket.recv(&mut buf)).await {
            Ok(Ok(len)) => pending = Some(len),
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "receive error");
                consecutive_timeouts += 1;
            }
            Err(_) => {
                consecutive_timeouts += 1;
                let due = last_ack_at.is_none_or(|at| at.elapsed() >= config.ack_interval);
                if due {
                    send_ack(socket, &mut rx).await;
                    last_ack_at = Some(Instant::now());
                }
            }
        }

        if consecutive_timeouts >= config.max_consecutive_timeouts {
            tracing::error!(
                timeouts = consecutive_timeouts,
                "sender went silent, giving up"
            );
            return Ok(ReceiverOutcome::Incomplete {
                missing: rx.missing_ranges(),
            });
        }

        if rx.eof_seen() && !rx.is_complete() && last_progress.elapsed() >= config.post_eof_idle {
            tracing::error!(
                expected = rx.expected(),
                "EOF observed but gaps never filled"
            );
            return Ok(ReceiverOutcome::Incomplete {
                missing: rx.missing_ranges(),
            });
        }
    }
}

/// Send the one-byte request until the first data datagram arrives. Returns
/// its length, or `None` when every attempt times out.
async fn solicit(
    socket: &UdpSocket,
    config: &TransferConfig,
    buf: &mut [u8],
) -> Result<Option<usize>> {
    for attempt in 1..=config.request_retries {
        tracing::info!(attempt, total = config.request_retries, "requesting transfer");
        socket
            .send(&[REQUEST_BYTE])
            .await
            .context("sending transfer request")?;
        match timeout(config.request_timeout, socket.recv(buf)).await {
            Ok(Ok(len)) => return Ok(Some(len)),
            Ok(Err(e)) => tracing::debug!(error = %e, "receive error while soliciting"),
            Err(_) => tracing::warn!(attempt, "request timed out"),
        }
    }
    Ok(None)
}

/// Replicate the final ACK so the sender's termination does not hinge on a
/// single datagram surviving the channel.
async fn finish(
    socket: &UdpSocket,
    rx: &mut Receiver,
    config: &TransferConfig,
) -> Result<ReceiverOutcome> {
    for _ in 1..config.final_ack_count {
        tokio::time::sleep(config.final_ack_spacing).await;
        send_ack(socket, rx).await;
    }
    Ok(ReceiverOutcome::Complete(rx.stats().clone()))
}

/// Emit the current cumulative + selective ACK. Send failures are logged
/// and swallowed; the periodic re-ACK covers them.
async fn send_ack(socket: &UdpSocket, rx: &mut Receiver) {
    let ack = rx.make_ack();
    if let Err(e) = socket.send(&ack.encode()).await {
        tracing::debug!(error = %e, cum_ack = ack.cum_ack, "ACK send failed");
    }
}
