//! Sender event loop.
//!
//! One task, one socket. Each iteration: admit new segments into the window,
//! expire retransmission timers, flush the output queue, then drain ACKs for
//! a bounded slice and flush whatever the ACK processing queued (fast
//! retransmits, hole fills). A short sleep paces iterations where nothing
//! moved.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use quanta::Instant;
use tokio::net::UdpSocket;

use ferry_transport::sender::{Sender, SenderConfig};
use ferry_transport::stats::SenderStats;
use ferry_transport::wire::{Ack, MAX_DATAGRAM, REQUEST_BYTE};

// ─── Configuration ──────────────────────────────────────────────────────────

/// Event-loop timing. Defaults are the protocol constants; tests shrink
/// them.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// How long to wait for the one-byte request before giving up.
    pub request_wait: Duration,
    /// Length of the bounded ACK-drain slice per iteration.
    pub ack_slice: Duration,
    /// Sleep when an iteration neither sent nor received.
    pub idle_sleep: Duration,
    /// Quiescence before exit, letting in-flight ACK exchange settle.
    pub drain_wait: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            request_wait: Duration::from_secs(60),
            ack_slice: Duration::from_millis(10),
            idle_sleep: Duration::from_millis(10),
            drain_wait: Duration::from_millis(500),
        }
    }
}

// ─── Outcome ────────────────────────────────────────────────────────────────

/// How the transfer ended.
#[derive(Debug)]
pub enum SenderOutcome {
    /// Every segment, EOF included, was acknowledged.
    Complete(SenderStats),
    /// Nobody asked for the file within the wait deadline.
    NoClient,
}

// ─── Event Loop ─────────────────────────────────────────────────────────────

/// Serve `file` to the first client that sends the transfer request.
pub async fn run(
    socket: &UdpSocket,
    file: &[u8],
    window_bytes: usize,
    config: &TransferConfig,
) -> Result<SenderOutcome> {
    let Some(peer) = wait_for_request(socket, config.request_wait).await? else {
        return Ok(SenderOutcome::NoClient);
    };
    socket.connect(peer).await.context("connecting to client")?;

    let mut sender = Sender::new(
        file,
        SenderConfig {
            window_bytes,
            ..Default::default()
        },
    );
    tracing::info!(
        %peer,
        total_segments = sender.total_segments(),
        "client request received, transfer running"
    );

    let mut buf = [0u8; MAX_DATAGRAM];
    while !sender.is_complete() {
        let now = Instant::now();
        sender.fill_window(now);
        sender.expire_timeouts(now);
        let mut sent = flush_output(socket, &mut sender).await;

        // Drain ACKs until the socket goes quiet for the rest of the slice.
        let mut received = 0usize;
        let deadline = tokio::time::Instant::now() + config.ack_slice;
        loop {
            match tokio::time::timeout_at(deadline, socket.recv(&mut buf)).await {
                Ok(Ok(len)) => {
                    let Some(ack) = Ack::decode(&buf[..len]) else {
                        tracing::trace!(len, "dropping malformed datagram");
                        continue;
                    };
                    sender.process_ack(&ack, Instant::now());
                    received += 1;
                    if sender.is_complete() {
                        break;
                    }
                }
                Ok(Err(e)) => {
                    // A closed peer surfaces as a receive error on a
                    // connected socket; the retransmission machinery covers
                    // anything that was actually lost.
                    tracing::debug!(error = %e, "receive error while draining ACKs");
                    break;
                }
                Err(_) => break, // slice elapsed
            }
        }
        sent += flush_output(socket, &mut sender).await;

        if sent == 0 && received == 0 {
            tokio::time::sleep(config.idle_sleep).await;
        }
    }

    tracing::info!(base = sender.base(), "all segments acknowledged, draining");
    tokio::time::sleep(config.drain_wait).await;
    Ok(SenderOutcome::Complete(sender.stats().clone()))
}

/// Wait for the one-byte `0x01` request, ignoring everything else. Returns
/// the client address, or `None` when the deadline passes.
async fn wait_for_request(socket: &UdpSocket, wait: Duration) -> Result<Option<SocketAddr>> {
    let mut buf = [0u8; MAX_DATAGRAM];
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, from))) => {
                if len == 1 && buf[0] == REQUEST_BYTE {
                    return Ok(Some(from));
                }
                tracing::debug!(%from, len, "ignoring non-request datagram while idle");
            }
            Ok(Err(e)) => return Err(e).context("waiting for client request"),
            Err(_) => return Ok(None),
        }
    }
}

/// Put every queued datagram on the wire. Send failures are logged and
/// swallowed: the peer may close right after its final ACK while a late
/// retransmission is still queued.
async fn flush_output(socket: &UdpSocket, sender: &mut Sender) -> usize {
    let mut sent = 0;
    for out in sender.drain_output().collect::<Vec<_>>() {
        match socket.send(&out.data).await {
            Ok(_) => {
                tracing::trace!(seq = out.seq, retransmit = out.is_retransmit, "sent");
                sent += 1;
            }
            Err(e) => tracing::debug!(seq = out.seq, error = %e, "send failed"),
        }
    }
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_transport::receiver::Receiver;
    use ferry_transport::wire::Segment;

    fn test_config() -> TransferConfig {
        TransferConfig {
            request_wait: Duration::from_millis(200),
            drain_wait: Duration::from_millis(20),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn no_request_yields_no_client() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = TransferConfig {
            request_wait: Duration::from_millis(50),
            ..test_config()
        };
        let outcome = run(&socket, b"payload", 4 * 1180, &config).await.unwrap();
        assert!(matches!(outcome, SenderOutcome::NoClient));
    }

    #[tokio::test]
    async fn garbage_while_idle_is_ignored() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();

        let noise = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        noise.send_to(b"zz", addr).await.unwrap(); // wrong length
        noise.send_to(&[0x02], addr).await.unwrap(); // wrong value

        let config = TransferConfig {
            request_wait: Duration::from_millis(100),
            ..test_config()
        };
        let outcome = run(&socket, b"x", 1180, &config).await.unwrap();
        assert!(matches!(outcome, SenderOutcome::NoClient));
    }

    #[tokio::test]
    async fn serves_file_to_a_scripted_receiver() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let file: Vec<u8> = (0..5000).map(|i| (i % 256) as u8).collect();

        let client = tokio::spawn(async move {
            let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            sock.connect(addr).await.unwrap();
            sock.send(&[REQUEST_BYTE]).await.unwrap();

            let mut rx = Receiver::new();
            let mut sink = Vec::new();
            let mut buf = [0u8; MAX_DATAGRAM];
            while !rx.is_complete() {
                let len = tokio::time::timeout(Duration::from_secs(2), sock.recv(&mut buf))
                    .await
                    .expect("segment wait")
                    .unwrap();
                let Some(seg) = Segment::decode(&buf[..len]) else {
                    continue;
                };
                rx.handle_segment(seg);
                for payload in rx.drain_writes().collect::<Vec<_>>() {
                    sink.extend_from_slice(&payload);
                }
                sock.send(&rx.make_ack().encode()).await.unwrap();
            }
            sink
        });

        let outcome = run(&socket, &file, 4 * 1180, &test_config()).await.unwrap();
        let sink = client.await.unwrap();
        assert_eq!(sink, file);
        match outcome {
            SenderOutcome::Complete(stats) => {
                assert_eq!(stats.segments_sent, 6); // 5 data + EOF
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_file_serves_a_lone_eof() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            sock.connect(addr).await.unwrap();
            sock.send(&[REQUEST_BYTE]).await.unwrap();

            let mut rx = Receiver::new();
            let mut buf = [0u8; MAX_DATAGRAM];
            while !rx.is_complete() {
                let len = tokio::time::timeout(Duration::from_secs(2), sock.recv(&mut buf))
                    .await
                    .expect("segment wait")
                    .unwrap();
                if let Some(seg) = Segment::decode(&buf[..len]) {
                    rx.handle_segment(seg);
                    sock.send(&rx.make_ack().encode()).await.unwrap();
                }
            }
            rx.stats().bytes_delivered
        });

        let outcome = run(&socket, &[], 1180, &test_config()).await.unwrap();
        assert_eq!(client.await.unwrap(), 0);
        assert!(matches!(outcome, SenderOutcome::Complete(_)));
    }
}
