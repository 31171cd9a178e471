//! # Sender State Machine
//!
//! Pure logic — no I/O. Partitions the file into segments, drives the
//! byte-budget sliding window, processes cumulative + selective ACKs, and
//! queues (re)transmissions for the event loop to put on the wire.
//!
//! ## Responsibilities
//!
//! 1. **Segmentation**: fixed-size data segments plus the terminal EOF segment
//! 2. **Window admission**: first transmissions bounded by the byte budget
//! 3. **RTO retransmission**: per-segment timers, SACKed segments skipped
//! 4. **ACK processing**: cumulative advance, RTT sampling (Karn's rule),
//!    SACK marking, fast retransmit on triple duplicate, SACK hole filling
//!
//! The sender does NOT manage sockets or sleep; the daemon loop owns those
//! and passes `now` into every time-dependent method, which also keeps the
//! retransmission policy testable on a virtual clock.

use bytes::Bytes;
use quanta::Instant;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use crate::rtt::RttEstimator;
use crate::stats::SenderStats;
use crate::wire::{Ack, Segment, HEADER_LEN, MAX_SEGMENT_PAYLOAD};

// ─── Configuration ──────────────────────────────────────────────────────────

/// Sender configuration parameters.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Byte budget of unacknowledged payload (the sliding window size).
    pub window_bytes: usize,
    /// Payload bytes per data segment.
    pub segment_payload: usize,
    /// Floor of the SACK hole-fill idle threshold.
    pub hole_fill_floor: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        SenderConfig {
            window_bytes: 64 * MAX_SEGMENT_PAYLOAD,
            segment_payload: MAX_SEGMENT_PAYLOAD,
            hole_fill_floor: Duration::from_millis(100),
        }
    }
}

// ─── Output Segment ─────────────────────────────────────────────────────────

/// A serialized datagram ready for the event loop to send.
#[derive(Debug, Clone)]
pub struct OutputSegment {
    /// Sequence number (for logging / correlation).
    pub seq: u32,
    /// Wire-format bytes (header + payload).
    pub data: Bytes,
    /// Whether this is a retransmission.
    pub is_retransmit: bool,
}

// ─── Window Entry ───────────────────────────────────────────────────────────

#[derive(Debug)]
struct WindowEntry {
    /// Encoded datagram, retained until cumulatively acknowledged.
    wire: Bytes,
    /// Last (re)transmission time.
    last_sent: Instant,
    /// Reported received by a selective ACK.
    sacked: bool,
    /// Ever retransmitted; excluded from RTT sampling.
    retransmitted: bool,
}

// ─── Sender ─────────────────────────────────────────────────────────────────

/// Sliding-window sender state machine.
///
/// Invariants, held after every method:
/// - `base <= next_seq <= total_segments`
/// - the window holds exactly the sequences in `[base, next_seq)`
/// - `(next_seq - base) * segment_payload` never exceeds the byte budget at
///   admission time
/// - `base` is monotone non-decreasing
pub struct Sender {
    config: SenderConfig,
    /// Encoded wire datagrams, index == sequence number. The last one is EOF.
    segments: Vec<Bytes>,
    /// Total segment count: data segments + 1.
    total: u32,
    base: u32,
    next_seq: u32,
    window: BTreeMap<u32, WindowEntry>,
    rtt: RttEstimator,
    last_cum_ack: Option<u32>,
    dup_acks: u32,
    output: VecDeque<OutputSegment>,
    stats: SenderStats,
}

impl Sender {
    /// Segment `file` and set up an empty window. An empty file produces a
    /// lone EOF segment at sequence 0.
    pub fn new(file: &[u8], config: SenderConfig) -> Self {
        let mut segments: Vec<Bytes> = file
            .chunks(config.segment_payload)
            .enumerate()
            .map(|(seq, chunk)| {
                Segment::data(seq as u32, Bytes::copy_from_slice(chunk))
                    .encode()
                    .freeze()
            })
            .collect();
        let eof_seq = segments.len() as u32;
        segments.push(Segment::eof(eof_seq).encode().freeze());

        Sender {
            config,
            total: segments.len() as u32,
            segments,
            base: 0,
            next_seq: 0,
            window: BTreeMap::new(),
            rtt: RttEstimator::new(),
            last_cum_ack: None,
            dup_acks: 0,
            output: VecDeque::new(),
            stats: SenderStats::new(),
        }
    }

    /// Admit new segments while the byte budget allows, queueing their first
    /// transmission. Returns the number admitted.
    pub fn fill_window(&mut self, now: Instant) -> usize {
        let mut admitted = 0;
        while self.next_seq < self.total
            && (self.next_seq - self.base) as u64 * (self.config.segment_payload as u64)
                < self.config.window_bytes as u64
        {
            let seq = self.next_seq;
            let wire = self.segments[seq as usize].clone();
            self.stats.segments_sent += 1;
            self.stats.bytes_sent += (wire.len() - HEADER_LEN) as u64;
            self.window.insert(
                seq,
                WindowEntry {
                    wire: wire.clone(),
                    last_sent: now,
                    sacked: false,
                    retransmitted: false,
                },
            );
            self.output.push_back(OutputSegment {
                seq,
                data: wire,
                is_retransmit: false,
            });
            self.next_seq += 1;
            admitted += 1;
        }
        admitted
    }

    /// Retransmit every unSACKed window entry whose timer has exceeded the
    /// RTO. Returns the number retransmitted.
    pub fn expire_timeouts(&mut self, now: Instant) -> usize {
        let rto = self.rtt.rto();
        let mut expired = 0;
        for (&seq, entry) in self.window.iter_mut() {
            if entry.sacked || now.duration_since(entry.last_sent) <= rto {
                continue;
            }
            entry.last_sent = now;
            entry.retransmitted = true;
            self.output.push_back(OutputSegment {
                seq,
                data: entry.wire.clone(),
                is_retransmit: true,
            });
            self.stats.retransmissions += 1;
            self.stats.timeout_retransmissions += 1;
            expired += 1;
        }
        if expired > 0 {
            tracing::debug!(expired, rto_ms = rto.as_millis() as u64, "RTO retransmission");
        }
        expired
    }

    /// Process one ACK: cumulative advance with RTT sampling, SACK marking,
    /// duplicate-ACK fast retransmit, and SACK hole filling. Returns the
    /// number of segments newly acknowledged.
    pub fn process_ack(&mut self, ack: &Ack, now: Instant) -> usize {
        self.stats.acks_received += 1;

        // A conforming receiver never acks beyond next_seq; clamp so hostile
        // input cannot break the window invariant.
        let cum = ack.cum_ack.min(self.next_seq);

        // Cumulative advance. Entries that were never retransmitted yield an
        // unambiguous RTT sample (Karn's rule).
        let mut newly_acked = 0;
        while self.base < cum {
            if let Some(entry) = self.window.remove(&self.base) {
                if !entry.retransmitted {
                    self.rtt.sample(now.duration_since(entry.last_sent));
                    self.stats.rtt_samples += 1;
                }
                self.stats.segments_acked += 1;
                newly_acked += 1;
            }
            self.base += 1;
        }

        // Selective report: mark referenced entries so the timers skip them.
        for seq in ack.sacked_sequences() {
            if let Some(entry) = self.window.get_mut(&seq) {
                entry.sacked = true;
            }
        }

        // Duplicate-ACK tracking and fast retransmit of the window base.
        match self.last_cum_ack {
            Some(last) if last == cum => {
                self.dup_acks += 1;
                self.stats.duplicate_acks += 1;
                if self.dup_acks == 3 {
                    self.dup_acks = 0;
                    if self.retransmit(self.base, now) {
                        tracing::debug!(seq = self.base, "fast retransmit");
                        self.stats.fast_retransmissions += 1;
                    }
                }
            }
            _ => {
                self.last_cum_ack = Some(cum);
                self.dup_acks = 0;
            }
        }

        // Hole fill: a non-empty selective report means segments beyond the
        // cumulative point are landing while earlier ones are not. Repair the
        // holes without waiting out the full RTO.
        if ack.sack_bitmap != 0 {
            let threshold = self.config.hole_fill_floor.max(self.rtt.rto() / 4);
            let stale: Vec<u32> = self
                .window
                .iter()
                .filter(|(_, e)| !e.sacked && now.duration_since(e.last_sent) > threshold)
                .map(|(&seq, _)| seq)
                .collect();
            for seq in stale {
                if self.retransmit(seq, now) {
                    self.stats.hole_fill_retransmissions += 1;
                }
            }
        }

        newly_acked
    }

    /// Drain datagrams queued for transmission, in FIFO order.
    pub fn drain_output(&mut self) -> impl Iterator<Item = OutputSegment> + '_ {
        self.output.drain(..)
    }

    /// Number of datagrams waiting in the output queue.
    pub fn output_len(&self) -> usize {
        self.output.len()
    }

    /// Lowest unacknowledged sequence number.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Next sequence number to admit.
    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    /// Total segment count including the EOF terminator.
    pub fn total_segments(&self) -> u32 {
        self.total
    }

    /// Segments in flight (admitted, not cumulatively acknowledged).
    pub fn in_flight(&self) -> usize {
        self.window.len()
    }

    /// Whether every segment, EOF included, has been cumulatively
    /// acknowledged.
    pub fn is_complete(&self) -> bool {
        self.base == self.total
    }

    /// Current retransmission timeout.
    pub fn rto(&self) -> Duration {
        self.rtt.rto()
    }

    /// Current sender statistics.
    pub fn stats(&self) -> &SenderStats {
        &self.stats
    }

    /// Queue a retransmission of `seq` if it is still in the window.
    fn retransmit(&mut self, seq: u32, now: Instant) -> bool {
        match self.window.get_mut(&seq) {
            Some(entry) => {
                entry.last_sent = now;
                entry.retransmitted = true;
                self.output.push_back(OutputSegment {
                    seq,
                    data: entry.wire.clone(),
                    is_retransmit: true,
                });
                self.stats.retransmissions += 1;
                true
            }
            None => false,
        }
    }
}
