//! # Receiver State Machine
//!
//! Pure logic — no I/O. Accepts decoded segments from the event loop,
//! maintains the reassembly buffer, hands in-order payloads to the caller
//! for the sink, and produces cumulative + selective ACKs.
//!
//! ## Responsibilities
//!
//! 1. **Reassembly**: buffer out-of-order segments, deliver contiguously
//! 2. **Duplicate handling**: drop already-delivered or already-buffered seqs
//! 3. **EOF tracking**: record the terminator without storing its payload
//! 4. **ACK generation**: `cum_ack = expected` + bitmap of buffered segments
//! 5. **Gap reporting**: coalesced missing ranges for the failure diagnostic
//!
//! The event loop owns the socket, the sink, and every timer; termination
//! policy (post-EOF idle, silence caps) lives there too.

use bytes::Bytes;
use std::collections::{BTreeMap, VecDeque};

use crate::stats::ReceiverStats;
use crate::wire::{Ack, Segment, SACK_BITS};

// ─── Disposition ────────────────────────────────────────────────────────────

/// What a received segment did to the receiver state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentDisposition {
    /// The segment was the next expected one; `drained` contiguous segments
    /// (itself included) moved to the delivery queue.
    Delivered { drained: usize },
    /// Ahead of the in-order point; held in the reassembly buffer.
    Buffered,
    /// Already delivered or already buffered; dropped.
    Duplicate,
    /// First sighting of the EOF terminator.
    Eof,
    /// EOF re-received; ignored.
    DuplicateEof,
}

// ─── Receiver ───────────────────────────────────────────────────────────────

/// Reassembly receiver state machine.
///
/// Invariants: every sequence below `expected` has been moved to the
/// delivery queue exactly once and in order; the buffer only holds
/// sequences `>= expected`; `expected` is monotone non-decreasing.
pub struct Receiver {
    /// Next sequence needed for in-order delivery.
    expected: u32,
    /// Out-of-order segments awaiting the gap fill.
    buffered: BTreeMap<u32, Bytes>,
    /// Sequence of the EOF terminator, once observed.
    eof_seq: Option<u32>,
    /// In-order payloads awaiting the sink.
    delivery: VecDeque<Bytes>,
    stats: ReceiverStats,
}

impl Receiver {
    pub fn new() -> Self {
        Receiver {
            expected: 0,
            buffered: BTreeMap::new(),
            eof_seq: None,
            delivery: VecDeque::new(),
            stats: ReceiverStats::new(),
        }
    }

    /// Process one decoded segment.
    pub fn handle_segment(&mut self, seg: Segment) -> SegmentDisposition {
        self.stats.segments_received += 1;
        self.stats.bytes_received += seg.payload.len() as u64;

        if seg.is_eof() {
            if self.eof_seq.is_some() || seg.seq < self.expected {
                return SegmentDisposition::DuplicateEof;
            }
            self.eof_seq = Some(seg.seq);
            tracing::debug!(eof_seq = seg.seq, "EOF observed");
            self.consume_eof_if_reached();
            return SegmentDisposition::Eof;
        }

        // A data sequence at or past the terminator cannot come from a
        // conforming sender; treat it like a duplicate so the buffer can
        // never deliver bytes for the EOF slot.
        let past_eof = self.eof_seq.is_some_and(|e| seg.seq >= e);
        if past_eof || seg.seq < self.expected || self.buffered.contains_key(&seg.seq) {
            self.stats.duplicates += 1;
            return SegmentDisposition::Duplicate;
        }

        self.buffered.insert(seg.seq, seg.payload);
        if seg.seq == self.expected {
            let drained = self.drain_contiguous();
            SegmentDisposition::Delivered { drained }
        } else {
            self.stats.out_of_order += 1;
            SegmentDisposition::Buffered
        }
    }

    /// In-order payloads for the sink, each yielded exactly once.
    pub fn drain_writes(&mut self) -> impl Iterator<Item = Bytes> + '_ {
        self.delivery.drain(..)
    }

    /// Build the current ACK: `cum_ack = expected` plus the bitmap of
    /// buffered sequences within the report window.
    pub fn make_ack(&mut self) -> Ack {
        let mut ack = Ack::cumulative(self.expected);
        for &seq in self.buffered.keys() {
            if seq - self.expected >= SACK_BITS {
                break;
            }
            ack.set_sacked(seq);
        }
        self.stats.acks_sent += 1;
        ack
    }

    /// Coalesced `(start, count)` gaps still missing below the terminator.
    pub fn missing_ranges(&self) -> Vec<(u32, u32)> {
        let Some(eof) = self.eof_seq else {
            return Vec::new();
        };
        let mut ranges = Vec::new();
        let mut seq = self.expected;
        while seq < eof {
            if self.buffered.contains_key(&seq) {
                seq += 1;
                continue;
            }
            let start = seq;
            while seq < eof && !self.buffered.contains_key(&seq) {
                seq += 1;
            }
            ranges.push((start, seq - start));
        }
        ranges
    }

    /// Next sequence needed for in-order delivery. After completion this is
    /// one past the EOF sequence.
    pub fn expected(&self) -> u32 {
        self.expected
    }

    /// Whether the EOF terminator has been observed.
    pub fn eof_seen(&self) -> bool {
        self.eof_seq.is_some()
    }

    /// Whether every data segment and the terminator have been accounted
    /// for.
    pub fn is_complete(&self) -> bool {
        self.eof_seq.is_some_and(|e| self.expected > e)
    }

    /// Segments currently held out of order.
    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    /// Current receiver statistics.
    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    /// Move every contiguous buffered payload to the delivery queue.
    fn drain_contiguous(&mut self) -> usize {
        let mut drained = 0;
        while let Some(payload) = self.buffered.remove(&self.expected) {
            self.stats.segments_delivered += 1;
            self.stats.bytes_delivered += payload.len() as u64;
            self.delivery.push_back(payload);
            self.expected += 1;
            drained += 1;
        }
        self.consume_eof_if_reached();
        drained
    }

    /// The EOF sentinel occupies a sequence slot but carries no file bytes;
    /// stepping over it is what marks the transfer complete.
    fn consume_eof_if_reached(&mut self) {
        if self.eof_seq == Some(self.expected) {
            self.expected += 1;
        }
    }
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new()
    }
}
