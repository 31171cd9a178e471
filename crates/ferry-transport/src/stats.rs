//! # Transfer Statistics
//!
//! Per-endpoint counters, designed for a JSON summary line at the end of a
//! transfer.

use serde::Serialize;

// ─── Sender Stats ───────────────────────────────────────────────────────────

/// Aggregate sender-side statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SenderStats {
    /// First transmissions of segments (excludes retransmissions).
    pub segments_sent: u64,
    /// Payload bytes in first transmissions.
    pub bytes_sent: u64,
    /// Segments cumulatively acknowledged.
    pub segments_acked: u64,
    /// Total retransmissions, all causes.
    pub retransmissions: u64,
    /// Retransmissions triggered by RTO expiry.
    pub timeout_retransmissions: u64,
    /// Retransmissions triggered by the triple-duplicate-ACK rule.
    pub fast_retransmissions: u64,
    /// Retransmissions triggered by SACK hole filling.
    pub hole_fill_retransmissions: u64,
    /// ACK datagrams processed.
    pub acks_received: u64,
    /// Duplicate cumulative ACKs observed.
    pub duplicate_acks: u64,
    /// RTT samples fed to the estimator.
    pub rtt_samples: u64,
}

impl SenderStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retransmission overhead relative to unique segments.
    pub fn retransmit_ratio(&self) -> f64 {
        if self.segments_sent == 0 {
            0.0
        } else {
            self.retransmissions as f64 / self.segments_sent as f64
        }
    }
}

// ─── Receiver Stats ─────────────────────────────────────────────────────────

/// Aggregate receiver-side statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReceiverStats {
    /// Valid segments received, including duplicates.
    pub segments_received: u64,
    /// Payload bytes across all received segments.
    pub bytes_received: u64,
    /// Segments delivered in order to the sink.
    pub segments_delivered: u64,
    /// Payload bytes delivered to the sink.
    pub bytes_delivered: u64,
    /// Duplicate segments dropped (already delivered or already buffered).
    pub duplicates: u64,
    /// Segments that arrived ahead of the in-order point and were buffered.
    pub out_of_order: u64,
    /// ACK datagrams emitted.
    pub acks_sent: u64,
}

impl ReceiverStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unique delivered segments vs everything that arrived.
    pub fn goodput_ratio(&self) -> f64 {
        if self.segments_received == 0 {
            0.0
        } else {
            self.segments_delivered as f64 / self.segments_received as f64
        }
    }
}
