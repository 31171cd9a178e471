//! # Ferry Wire Format
//!
//! Fixed 20-byte header on every datagram, network byte order.
//!
//! ## Data / EOF segment (server → client)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Sequence Number (32)                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                      Reserved (128, zero)                     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Payload (1..=1180 bytes)                  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The terminal segment carries the literal payload `EOF` and the sequence
//! number one past the last data segment.
//!
//! ## ACK (client → server, exactly 20 bytes)
//!
//! First 4 bytes: cumulative ack (next expected sequence), big endian.
//! Remaining 16 bytes: selective-ack bitmap, 128 bits in little-endian byte
//! order. Bit `i` set iff segment `cum_ack + i` is buffered out of order.

use bytes::{Buf, BufMut, Bytes, BytesMut};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Header size for both data segments and ACKs.
pub const HEADER_LEN: usize = 20;

/// Maximum payload bytes per data segment (MSS).
pub const MAX_SEGMENT_PAYLOAD: usize = 1180;

/// Maximum datagram size on the wire: header + MSS.
pub const MAX_DATAGRAM: usize = HEADER_LEN + MAX_SEGMENT_PAYLOAD;

/// An ACK is a bare header.
pub const ACK_LEN: usize = HEADER_LEN;

/// Width of the selective-ack bitmap in bits.
pub const SACK_BITS: u32 = 128;

/// The one-byte transfer request sent by the receiver.
pub const REQUEST_BYTE: u8 = 0x01;

/// Distinguished payload of the terminal segment.
pub const EOF_MARKER: &[u8] = b"EOF";

// ─── Data Segment ───────────────────────────────────────────────────────────

/// A data or EOF segment as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Segment index, starting at zero. Identifies a segment, not a byte
    /// offset.
    pub seq: u32,
    /// 1..=1180 payload bytes; the literal `EOF` for the terminator.
    pub payload: Bytes,
}

impl Segment {
    /// Build a data segment. Payload must be 1..=1180 bytes.
    pub fn data(seq: u32, payload: Bytes) -> Self {
        debug_assert!(!payload.is_empty() && payload.len() <= MAX_SEGMENT_PAYLOAD);
        Segment { seq, payload }
    }

    /// Build the terminal segment for sequence `seq`.
    pub fn eof(seq: u32) -> Self {
        Segment {
            seq,
            payload: Bytes::from_static(EOF_MARKER),
        }
    }

    /// Whether this is the EOF terminator. The payload comparison is a wire
    /// format convention only; delivered file bytes are never inspected.
    pub fn is_eof(&self) -> bool {
        self.payload.as_ref() == EOF_MARKER
    }

    /// Serialize into a fresh buffer: 20-byte header + payload.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u32(self.seq);
        buf.put_bytes(0, HEADER_LEN - 4);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode a datagram. Returns `None` for anything malformed: shorter
    /// than header + 1 payload byte, or longer than the maximum datagram.
    pub fn decode(datagram: &[u8]) -> Option<Self> {
        if datagram.len() <= HEADER_LEN || datagram.len() > MAX_DATAGRAM {
            return None;
        }
        let mut buf = datagram;
        let seq = buf.get_u32();
        buf.advance(HEADER_LEN - 4);
        Some(Segment {
            seq,
            payload: Bytes::copy_from_slice(buf),
        })
    }
}

// ─── ACK ────────────────────────────────────────────────────────────────────

/// Cumulative acknowledgment + selective-ack bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Next sequence number the receiver expects; everything below has been
    /// delivered in order.
    pub cum_ack: u32,
    /// Bit `i` set iff segment `cum_ack + i` is held out of order.
    pub sack_bitmap: u128,
}

impl Ack {
    /// A plain cumulative ACK with an empty selective report.
    pub fn cumulative(cum_ack: u32) -> Self {
        Ack {
            cum_ack,
            sack_bitmap: 0,
        }
    }

    /// Serialize into exactly [`ACK_LEN`] bytes.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(ACK_LEN);
        buf.put_u32(self.cum_ack);
        buf.put_slice(&self.sack_bitmap.to_le_bytes());
        buf
    }

    /// Decode an ACK datagram. ACKs are exactly 20 bytes; anything else is
    /// dropped.
    pub fn decode(datagram: &[u8]) -> Option<Self> {
        if datagram.len() != ACK_LEN {
            return None;
        }
        let mut buf = datagram;
        let cum_ack = buf.get_u32();
        let mut bitmap = [0u8; 16];
        bitmap.copy_from_slice(buf);
        Some(Ack {
            cum_ack,
            sack_bitmap: u128::from_le_bytes(bitmap),
        })
    }

    /// Mark `seq` in the selective report. Out-of-range sequences (below
    /// `cum_ack` or beyond the bitmap width) are ignored.
    pub fn set_sacked(&mut self, seq: u32) {
        if let Some(offset) = seq.checked_sub(self.cum_ack) {
            if offset < SACK_BITS {
                self.sack_bitmap |= 1u128 << offset;
            }
        }
    }

    /// Whether `seq` is marked in the selective report.
    pub fn is_sacked(&self, seq: u32) -> bool {
        match seq.checked_sub(self.cum_ack) {
            Some(offset) if offset < SACK_BITS => self.sack_bitmap & (1u128 << offset) != 0,
            _ => false,
        }
    }

    /// Iterate the sequence numbers the bitmap reports as received.
    pub fn sacked_sequences(&self) -> impl Iterator<Item = u32> + '_ {
        (0..SACK_BITS).filter_map(move |i| {
            if self.sack_bitmap & (1u128 << i) != 0 {
                self.cum_ack.checked_add(i)
            } else {
                None
            }
        })
    }
}
