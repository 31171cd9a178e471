//! Property-based tests for the Ferry wire format.
//!
//! Roundtrip correctness for segments and ACKs across the full value range,
//! bitmap ↔ sequence-set equivalence, and the no-crash guarantee for
//! arbitrary network input.

use bytes::Bytes;
use proptest::prelude::*;

use ferry_transport::wire::{Ack, Segment, ACK_LEN, HEADER_LEN, MAX_DATAGRAM, SACK_BITS};

// ─── Strategies ─────────────────────────────────────────────────────────────

fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..=1180)
}

fn seq_strategy() -> impl Strategy<Value = u32> {
    prop_oneof![
        Just(0u32),
        Just(1u32),
        Just(u32::MAX),
        any::<u32>(),
    ]
}

// ─── Segment Roundtrip ──────────────────────────────────────────────────────

proptest! {
    #[test]
    fn segment_roundtrip(seq in seq_strategy(), payload in payload_strategy()) {
        let seg = Segment::data(seq, Bytes::from(payload.clone()));
        let wire = seg.encode();
        prop_assert_eq!(wire.len(), HEADER_LEN + payload.len());
        prop_assert!(wire.len() <= MAX_DATAGRAM);

        let decoded = Segment::decode(&wire).unwrap();
        prop_assert_eq!(decoded.seq, seq);
        prop_assert_eq!(decoded.payload.as_ref(), payload.as_slice());
    }

    #[test]
    fn eof_roundtrip(seq in seq_strategy()) {
        let wire = Segment::eof(seq).encode();
        let decoded = Segment::decode(&wire).unwrap();
        prop_assert!(decoded.is_eof());
        prop_assert_eq!(decoded.seq, seq);
    }

    #[test]
    fn segment_reserved_bytes_are_zero(seq in seq_strategy(), payload in payload_strategy()) {
        let wire = Segment::data(seq, Bytes::from(payload)).encode();
        prop_assert!(wire[4..HEADER_LEN].iter().all(|&b| b == 0));
    }
}

// ─── ACK Roundtrip ──────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn ack_roundtrip(cum_ack in seq_strategy(), bitmap in any::<u128>()) {
        let ack = Ack { cum_ack, sack_bitmap: bitmap };
        let wire = ack.encode();
        prop_assert_eq!(wire.len(), ACK_LEN);

        let decoded = Ack::decode(&wire).unwrap();
        prop_assert_eq!(decoded.cum_ack, cum_ack);
        prop_assert_eq!(decoded.sack_bitmap, bitmap);
    }

    #[test]
    fn bitmap_and_sequence_set_are_equivalent(
        cum_ack in 0u32..=1_000_000,
        offsets in prop::collection::btree_set(0u32..SACK_BITS, 0..32),
    ) {
        // Building from sequences and reading sequences back is lossless.
        let mut ack = Ack::cumulative(cum_ack);
        for &off in &offsets {
            ack.set_sacked(cum_ack + off);
        }
        let roundtrip: Vec<u32> = ack.sacked_sequences().collect();
        let expected: Vec<u32> = offsets.iter().map(|&off| cum_ack + off).collect();
        prop_assert_eq!(roundtrip, expected);
    }

    #[test]
    fn sacked_sequences_always_at_or_above_cum_ack(
        cum_ack in seq_strategy(),
        bitmap in any::<u128>(),
    ) {
        let ack = Ack { cum_ack, sack_bitmap: bitmap };
        for seq in ack.sacked_sequences() {
            prop_assert!(seq >= cum_ack);
        }
    }
}

// ─── Arbitrary Network Input ────────────────────────────────────────────────

proptest! {
    #[test]
    fn segment_decode_never_panics(datagram in prop::collection::vec(any::<u8>(), 0..=1400)) {
        let _ = Segment::decode(&datagram);
    }

    #[test]
    fn ack_decode_never_panics(datagram in prop::collection::vec(any::<u8>(), 0..=64)) {
        let _ = Ack::decode(&datagram);
    }

    #[test]
    fn segment_decode_accepts_iff_well_sized(datagram in prop::collection::vec(any::<u8>(), 0..=1400)) {
        let decoded = Segment::decode(&datagram);
        let well_sized = datagram.len() > HEADER_LEN && datagram.len() <= MAX_DATAGRAM;
        prop_assert_eq!(decoded.is_some(), well_sized);
    }

    #[test]
    fn ack_decode_accepts_iff_exactly_header_sized(datagram in prop::collection::vec(any::<u8>(), 0..=64)) {
        prop_assert_eq!(Ack::decode(&datagram).is_some(), datagram.len() == ACK_LEN);
    }
}
