//! Bounded newest-first capture history

mod common;

use common::*;
use fdscope_lib::CaptureBuffer;

fn frame(identifier: u32) -> FrameHeader {
    FrameHeader::decode(&frame_bytes(identifier, IdType::Standard, &[])).unwrap()
}

#[test]
fn test_empty_buffer_starts_at_zero() {
    let buffer = CaptureBuffer::default();
    assert!(buffer.is_empty());
    assert_eq!(buffer.limit(), 100);
    assert_eq!(buffer.next_sequence(), 0);
}

#[test]
fn test_overflow_keeps_newest_hundred() {
    let mut buffer = CaptureBuffer::default();
    for i in 0..105 {
        let message = buffer.push(frame(i), Bytes::new());
        assert_eq!(message.sequence, i as u64);
    }

    assert_eq!(buffer.len(), 100);
    assert_eq!(buffer.latest().unwrap().sequence, 104);
    assert_eq!(buffer.latest().unwrap().header.identifier, 104);
    assert_eq!(buffer.get(99).unwrap().sequence, 5);
    assert!(buffer.get(100).is_none());
}

#[test]
fn test_sequences_strictly_decrease() {
    let mut buffer = CaptureBuffer::new(10);
    for i in 0..25 {
        buffer.push(frame(i), Bytes::new());
    }

    let sequences: Vec<u64> = buffer.iter().map(|m| m.sequence).collect();
    assert_eq!(sequences.len(), 10);
    assert!(sequences.windows(2).all(|w| w[0] == w[1] + 1));
    assert_eq!(buffer.next_sequence(), 25);
}

#[test]
fn test_clear_restarts_sequence() {
    let mut buffer = CaptureBuffer::default();
    buffer.push(frame(1), Bytes::new());
    buffer.push(frame(2), Bytes::new());
    buffer.clear();

    assert!(buffer.is_empty());
    assert_eq!(buffer.push(frame(3), Bytes::new()).sequence, 0);
}

#[test]
fn test_snapshot_is_newest_first() {
    let mut buffer = CaptureBuffer::new(3);
    for i in 0..3 {
        buffer.push(frame(i), Bytes::new());
    }

    let ids: Vec<u32> = buffer.snapshot().iter().map(|m| m.header.identifier).collect();
    assert_eq!(ids, vec![2, 1, 0]);
}

#[test]
fn test_message_display() {
    let mut buffer = CaptureBuffer::default();
    let header = FrameHeader::decode(&frame_bytes(0x123, IdType::Standard, &[0; 2])).unwrap();
    let message = buffer.push(header, Bytes::from_static(&[0xDE, 0xAD]));

    assert_eq!(message.payload_hex(), "de ad");
    let row = message.to_string();
    assert!(row.contains("123 11b D"));
    assert!(row.ends_with("de ad"));
}
