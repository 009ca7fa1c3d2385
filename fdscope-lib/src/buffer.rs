use bytes::Bytes;
use std::collections::VecDeque;
use std::fmt;

use crate::constants::HISTORY_LIMIT;
use crate::fdcan::FrameHeader;

/// A frame delivered by the capture pump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedMessage {
    /// Arrival order at the pump, starting at 0 for an empty buffer
    pub sequence: u64,
    pub header: FrameHeader,
    /// Frame data, at most 64 bytes
    pub payload: Bytes,
}

impl CapturedMessage {
    /// Payload as space separated lower-case hex pairs
    pub fn payload_hex(&self) -> String {
        self.payload
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for CapturedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>6}  {:>8x} {} {} {:<6} {:<7}  {:>2}  {}",
            self.sequence,
            self.header.identifier,
            self.header.id_type,
            self.header.frame_type,
            self.header.bit_rate_switch.to_string(),
            self.header.format.to_string(),
            self.header.data_length(),
            self.payload_hex()
        )
    }
}

/// Bounded capture history, newest first.
#[derive(Debug)]
pub struct CaptureBuffer {
    messages: VecDeque<CapturedMessage>,
    limit: usize,
}

impl CaptureBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(limit.saturating_add(1)),
            limit,
        }
    }

    /// Sequence number the next pushed frame receives
    pub fn next_sequence(&self) -> u64 {
        self.messages.front().map_or(0, |m| m.sequence + 1)
    }

    /// Records a frame at the front, evicting from the back past the limit
    pub fn push(&mut self, header: FrameHeader, payload: Bytes) -> CapturedMessage {
        let message = CapturedMessage {
            sequence: self.next_sequence(),
            header,
            payload,
        };
        self.messages.push_front(message.clone());
        self.messages.truncate(self.limit);
        message
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn latest(&self) -> Option<&CapturedMessage> {
        self.messages.front()
    }

    pub fn get(&self, index: usize) -> Option<&CapturedMessage> {
        self.messages.get(index)
    }

    /// Iterates newest to oldest
    pub fn iter(&self) -> impl Iterator<Item = &CapturedMessage> {
        self.messages.iter()
    }

    pub fn snapshot(&self) -> Vec<CapturedMessage> {
        self.messages.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Default for CaptureBuffer {
    fn default() -> Self {
        Self::new(HISTORY_LIMIT)
    }
}
