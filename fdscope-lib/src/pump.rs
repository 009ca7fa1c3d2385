//! Capture pump: a fixed pool of bulk IN reads kept outstanding against the
//! gadget's capture endpoint.
//!
//! Every slot of the pool cycles through [`SlotState`]. A slot is armed with a
//! fresh ticket when a read is submitted for it; the read's completion is only
//! honoured while the slot still holds that ticket. Stopping the pump clears the
//! slots, so reads that complete later are discarded without being decoded or
//! resubmitted. Transfers are never cancelled at the transport.

use bytes::Bytes;
use nusb::transfer::TransferError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::buffer::CaptureBuffer;
use crate::config::CaptureConfig;
use crate::constants::{ENDPOINT_IN, FRAME_HEADER_SIZE, MAX_PAYLOAD_SIZE};
use crate::error::ScopeError;
use crate::events::{CaptureEvent, EventSender, publish};
use crate::fdcan::FrameHeader;
use crate::lock;
use crate::transport::Transport;

/// Bookkeeping state of one pool slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// No read outstanding
    Idle,
    /// A read holding this ticket is outstanding
    Awaiting(u64),
    /// The read holding this ticket failed; a resubmit is scheduled
    Backoff(u64),
}

#[derive(Debug)]
struct SlotTable {
    slots: Vec<SlotState>,
    next_ticket: u64,
}

impl SlotTable {
    fn new(size: usize) -> Self {
        Self {
            slots: vec![SlotState::Idle; size],
            next_ticket: 0,
        }
    }

    fn arm(&mut self, slot: usize) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket = self.next_ticket.wrapping_add(1);
        self.slots[slot] = SlotState::Awaiting(ticket);
        ticket
    }

    /// Arms `slot` only if it is still in `expected`
    fn rearm(&mut self, slot: usize, expected: SlotState) -> Option<u64> {
        (self.slots.get(slot) == Some(&expected)).then(|| self.arm(slot))
    }

    fn back_off(&mut self, slot: usize, ticket: u64) -> bool {
        if self.slots.get(slot) == Some(&SlotState::Awaiting(ticket)) {
            self.slots[slot] = SlotState::Backoff(ticket);
            true
        } else {
            false
        }
    }

    fn clear(&mut self) {
        self.slots.fill(SlotState::Idle);
    }
}

/// Running totals of what the pump has seen
#[derive(Debug, Default)]
pub struct PumpStats {
    pub frames: AtomicU64,
    pub bus_errors: AtomicU64,
    pub zero_length: AtomicU64,
    pub malformed: AtomicU64,
    pub discarded: AtomicU64,
}

struct PumpInner<T> {
    transport: Arc<T>,
    slots: Mutex<SlotTable>,
    buffer: Arc<Mutex<CaptureBuffer>>,
    events: EventSender,
    stats: PumpStats,
    transfer_size: usize,
    backoff: Duration,
}

/// Keeps `pool_size` bulk reads in flight and feeds decoded frames into the
/// capture buffer. Must be driven from within a tokio runtime.
pub struct CapturePump<T> {
    inner: Arc<PumpInner<T>>,
}

impl<T> Clone for CapturePump<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> CapturePump<T> {
    pub fn new(
        transport: Arc<T>,
        buffer: Arc<Mutex<CaptureBuffer>>,
        events: EventSender,
        config: &CaptureConfig,
    ) -> Self {
        Self {
            inner: Arc::new(PumpInner {
                transport,
                slots: Mutex::new(SlotTable::new(config.pool_size)),
                buffer,
                events,
                stats: PumpStats::default(),
                transfer_size: config.transfer_size,
                backoff: config.retry_backoff(),
            }),
        }
    }

    /// Dispatches every slot without a read outstanding. Idle slots and slots
    /// waiting out a backoff are armed at once; a slot never holds two reads.
    pub fn start(&self) {
        let mut armed = Vec::new();
        {
            let mut table = lock(&self.inner.slots);
            for slot in 0..table.slots.len() {
                if !matches!(table.slots[slot], SlotState::Awaiting(_)) {
                    armed.push((slot, table.arm(slot)));
                }
            }
        }

        info!(slots = armed.len(), "Starting capture pool");
        for (slot, ticket) in armed {
            self.inner.submit(slot, ticket);
        }
    }

    /// Returns every slot to idle; in-flight reads are left to complete and be discarded
    pub fn stop(&self) {
        lock(&self.inner.slots).clear();
        info!("Capture pool reset");
    }

    /// Submits a read for `slot`; out-of-range slots are ignored
    pub fn dispatch(&self, slot: usize) {
        if slot < self.pool_size() {
            self.inner.dispatch(slot);
        }
    }

    pub fn pool_size(&self) -> usize {
        lock(&self.inner.slots).slots.len()
    }

    /// Number of slots with a read outstanding
    pub fn outstanding(&self) -> usize {
        lock(&self.inner.slots)
            .slots
            .iter()
            .filter(|s| matches!(s, SlotState::Awaiting(_)))
            .count()
    }

    pub fn slot_states(&self) -> Vec<SlotState> {
        lock(&self.inner.slots).slots.clone()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.slots)
            .slots
            .iter()
            .any(|s| *s != SlotState::Idle)
    }

    pub fn stats(&self) -> &PumpStats {
        &self.inner.stats
    }
}

impl<T: Transport> PumpInner<T> {
    fn dispatch(self: &Arc<Self>, slot: usize) {
        let ticket = lock(&self.slots).arm(slot);
        self.submit(slot, ticket);
    }

    fn submit(self: &Arc<Self>, slot: usize, ticket: u64) {
        trace!(slot, ticket, "Submitting bulk read");
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let result = this.transport.bulk_in(ENDPOINT_IN, this.transfer_size).await;
            this.on_complete(slot, ticket, result);
        });
    }

    fn on_complete(self: &Arc<Self>, slot: usize, ticket: u64, result: Result<Vec<u8>, TransferError>) {
        let data = match result {
            Ok(data) => data,
            Err(e) => {
                if !lock(&self.slots).back_off(slot, ticket) {
                    self.discard(slot, ticket);
                    return;
                }
                self.stats.bus_errors.fetch_add(1, Ordering::Relaxed);
                if is_unplug(&e) {
                    // Every slot retries until the session detaches
                    debug!(slot, "Device gone, retrying in {:?}", self.backoff);
                } else {
                    warn!(slot, error = %ScopeError::BusTransfer(e), "Transfer error, retrying in {:?}", self.backoff);
                }
                self.retry_later(slot, ticket);
                return;
            }
        };

        // Redispatch before touching the data so the endpoint stays saturated
        let Some(next) = lock(&self.slots).rearm(slot, SlotState::Awaiting(ticket)) else {
            self.discard(slot, ticket);
            return;
        };
        self.submit(slot, next);

        if data.is_empty() {
            self.stats.zero_length.fetch_add(1, Ordering::Relaxed);
            debug!(slot, "Received ZLP");
            return;
        }

        let Some(header) = FrameHeader::decode(&data) else {
            self.stats.malformed.fetch_add(1, Ordering::Relaxed);
            warn!(
                slot,
                bytes = hex::encode(&data),
                error = %ScopeError::MalformedFrame { len: data.len() },
                "Packet too short"
            );
            return;
        };

        let payload = frame_payload(Bytes::from(data), header.data_length());
        let message = lock(&self.buffer).push(header, payload);
        self.stats.frames.fetch_add(1, Ordering::Relaxed);
        trace!(slot, sequence = message.sequence, id = message.header.identifier, "Captured frame");
        publish(&self.events, CaptureEvent::MessageCaptured(message));
    }

    fn retry_later(self: &Arc<Self>, slot: usize, ticket: u64) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(this.backoff).await;
            let next = lock(&this.slots).rearm(slot, SlotState::Backoff(ticket));
            match next {
                Some(next) => this.submit(slot, next),
                None => debug!(slot, "Slot cleared during backoff"),
            }
        });
    }

    fn discard(&self, slot: usize, ticket: u64) {
        self.stats.discarded.fetch_add(1, Ordering::Relaxed);
        debug!(slot, ticket, "Capture IN aborted");
    }
}

fn is_unplug(e: &TransferError) -> bool {
    matches!(e, TransferError::Disconnected)
}

/// Data after the header, cut to the DLC length when the read delivered more.
/// Never longer than one FDCAN payload.
fn frame_payload(data: Bytes, data_length: usize) -> Bytes {
    let end = (FRAME_HEADER_SIZE + data_length.min(MAX_PAYLOAD_SIZE)).min(data.len());
    data.slice(FRAME_HEADER_SIZE..end)
}
