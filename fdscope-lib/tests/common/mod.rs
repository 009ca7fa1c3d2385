//! Common test utilities and shared imports

// Allow unused imports and dead code since this is a shared module
// used across multiple test files - not all items are used in every test file
#![allow(dead_code, unused_imports)]

pub use bytes::Bytes;
pub use fdscope_lib::constants::{FRAME_HEADER_SIZE, PID, VID};
pub use fdscope_lib::error::ScopeError;
pub use fdscope_lib::fdcan::{BitRateSwitch, Dlc, ErrorState, Format, FrameHeader, FrameType, IdType};
pub use fdscope_lib::transport::{ControlSetup, Transport, UsbDevice};
pub use nusb::transfer::TransferError;

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub type TransferResult = Result<Vec<u8>, TransferError>;

/// One control request seen by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlCall {
    pub setup: ControlSetup,
    /// Requested length for IN requests
    pub length: Option<u16>,
    /// Data phase for OUT requests
    pub data: Option<Vec<u8>>,
}

/// Scripted in-memory transport.
///
/// Control requests answer from a per-opcode queue, falling back to an ok
/// response of the requested length. Bulk reads answer from a shared queue and
/// stay pending forever once it runs dry.
#[derive(Debug, Default)]
pub struct MockTransport {
    control_replies: Mutex<HashMap<u8, VecDeque<TransferResult>>>,
    control_delays: Mutex<HashMap<u8, VecDeque<Duration>>>,
    control_calls: Mutex<Vec<ControlCall>>,
    bulk_replies: Mutex<VecDeque<TransferResult>>,
    bulk_delay: Mutex<Option<Duration>>,
    bulk_calls: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply_control(&self, request: u8, reply: TransferResult) {
        self.control_replies
            .lock()
            .unwrap()
            .entry(request)
            .or_default()
            .push_back(reply);
    }

    /// Delays the next reply to `request` by `delay`
    pub fn delay_control(&self, request: u8, delay: Duration) {
        self.control_delays
            .lock()
            .unwrap()
            .entry(request)
            .or_default()
            .push_back(delay);
    }

    pub fn push_bulk(&self, reply: TransferResult) {
        self.bulk_replies.lock().unwrap().push_back(reply);
    }

    /// Holds back every scripted bulk completion by `delay`
    pub fn delay_bulk(&self, delay: Duration) {
        *self.bulk_delay.lock().unwrap() = Some(delay);
    }

    pub fn control_calls(&self) -> Vec<ControlCall> {
        self.control_calls.lock().unwrap().clone()
    }

    pub fn requests(&self) -> Vec<u8> {
        self.control_calls().iter().map(|c| c.setup.request).collect()
    }

    pub fn bulk_calls(&self) -> usize {
        self.bulk_calls.load(Ordering::SeqCst)
    }

    fn next_control(&self, request: u8) -> (Option<TransferResult>, Option<Duration>) {
        let reply = self
            .control_replies
            .lock()
            .unwrap()
            .get_mut(&request)
            .and_then(VecDeque::pop_front);
        let delay = self
            .control_delays
            .lock()
            .unwrap()
            .get_mut(&request)
            .and_then(VecDeque::pop_front);
        (reply, delay)
    }
}

impl Transport for MockTransport {
    async fn control_in(&self, setup: ControlSetup, length: u16) -> TransferResult {
        self.control_calls.lock().unwrap().push(ControlCall {
            setup,
            length: Some(length),
            data: None,
        });
        let (reply, delay) = self.next_control(setup.request);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        reply.unwrap_or_else(|| Ok(vec![0; length as usize]))
    }

    async fn control_out(&self, setup: ControlSetup, data: &[u8]) -> Result<(), TransferError> {
        self.control_calls.lock().unwrap().push(ControlCall {
            setup,
            length: None,
            data: Some(data.to_vec()),
        });
        let (reply, delay) = self.next_control(setup.request);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        reply.unwrap_or(Ok(Vec::new())).map(|_| ())
    }

    async fn bulk_in(&self, _endpoint: u8, _length: usize) -> TransferResult {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.bulk_replies.lock().unwrap().pop_front();
        let delay = *self.bulk_delay.lock().unwrap();
        match reply {
            Some(reply) => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                reply
            }
            None => std::future::pending().await,
        }
    }
}

/// Device double for the session manager
pub struct MockDevice {
    pub key: u32,
    pub vendor_id: u16,
    pub product_id: u16,
    pub fail_claim: bool,
}

impl MockDevice {
    pub fn gadget(key: u32) -> Self {
        Self {
            key,
            vendor_id: VID,
            product_id: PID,
            fail_claim: false,
        }
    }

    pub fn broken(key: u32) -> Self {
        Self {
            fail_claim: true,
            ..Self::gadget(key)
        }
    }
}

impl UsbDevice for MockDevice {
    type Transport = MockTransport;
    type Key = u32;

    fn key(&self) -> u32 {
        self.key
    }

    fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    fn product_id(&self) -> u16 {
        self.product_id
    }

    async fn connect(&self) -> fdscope_lib::Result<MockTransport> {
        if self.fail_claim {
            return Err(ScopeError::ClaimInterface(std::io::Error::other("interface busy")));
        }
        Ok(MockTransport::new())
    }
}

/// Builds an encoded header followed by `payload`
pub fn frame_bytes(identifier: u32, id_type: IdType, payload: &[u8]) -> Vec<u8> {
    let header = FrameHeader {
        identifier,
        id_type,
        frame_type: FrameType::Data,
        dlc: Dlc::for_len(payload.len()),
        error_state: ErrorState::Active,
        bit_rate_switch: BitRateSwitch::Off,
        format: if payload.len() > 8 { Format::Fd } else { Format::Classic },
    };
    let mut bytes = header.encode().to_vec();
    bytes.extend_from_slice(payload);
    bytes
}

/// Routes library logs through the test harness; repeated calls are no-ops
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Lets every runnable task run until it blocks (requires paused time)
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
