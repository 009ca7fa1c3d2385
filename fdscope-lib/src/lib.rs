pub mod buffer;
pub mod capture;
pub mod config;
pub mod constants;
pub mod control;
pub mod error;
pub mod events;
pub mod fdcan;
pub mod protocol;
pub mod pump;
pub mod session;
pub mod timing;
pub mod transport;

use std::sync::{Mutex, MutexGuard, PoisonError};

// Re-export the main types for easy access
pub use buffer::{CaptureBuffer, CapturedMessage};
pub use capture::{CaptureController, CaptureState, Command};
pub use config::CaptureConfig;
pub use control::ControlClient;
pub use error::{Result, ScopeError};
pub use events::{CaptureEvent, EventReceiver, EventSender};
pub use fdcan::{BitRateSwitch, Dlc, ErrorState, Format, FrameHeader, FrameType, IdType};
pub use protocol::{AutoRetransmission, DeviceInfo, DeviceStatus, FrameFormat, Mode, Op, Register};
pub use pump::{CapturePump, SlotState};
pub use session::{SessionId, SessionManager, SessionState};
pub use transport::{DeviceEvent, NusbDevice, NusbTransport, Transport, UsbDevice};

/// Locks shared engine state. Every critical section leaves the state
/// consistent, so a poisoned lock is still safe to use.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
