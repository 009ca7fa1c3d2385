use nusb::transfer::TransferError;
use thiserror::Error;

use crate::capture::{CaptureState, Command};
use crate::protocol::{Op, Register};
use crate::session::SessionId;

/// Result type alias for capture engine operations
pub type Result<T> = std::result::Result<T, ScopeError>;

/// The primary error type for the `fdscope-lib` library.
#[derive(Error, Debug)]
pub enum ScopeError {
    #[error("FDCAN debugger not found. Is the gadget connected?")]
    DeviceNotFound,

    /// A vendor control request completed with a non-ok status
    #[error("{op} request failed: {source}")]
    ControlTransfer {
        op: Op,
        #[source]
        source: TransferError,
    },

    /// A vendor control request returned fewer bytes than its fixed contract
    #[error("{op} response incorrect length; got {actual} expected {expected}")]
    ShortResponse { op: Op, expected: usize, actual: usize },

    /// A bulk read on the capture endpoint failed
    #[error("bulk transfer error: {0}")]
    BusTransfer(#[from] TransferError),

    /// A captured transfer too short to carry a frame header
    #[error("malformed frame: {len} bytes is shorter than the frame header")]
    MalformedFrame { len: usize },

    #[error("failed to open USB device: {0}")]
    DeviceOpen(#[source] nusb::Error),

    #[error("failed to select USB configuration: {0}")]
    Configure(#[source] nusb::Error),

    #[error("failed to claim USB interface: {0}")]
    ClaimInterface(#[source] nusb::Error),

    #[error("no session {0}")]
    UnknownSession(SessionId),

    #[error("cannot {command} while {state}")]
    CommandNotAllowed { command: Command, state: CaptureState },

    #[error("register {register} holds unknown value {value}")]
    UnknownRegisterValue { register: Register, value: u32 },

    #[error("invalid bit timing: {0}")]
    InvalidBitTiming(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScopeError {
    /// Check if this error came out of device open/configure/claim
    pub fn is_session_error(&self) -> bool {
        matches!(
            self,
            ScopeError::DeviceOpen(_)
                | ScopeError::Configure(_)
                | ScopeError::ClaimInterface(_)
                | ScopeError::UnknownSession(_)
                | ScopeError::DeviceNotFound
        )
    }

    /// Check if this error is a failed vendor control request
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            ScopeError::ControlTransfer { .. } | ScopeError::ShortResponse { .. }
        )
    }
}
