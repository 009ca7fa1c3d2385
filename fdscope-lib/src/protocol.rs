//! # FDCAN Debugger Vendor Protocol
//!
//! The gadget is configured and commanded through class-type control requests
//! addressed to interface 0. The request field carries an [`Op`], the value field
//! carries a [`Register`] selector for register access (0 otherwise), and the
//! index field is always 0.
//!
//! Only [`Op::WriteRegister`] moves data from host to device; its 4-byte
//! little-endian value travels in the data phase, never in the value field.
//! Every other opcode is an IN request with a fixed response length.

use num_enum::{FromPrimitive, IntoPrimitive, TryFromPrimitive};
use std::fmt;
use strum_macros::Display;
use zerocopy::byteorder::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::constants::{DEVICE_INFO_SIZE, REGISTER_SIZE};

/// Vendor request opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Op {
    #[strum(to_string = "getDeviceInfo")]
    GetDeviceInfo = 0,
    #[strum(to_string = "captureStart")]
    CaptureStart = 1,
    #[strum(to_string = "captureStop")]
    CaptureStop = 2,
    #[strum(to_string = "readRegister")]
    ReadRegister = 3,
    #[strum(to_string = "writeRegister")]
    WriteRegister = 4,
    #[strum(to_string = "reset")]
    Reset = 5,
}

impl Op {
    /// Fixed number of bytes the device returns for this opcode
    pub fn response_len(&self) -> usize {
        match self {
            Op::GetDeviceInfo => DEVICE_INFO_SIZE,
            Op::ReadRegister => REGISTER_SIZE,
            Op::CaptureStart | Op::CaptureStop | Op::WriteRegister | Op::Reset => 0,
        }
    }

    /// Whether the request carries a data phase from host to device
    pub fn is_outbound(&self) -> bool {
        matches!(self, Op::WriteRegister)
    }
}

/// Gadget FDCAN register address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum Register {
    #[strum(to_string = "frameFormat")]
    FrameFormat = 0,
    #[strum(to_string = "mode")]
    Mode = 1,
    #[strum(to_string = "autoRetransmission")]
    AutoRetransmission = 2,
}

/// Binds a register value enum to the register it lives in.
pub trait RegisterValue: Copy + fmt::Debug + Into<u32> + TryFrom<u32> {
    const REGISTER: Register;
}

/// FDCAN frame format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Default, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum FrameFormat {
    #[default]
    #[strum(to_string = "Classic")]
    Classic = 0,
    #[strum(to_string = "FD w/o BRS")]
    FdNoBrs = 1,
    #[strum(to_string = "FD w/ BRS")]
    FdBrs = 2,
}

impl RegisterValue for FrameFormat {
    const REGISTER: Register = Register::FrameFormat;
}

/// FDCAN operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Default, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum Mode {
    #[default]
    #[strum(to_string = "Normal")]
    Normal = 0,
    #[strum(to_string = "Restricted")]
    RestrictedOperation = 1,
    #[strum(to_string = "Bus Monitoring")]
    BusMonitoring = 2,
    #[strum(to_string = "Internal Loopback")]
    InternalLoopback = 3,
    #[strum(to_string = "External Loopback")]
    ExternalLoopback = 4,
}

impl RegisterValue for Mode {
    const REGISTER: Register = Register::Mode;
}

/// FDCAN automatic retransmission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Default, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum AutoRetransmission {
    #[strum(to_string = "Disabled")]
    Disable = 0,
    #[default]
    #[strum(to_string = "Enabled")]
    Enable = 1,
}

impl RegisterValue for AutoRetransmission {
    const REGISTER: Register = Register::AutoRetransmission;
}

/// Status byte reported by the gadget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum DeviceStatus {
    #[strum(to_string = "ok")]
    Ok = 0x00,
    #[strum(to_string = "generic error")]
    GenericError = 0x01,
    #[num_enum(default)]
    #[strum(to_string = "unknown")]
    Unknown = 0xFF,
}

/// Wire layout of the getDeviceInfo response (32 bytes)
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct DeviceInfoRaw {
    pub status: u8,
    pub protocol_version: [u8; 2],
    pub hardware_revision: [u8; 2],
    pub firmware_version: [u8; 3],
    pub firmware_build_id: U32,
    pub reserved: [u8; 20],
}

/// Snapshot of the gadget's identity and firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub status: DeviceStatus,
    pub protocol_version: (u8, u8),
    pub hardware_revision: (u8, u8),
    pub firmware_version: (u8, u8, u8),
    pub firmware_build_id: u32,
}

impl From<DeviceInfoRaw> for DeviceInfo {
    fn from(raw: DeviceInfoRaw) -> Self {
        let [proto_maj, proto_min] = raw.protocol_version;
        let [hw_maj, hw_min] = raw.hardware_revision;
        let [fw_maj, fw_min, fw_pat] = raw.firmware_version;

        Self {
            status: DeviceStatus::from_primitive(raw.status),
            protocol_version: (proto_maj, proto_min),
            hardware_revision: (hw_maj, hw_min),
            firmware_version: (fw_maj, fw_min, fw_pat),
            firmware_build_id: raw.firmware_build_id.get(),
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Status:            {}", self.status)?;
        writeln!(
            f,
            "Protocol version:  {}.{}",
            self.protocol_version.0, self.protocol_version.1
        )?;
        writeln!(
            f,
            "Hardware revision: {}.{}",
            self.hardware_revision.0, self.hardware_revision.1
        )?;
        writeln!(
            f,
            "Firmware version:  {}.{}.{}",
            self.firmware_version.0, self.firmware_version.1, self.firmware_version.2
        )?;
        write!(f, "Firmware build:    {:#010x}", self.firmware_build_id)
    }
}
