//! FDCAN RX header codec.
//!
//! Every captured frame is preceded by the 8-byte RX element header the FDCAN
//! peripheral writes to message RAM, two little-endian words:
//!
//! ```text
//! word0  [0:28] id      29-bit extended id, or standard id in [18:28]
//!        29     RTR     remote frame
//!        30     XTD     extended id
//!        31     ESI     transmitter error passive
//! word1  [0:15] RXTS    RX timestamp
//!        [16:19] DLC    data length code
//!        20     BRS     bit rate switch
//!        21     FDF     FD format
//!        [24:29] FIDX   filter index
//!        31     ANMF    accepted non-matching frame
//! ```
//!
//! Decoding never rejects a bit pattern: reserved bits are ignored and every
//! field is masked to its width. Only an input shorter than 8 bytes fails.

use modular_bitfield::prelude::*;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;
use strum_macros::Display;

use crate::constants::FRAME_HEADER_SIZE;

const STD_ID_POS: u32 = 18;
const STD_ID_MASK: u32 = 0x7FF;
const EXT_ID_MASK: u32 = 0x1FFF_FFFF;

#[bitfield(bytes = 4)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RxWord0 {
    pub id: B29,
    pub rtr: bool,
    pub xtd: bool,
    pub esi: bool,
}

#[bitfield(bytes = 4)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RxWord1 {
    pub rx_timestamp: B16,
    pub dlc: B4,
    pub brs: bool,
    pub fdf: bool,
    #[skip]
    reserved0: B2,
    pub filter_index: B6,
    #[skip]
    reserved1: bool,
    pub anmf: bool,
}

/// FDCAN identifier type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum IdType {
    /// 11-bit standard identifier
    #[strum(to_string = "11b")]
    Standard,
    /// 29-bit extended identifier
    #[strum(to_string = "29b")]
    Extended,
}

/// FDCAN frame type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum FrameType {
    #[strum(to_string = "D")]
    Data,
    #[strum(to_string = "R")]
    Remote,
}

/// Error state indicator of the transmitting node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ErrorState {
    #[strum(to_string = "active")]
    Active,
    #[strum(to_string = "passive")]
    Passive,
}

/// Bit rate switching for the data phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum BitRateSwitch {
    #[strum(to_string = "No BRS")]
    Off,
    #[strum(to_string = "BRS")]
    On,
}

/// Classic or FD frame format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Format {
    #[strum(to_string = "Classic")]
    Classic,
    #[strum(to_string = "FD")]
    Fd,
}

/// FDCAN Data Length Code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Dlc {
    #[default]
    Bytes0 = 0x0,
    Bytes1 = 0x1,
    Bytes2 = 0x2,
    Bytes3 = 0x3,
    Bytes4 = 0x4,
    Bytes5 = 0x5,
    Bytes6 = 0x6,
    Bytes7 = 0x7,
    Bytes8 = 0x8,
    Bytes12 = 0x9,
    Bytes16 = 0xA,
    Bytes20 = 0xB,
    Bytes24 = 0xC,
    Bytes32 = 0xD,
    Bytes48 = 0xE,
    Bytes64 = 0xF,
}

/// Byte count for every 4-bit DLC code
pub const DLC_TO_LEN: [usize; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

impl Dlc {
    /// Maps a raw code to a DLC, masking to 4 bits; anything unmappable is zero length
    pub fn from_code(code: u8) -> Self {
        Dlc::try_from(code & 0x0F).unwrap_or_default()
    }

    /// Smallest DLC able to carry `length` bytes (saturates at 64)
    pub fn for_len(length: usize) -> Self {
        DLC_TO_LEN
            .iter()
            .position(|&len| len >= length)
            .map(|code| Dlc::from_code(code as u8))
            .unwrap_or(Dlc::Bytes64)
    }

    pub fn code(&self) -> u8 {
        (*self).into()
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        DLC_TO_LEN.get(self.code() as usize).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decoded FDCAN frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Raw identifier, at most 0x7FF for standard and 0x1FFFFFFF for extended ids
    pub identifier: u32,
    pub id_type: IdType,
    pub frame_type: FrameType,
    pub dlc: Dlc,
    pub error_state: ErrorState,
    pub bit_rate_switch: BitRateSwitch,
    pub format: Format,
}

impl FrameHeader {
    /// Decodes the 8-byte header at the start of `buf`.
    ///
    /// Returns `None` only when fewer than 8 bytes are available.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let lower: [u8; 4] = buf.get(0..4)?.try_into().ok()?;
        let upper: [u8; 4] = buf.get(4..FRAME_HEADER_SIZE)?.try_into().ok()?;
        let word0 = RxWord0::from_bytes(lower);
        let word1 = RxWord1::from_bytes(upper);

        let (id_type, identifier) = if word0.xtd() {
            (IdType::Extended, word0.id() & EXT_ID_MASK)
        } else {
            (IdType::Standard, (word0.id() >> STD_ID_POS) & STD_ID_MASK)
        };

        Some(Self {
            identifier,
            id_type,
            frame_type: if word0.rtr() { FrameType::Remote } else { FrameType::Data },
            dlc: Dlc::from_code(word1.dlc()),
            error_state: if word0.esi() { ErrorState::Passive } else { ErrorState::Active },
            bit_rate_switch: if word1.brs() { BitRateSwitch::On } else { BitRateSwitch::Off },
            format: if word1.fdf() { Format::Fd } else { Format::Classic },
        })
    }

    /// Encodes the header into its wire layout; timestamp, filter index and
    /// ANMF are written as zero. Identifiers are masked to their type's width.
    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let id = match self.id_type {
            IdType::Standard => (self.identifier & STD_ID_MASK) << STD_ID_POS,
            IdType::Extended => self.identifier & EXT_ID_MASK,
        };
        let word0 = RxWord0::new()
            .with_id(id)
            .with_rtr(self.frame_type == FrameType::Remote)
            .with_xtd(self.id_type == IdType::Extended)
            .with_esi(self.error_state == ErrorState::Passive);
        let word1 = RxWord1::new()
            .with_dlc(self.dlc.code())
            .with_brs(self.bit_rate_switch == BitRateSwitch::On)
            .with_fdf(self.format == Format::Fd);

        let mut out = [0u8; FRAME_HEADER_SIZE];
        out[..4].copy_from_slice(&word0.into_bytes());
        out[4..].copy_from_slice(&word1.into_bytes());
        out
    }

    /// Payload size announced by the DLC
    pub fn data_length(&self) -> usize {
        self.dlc.len()
    }
}

impl fmt::Display for FrameHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:x} {} {} {} {}",
            self.identifier, self.id_type, self.frame_type, self.bit_rate_switch, self.format
        )
    }
}
