//! FDCAN data-phase bit timing.
//!
//! A data bit is `SYNC_SEG + seg1 + seg2` time quanta long, where one quantum
//! is `prescaler / FDCAN_CLOCK_HZ` seconds.

use std::fmt;

use crate::error::{Result, ScopeError};

/// FDCAN kernel clock of the gadget (80 MHz)
pub const FDCAN_CLOCK_HZ: u32 = 80_000_000;
/// Fixed synchronisation segment length in t_q
pub const SYNC_SEG_LEN: u32 = 1;

pub const PRESCALER_MIN: u32 = 1;
pub const PRESCALER_MAX: u32 = 32;
pub const PRESCALER_DEFAULT: u32 = 16;

pub const SEG_LEN_MIN: u32 = 1;
pub const SEG1_LEN_MAX: u32 = 32;
pub const SEG2_LEN_MAX: u32 = 16;
pub const SEG1_LEN_DEFAULT: u32 = 2;
pub const SEG2_LEN_DEFAULT: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataBitTiming {
    prescaler: u32,
    seg1: u32,
    seg2: u32,
}

impl Default for DataBitTiming {
    fn default() -> Self {
        Self {
            prescaler: PRESCALER_DEFAULT,
            seg1: SEG1_LEN_DEFAULT,
            seg2: SEG2_LEN_DEFAULT,
        }
    }
}

impl DataBitTiming {
    pub fn new(prescaler: u32, seg1: u32, seg2: u32) -> Result<Self> {
        check("prescaler", prescaler, PRESCALER_MIN, PRESCALER_MAX)?;
        check("segment 1 length", seg1, SEG_LEN_MIN, SEG1_LEN_MAX)?;
        check("segment 2 length", seg2, SEG_LEN_MIN, SEG2_LEN_MAX)?;
        Ok(Self { prescaler, seg1, seg2 })
    }

    pub fn prescaler(&self) -> u32 {
        self.prescaler
    }

    pub fn seg1(&self) -> u32 {
        self.seg1
    }

    pub fn seg2(&self) -> u32 {
        self.seg2
    }

    /// Bit length in time quanta
    pub fn quanta(&self) -> u32 {
        SYNC_SEG_LEN + self.seg1 + self.seg2
    }

    /// Length of one time quantum in nanoseconds
    pub fn quantum_ns(&self) -> f64 {
        1e9 * self.prescaler as f64 / FDCAN_CLOCK_HZ as f64
    }

    pub fn sync_seg_ns(&self) -> f64 {
        SYNC_SEG_LEN as f64 * self.quantum_ns()
    }

    pub fn seg1_ns(&self) -> f64 {
        self.seg1 as f64 * self.quantum_ns()
    }

    pub fn seg2_ns(&self) -> f64 {
        self.seg2 as f64 * self.quantum_ns()
    }

    pub fn bit_time_ns(&self) -> f64 {
        self.quanta() as f64 * self.quantum_ns()
    }

    /// Data phase bit rate in bit/s
    pub fn bit_rate(&self) -> f64 {
        FDCAN_CLOCK_HZ as f64 / (self.prescaler * self.quanta()) as f64
    }

    /// Sample point as a percentage of the bit
    pub fn sample_point(&self) -> f64 {
        100.0 * (SYNC_SEG_LEN + self.seg1) as f64 / self.quanta() as f64
    }
}

fn check(what: &str, value: u32, min: u32, max: u32) -> Result<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ScopeError::InvalidBitTiming(format!(
            "{what} {value} outside {min}..={max}"
        )))
    }
}

impl fmt::Display for DataBitTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Prescaler:        {} (t_q = {} ns)", self.prescaler, self.quantum_ns())?;
        writeln!(f, "t_SyncSeg:        {} ns ({} t_q)", self.sync_seg_ns(), SYNC_SEG_LEN)?;
        writeln!(f, "t_BS1:            {} ns ({} t_q)", self.seg1_ns(), self.seg1)?;
        writeln!(f, "t_BS2:            {} ns ({} t_q)", self.seg2_ns(), self.seg2)?;
        writeln!(f, "Time for one bit: {} ns", self.bit_time_ns())?;
        writeln!(f, "Sample point:     {:.1} %", self.sample_point())?;
        write!(f, "Baud rate:        {} bit/s", self.bit_rate())
    }
}
