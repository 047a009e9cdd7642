// libnfctag/src/tlv/mod.rs
//! TLV handling for tags storing NDEF inside a TLV area (T1T, T2T, T5T and
//! MIFARE Classic).

pub mod lock;
pub mod scanner;

pub use lock::{LockByte, LockControlTlv, LockTable, MemoryControlTlv};
pub use scanner::{NdefTlv, ScanEvent, TlvScanner};

use crate::constants::*;
use crate::{Error, Result};

/// TLV block types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlvType {
    Null,
    LockControl,
    MemoryControl,
    Ndef,
    Proprietary,
    Terminator,
}

impl TlvType {
    pub fn code(&self) -> u8 {
        match self {
            TlvType::Null => TLV_NULL,
            TlvType::LockControl => TLV_LOCK_CONTROL,
            TlvType::MemoryControl => TLV_MEMORY_CONTROL,
            TlvType::Ndef => TLV_NDEF,
            TlvType::Proprietary => TLV_PROPRIETARY,
            TlvType::Terminator => TLV_TERMINATOR,
        }
    }
}

impl TryFrom<u8> for TlvType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            TLV_NULL => Ok(TlvType::Null),
            TLV_LOCK_CONTROL => Ok(TlvType::LockControl),
            TLV_MEMORY_CONTROL => Ok(TlvType::MemoryControl),
            TLV_NDEF => Ok(TlvType::Ndef),
            TLV_PROPRIETARY => Ok(TlvType::Proprietary),
            TLV_TERMINATOR => Ok(TlvType::Terminator),
            other => Err(Error::MalformedTlv(format!("unknown tlv type {:#04x}", other))),
        }
    }
}

/// Size of the length field needed to encode `len`.
pub fn length_field_size(len: usize) -> usize {
    if len <= TLV_SHORT_LENGTH_MAX { 1 } else { 3 }
}

/// Encode a TLV length in the one or three byte format.
pub fn encode_length(len: usize) -> Result<Vec<u8>> {
    if len > TLV_LONG_LENGTH_MAX {
        return Err(Error::InvalidLength {
            expected: TLV_LONG_LENGTH_MAX,
            actual: len,
        });
    }
    if len <= TLV_SHORT_LENGTH_MAX {
        Ok(vec![len as u8])
    } else {
        Ok(vec![TLV_LONG_LENGTH_MARKER, (len >> 8) as u8, len as u8])
    }
}

/// Largest NDEF message that fits when `free` bytes are available after
/// the TLV type byte (length field plus value).
pub fn max_message_len(free: usize) -> usize {
    if free == 0 {
        return 0;
    }
    let long = free.saturating_sub(3).min(TLV_LONG_LENGTH_MAX);
    if long > TLV_SHORT_LENGTH_MAX {
        long
    } else {
        (free - 1).min(TLV_SHORT_LENGTH_MAX)
    }
}
