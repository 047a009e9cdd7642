// libnfctag/src/types.rs

use crate::Error;
use derive_more::{BitAnd, BitOr, BitOrAssign, Display};
use std::convert::TryFrom;

/// Completion status carried by every application event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Status {
    Ok,
    Failed,
    Timeout,
}

impl Status {
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }
}

/// Tag technology selected at activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TagProtocol {
    #[display(fmt = "T1T")]
    T1t,
    #[display(fmt = "T2T")]
    T2t,
    #[display(fmt = "T3T")]
    T3t,
    #[display(fmt = "T4T")]
    T4t,
    #[display(fmt = "ISO15693")]
    I93,
    #[display(fmt = "MIFARE Classic")]
    Mfc,
}

/// NDEF attribute bitmask reported by NDEF detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, BitOr, BitOrAssign, BitAnd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NdefFlags(u8);

impl NdefFlags {
    pub const NONE: Self = Self(0x00);
    pub const SUPPORTED: Self = Self(0x01);
    pub const FORMATED: Self = Self(0x02);
    pub const READ_ONLY: Self = Self(0x04);
    pub const FORMATABLE: Self = Self(0x08);
    pub const SOFT_LOCKABLE: Self = Self(0x10);
    pub const HARD_LOCKABLE: Self = Self(0x20);
    pub const OTP: Self = Self(0x40);
    pub const UNKNOWN: Self = Self(0x80);

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

/// IDm - Newtype Pattern (8 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Idm([u8; 8]);

impl Idm {
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        crate::utils::bytes_to_hex(self.as_bytes())
    }
}

impl TryFrom<&[u8]> for Idm {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != 8 {
            return Err(Error::InvalidLength {
                expected: 8,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&bytes[..8]);
        Ok(Self(arr))
    }
}

/// PMm - Newtype Pattern (8 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Pmm([u8; 8]);

impl Pmm {
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

/// SystemCode (u16)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SystemCode(u16);

impl SystemCode {
    pub const ANY: Self = Self(0xffff);
    pub const NDEF: Self = Self(0x12fc);

    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// System codes travel big-endian in POLL requests.
    pub fn to_be_bytes(&self) -> [u8; 2] {
        self.0.to_be_bytes()
    }
}

/// ServiceCode (u16), little-endian on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceCode(u16);

impl ServiceCode {
    /// NDEF service, read/write access.
    pub const NDEF_RW: Self = Self(0x0009);
    /// NDEF service, read-only access.
    pub const NDEF_RO: Self = Self(0x000b);

    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    pub fn as_u16(&self) -> u16 {
        self.0
    }

    pub fn to_le_bytes(&self) -> [u8; 2] {
        self.0.to_le_bytes()
    }

    pub fn from_le_bytes(bytes: [u8; 2]) -> Self {
        Self(u16::from_le_bytes(bytes))
    }
}

/// One entry of a FeliCa block list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockElement {
    pub service_index: u8,
    pub block_number: u16,
}

impl BlockElement {
    pub fn new(service_index: u8, block_number: u16) -> Self {
        Self {
            service_index,
            block_number,
        }
    }

    /// Encode as a 2-byte element when the block number fits in one byte,
    /// otherwise as a 3-byte element (block number little-endian).
    pub fn encode(&self) -> Vec<u8> {
        if self.block_number <= 0xff {
            vec![0x80 | (self.service_index & 0x0f), self.block_number as u8]
        } else {
            let [lo, hi] = self.block_number.to_le_bytes();
            vec![self.service_index & 0x0f, lo, hi]
        }
    }
}
