// libnfctag/src/protocol/t2t.rs
//! Type 2 Tag commands.

use super::WireCommand;
use super::parser;
use crate::{Error, Result};

pub const T2T_CMD_READ: u8 = 0x30;
pub const T2T_CMD_WRITE: u8 = 0xA2;
pub const T2T_CMD_SECTOR_SELECT: u8 = 0xC2;

pub const T2T_BLOCK_SIZE: usize = 4;
/// A READ returns four consecutive blocks.
pub const T2T_READ_SIZE: usize = 16;
pub const T2T_BLOCKS_PER_SECTOR: u16 = 256;

/// 4-bit ACK delivered as one byte.
pub const T2T_ACK: u8 = 0x0A;

/// Byte offsets inside the header blocks 0..=3.
pub const T2T_STATIC_LOCK0: usize = 10;
pub const T2T_STATIC_LOCK1: usize = 11;
pub const T2T_CC_OFFSET: usize = 12;
pub const T2T_DATA_START: usize = 16;
/// Data area covered by the static lock bits.
pub const T2T_STATIC_DATA_SIZE: usize = 48;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum T2tCommand {
    Read { block: u8 },
    Write { block: u8, data: [u8; 4] },
    /// First SECTOR SELECT packet.
    SectorSelect1,
    /// Second SECTOR SELECT packet, acknowledged passively.
    SectorSelect2 { sector: u8 },
}

impl WireCommand for T2tCommand {
    fn opcode(&self) -> u8 {
        match self {
            Self::Read { .. } => T2T_CMD_READ,
            Self::Write { .. } => T2T_CMD_WRITE,
            Self::SectorSelect1 | Self::SectorSelect2 { .. } => T2T_CMD_SECTOR_SELECT,
        }
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let frame = match self {
            Self::Read { block } => vec![T2T_CMD_READ, *block],
            Self::Write { block, data } => {
                let mut v = vec![T2T_CMD_WRITE, *block];
                v.extend_from_slice(data);
                v
            }
            Self::SectorSelect1 => vec![T2T_CMD_SECTOR_SELECT, 0xFF],
            Self::SectorSelect2 { sector } => vec![*sector, 0x00, 0x00, 0x00],
        };
        Ok(frame)
    }
}

/// Decode a READ response (16 bytes).
pub fn decode_read(data: &[u8]) -> Result<&[u8]> {
    parser::ensure_len(data, T2T_READ_SIZE)?;
    Ok(&data[..T2T_READ_SIZE])
}

/// Check a WRITE or SECTOR SELECT acknowledgement.
pub fn decode_ack(data: &[u8]) -> Result<()> {
    let ack = parser::byte_at(data, 0)?;
    if data.len() != 1 || ack & 0x0F != T2T_ACK {
        return Err(Error::TagError(ack));
    }
    Ok(())
}

/// Split an absolute block number into sector and block inside the sector.
pub fn split_block(block: u16) -> (u8, u8) {
    (
        (block / T2T_BLOCKS_PER_SECTOR) as u8,
        (block % T2T_BLOCKS_PER_SECTOR) as u8,
    )
}

/// Manufacturer specific defaults used by detection and formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct T2tManufacturer {
    pub uid0: u8,
    pub name: &'static str,
    /// CC2 (data area size / 8) written by FormatNDef when the tag does
    /// not carry a factory CC.
    pub default_cc2: u8,
    /// Bytes locked by one dynamic lock bit when no Lock Control TLV is
    /// present.
    pub bytes_per_lock_bit: u16,
}

pub const T2T_MANUFACTURERS: &[T2tManufacturer] = &[
    T2tManufacturer {
        uid0: 0x04,
        name: "NXP",
        default_cc2: 0x06,
        bytes_per_lock_bit: 8,
    },
    T2tManufacturer {
        uid0: 0x05,
        name: "Infineon",
        default_cc2: 0x10,
        bytes_per_lock_bit: 8,
    },
    T2tManufacturer {
        uid0: 0x02,
        name: "STMicroelectronics",
        default_cc2: 0x06,
        bytes_per_lock_bit: 8,
    },
    T2tManufacturer {
        uid0: 0x1F,
        name: "Kovio",
        default_cc2: 0x0E,
        bytes_per_lock_bit: 8,
    },
];

/// Bytes per dynamic lock bit when the manufacturer is unknown.
pub const T2T_DEFAULT_BYTES_PER_LOCK_BIT: u16 = 8;

pub fn manufacturer(uid0: u8) -> Option<&'static T2tManufacturer> {
    T2T_MANUFACTURERS.iter().find(|m| m.uid0 == uid0)
}
