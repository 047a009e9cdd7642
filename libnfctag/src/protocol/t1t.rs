// libnfctag/src/protocol/t1t.rs
//! Type 1 Tag (Topaz) commands.
//!
//! Every request is `[opcode, address, data..., UID0..UID3]`. Single byte
//! commands address `(block << 3) | byte` and carry one data byte; the
//! 8-byte commands address a whole block and carry eight.

use super::WireCommand;
use super::parser;
use crate::{Error, Result};

pub const T1T_CMD_RID: u8 = 0x78;
pub const T1T_CMD_RALL: u8 = 0x00;
pub const T1T_CMD_READ: u8 = 0x01;
pub const T1T_CMD_WRITE_E: u8 = 0x53;
pub const T1T_CMD_WRITE_NE: u8 = 0x1A;
pub const T1T_CMD_RSEG: u8 = 0x10;
pub const T1T_CMD_READ8: u8 = 0x02;
pub const T1T_CMD_WRITE_E8: u8 = 0x54;
pub const T1T_CMD_WRITE_NE8: u8 = 0x1B;

pub const T1T_BLOCK_SIZE: usize = 8;
pub const T1T_UID_LEN: usize = 4;

/// Bytes returned by RALL after HR0/HR1 (blocks 0x00 to 0x0E).
pub const T1T_STATIC_SIZE: usize = 120;

/// HR0 of a static memory tag (Topaz 96).
pub const T1T_STATIC_HR0: u8 = 0x11;
/// HR0 of a Topaz 512.
pub const T1T_TOPAZ512_HR0: u8 = 0x12;
/// High nibble of HR0 set on NDEF capable tags.
pub const T1T_NDEF_SUPPORTED_HR0: u8 = 0x10;

/// Offset of the NDEF magic number (block 1, byte 0).
pub const T1T_CC_NMN_OFFSET: usize = 8;
pub const T1T_CC_VNO_OFFSET: usize = 9;
pub const T1T_CC_TMS_OFFSET: usize = 10;
pub const T1T_CC_RWA_OFFSET: usize = 11;
pub const T1T_DATA_START: usize = 12;

/// Static lock bytes (block 0x0E, bytes 0 and 1).
pub const T1T_STATIC_LOCK0: usize = 0x70;
pub const T1T_STATIC_LOCK1: usize = 0x71;

/// Reserved/lock/OTP blocks 0x0D and 0x0E of every tag.
pub const T1T_STATIC_RESERVED: std::ops::Range<usize> = 0x68..0x78;
/// On dynamic tags block 0x0F is reserved as well.
pub const T1T_DYNAMIC_RESERVED: std::ops::Range<usize> = 0x68..0x80;

/// Default Lock Control TLV value of a Topaz 512.
pub const T1T_DEFAULT_LOCK_TLV: [u8; 3] = [0xF2, 0x30, 0x33];
/// Default Memory Control TLV value of a Topaz 512.
pub const T1T_DEFAULT_MEM_TLV: [u8; 3] = [0xF0, 0x02, 0x03];

pub type Uid = [u8; T1T_UID_LEN];

/// Encode the single byte address of `block`/`byte`.
pub fn address(block: u8, byte: u8) -> u8 {
    (block << 3) | (byte & 0x07)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum T1tCommand {
    Rid,
    Rall { uid: Uid },
    Read { uid: Uid, add: u8 },
    WriteE { uid: Uid, add: u8, data: u8 },
    WriteNe { uid: Uid, add: u8, data: u8 },
    Rseg { uid: Uid, segment: u8 },
    Read8 { uid: Uid, block: u8 },
    WriteE8 { uid: Uid, block: u8, data: [u8; 8] },
    WriteNe8 { uid: Uid, block: u8, data: [u8; 8] },
}

impl WireCommand for T1tCommand {
    fn opcode(&self) -> u8 {
        match self {
            Self::Rid => T1T_CMD_RID,
            Self::Rall { .. } => T1T_CMD_RALL,
            Self::Read { .. } => T1T_CMD_READ,
            Self::WriteE { .. } => T1T_CMD_WRITE_E,
            Self::WriteNe { .. } => T1T_CMD_WRITE_NE,
            Self::Rseg { .. } => T1T_CMD_RSEG,
            Self::Read8 { .. } => T1T_CMD_READ8,
            Self::WriteE8 { .. } => T1T_CMD_WRITE_E8,
            Self::WriteNe8 { .. } => T1T_CMD_WRITE_NE8,
        }
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(14);
        buf.push(self.opcode());
        match self {
            Self::Rid => buf.extend_from_slice(&[0x00; 6]),
            Self::Rall { uid } => {
                buf.extend_from_slice(&[0x00, 0x00]);
                buf.extend_from_slice(uid);
            }
            Self::Read { uid, add } => {
                buf.extend_from_slice(&[*add, 0x00]);
                buf.extend_from_slice(uid);
            }
            Self::WriteE { uid, add, data } | Self::WriteNe { uid, add, data } => {
                buf.extend_from_slice(&[*add, *data]);
                buf.extend_from_slice(uid);
            }
            Self::Rseg { uid, segment } => {
                buf.push(segment << 4);
                buf.extend_from_slice(&[0x00; 8]);
                buf.extend_from_slice(uid);
            }
            Self::Read8 { uid, block } => {
                buf.push(*block);
                buf.extend_from_slice(&[0x00; 8]);
                buf.extend_from_slice(uid);
            }
            Self::WriteE8 { uid, block, data } | Self::WriteNe8 { uid, block, data } => {
                buf.push(*block);
                buf.extend_from_slice(data);
                buf.extend_from_slice(uid);
            }
        }
        Ok(buf)
    }
}

/// Decode a RID response: HR0, HR1 and UID0..UID3.
pub fn decode_rid(data: &[u8]) -> Result<([u8; 2], Uid)> {
    parser::ensure_len(data, 6)?;
    Ok(([data[0], data[1]], [data[2], data[3], data[4], data[5]]))
}

/// Decode a RALL response into HR and the 120 bytes of blocks 0..=0x0E.
pub fn decode_rall(data: &[u8]) -> Result<([u8; 2], &[u8])> {
    parser::ensure_len(data, 2 + T1T_STATIC_SIZE)?;
    Ok(([data[0], data[1]], &data[2..2 + T1T_STATIC_SIZE]))
}

/// Decode the `ADD DATA` echo of READ, WRITE-E and WRITE-NE.
pub fn decode_byte(data: &[u8], add: u8) -> Result<u8> {
    parser::ensure_len(data, 2)?;
    if data[0] != add {
        return Err(Error::UnexpectedResponse {
            expected: add,
            actual: data[0],
        });
    }
    Ok(data[1])
}

/// Decode the `ADD8 DATA8` response of READ8, WRITE-E8 and WRITE-NE8.
pub fn decode_block(data: &[u8], block: u8) -> Result<[u8; 8]> {
    parser::ensure_len(data, 1 + T1T_BLOCK_SIZE)?;
    if data[0] != block {
        return Err(Error::UnexpectedResponse {
            expected: block,
            actual: data[0],
        });
    }
    let mut out = [0u8; 8];
    out.copy_from_slice(&data[1..9]);
    Ok(out)
}

/// Decode an RSEG response into the 128 bytes of the segment.
pub fn decode_segment(data: &[u8], segment: u8) -> Result<&[u8]> {
    parser::ensure_len(data, 1 + 128)?;
    if data[0] != segment << 4 {
        return Err(Error::UnexpectedResponse {
            expected: segment << 4,
            actual: data[0],
        });
    }
    Ok(&data[1..129])
}
