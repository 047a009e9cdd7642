// libnfctag/src/protocol/mfc.rs
//! MIFARE Classic frames on the NCI MIFARE Classic RF interface.
//!
//! Data exchanges carry the `0x10` prefix, authentication requests the
//! `0x40` prefix with the key embedded in the request.

use super::WireCommand;
use super::parser;
use crate::{Error, Result};

pub const MFC_XCHG_DATA: u8 = 0x10;
pub const MFC_AUTH: u8 = 0x40;

pub const MFC_CMD_READ: u8 = 0x30;
pub const MFC_CMD_WRITE: u8 = 0xA0;
pub const MFC_ACK: u8 = 0x0A;

/// Key selector: key embedded in the request, bit 7 selects key B.
pub const MFC_KEY_A: u8 = 0x10;
pub const MFC_KEY_B: u8 = 0x90;

pub const MFC_BLOCK_SIZE: usize = 16;

pub type Key = [u8; 6];

pub const MFC_KEY_MAD: Key = [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5];
pub const MFC_KEY_NDEF: Key = [0xD3, 0xF7, 0xD3, 0xF7, 0xD3, 0xF7];
pub const MFC_KEY_DEFAULT: Key = [0xFF; 6];

/// MAD application identifier of NDEF sectors, as stored in the MAD.
pub const MFC_NDEF_AID: [u8; 2] = [0x03, 0xE1];

/// Access bits and general purpose byte of sector trailers.
pub const MFC_ACCESS_MAD: [u8; 4] = [0x78, 0x77, 0x88, 0xC1];
pub const MFC_ACCESS_NDEF_RW: [u8; 4] = [0x7F, 0x07, 0x88, 0x40];
pub const MFC_ACCESS_NDEF_RO: [u8; 4] = [0x07, 0x8F, 0x0F, 0x43];

/// Sector 16 holds MAD2 on 4K cards.
pub const MFC_MAD2_SECTOR: usize = 16;
/// MAD info byte written by FormatNDef.
pub const MFC_MAD_INFO: u8 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MfcCommand {
    Authenticate { sector: u8, key_b: bool, key: Key },
    Read { block: u8 },
    /// First half of a WRITE: the block address.
    WriteRequest { block: u8 },
    /// Second half of a WRITE: the 16 data bytes.
    WriteData { data: [u8; 16] },
}

impl WireCommand for MfcCommand {
    fn opcode(&self) -> u8 {
        match self {
            Self::Authenticate { .. } => MFC_AUTH,
            Self::Read { .. } => MFC_CMD_READ,
            Self::WriteRequest { .. } | Self::WriteData { .. } => MFC_CMD_WRITE,
        }
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let frame = match self {
            Self::Authenticate { sector, key_b, key } => {
                let mut v = vec![MFC_AUTH, *sector, if *key_b { MFC_KEY_B } else { MFC_KEY_A }];
                v.extend_from_slice(key);
                v
            }
            Self::Read { block } => vec![MFC_XCHG_DATA, MFC_CMD_READ, *block],
            Self::WriteRequest { block } => vec![MFC_XCHG_DATA, MFC_CMD_WRITE, *block],
            Self::WriteData { data } => {
                let mut v = vec![MFC_XCHG_DATA];
                v.extend_from_slice(data);
                v
            }
        };
        Ok(frame)
    }
}

pub fn decode_auth(data: &[u8]) -> Result<()> {
    parser::ensure_len(data, 2)?;
    parser::expect_response_code(data, MFC_AUTH)?;
    if data[1] != 0x00 {
        return Err(Error::TagError(data[1]));
    }
    Ok(())
}

pub fn decode_read(data: &[u8]) -> Result<[u8; 16]> {
    parser::ensure_len(data, 1 + MFC_BLOCK_SIZE)?;
    parser::expect_response_code(data, MFC_XCHG_DATA)?;
    let mut out = [0u8; 16];
    out.copy_from_slice(&data[1..17]);
    Ok(out)
}

pub fn decode_ack(data: &[u8]) -> Result<()> {
    parser::ensure_len(data, 2)?;
    parser::expect_response_code(data, MFC_XCHG_DATA)?;
    if data[1] & 0x0F != MFC_ACK {
        return Err(Error::TagError(data[1]));
    }
    Ok(())
}

/// Sector layout of the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MfcGeometry {
    Mini,
    Classic1k,
    Classic4k,
}

impl MfcGeometry {
    /// Derive the card size from SAK.
    pub fn from_sak(sak: u8) -> Result<Self> {
        match sak {
            0x09 => Ok(Self::Mini),
            0x08 | 0x28 | 0x88 => Ok(Self::Classic1k),
            0x18 | 0x38 | 0x98 | 0xB8 => Ok(Self::Classic4k),
            other => Err(Error::NotSupported(format!("mifare classic sak {:#04x}", other))),
        }
    }

    pub fn num_sectors(&self) -> usize {
        match self {
            Self::Mini => 5,
            Self::Classic1k => 16,
            Self::Classic4k => 40,
        }
    }

    pub fn blocks_in_sector(&self, sector: usize) -> usize {
        if sector < 32 { 4 } else { 16 }
    }

    pub fn first_block(&self, sector: usize) -> usize {
        if sector < 32 {
            sector * 4
        } else {
            128 + (sector - 32) * 16
        }
    }

    pub fn trailer_block(&self, sector: usize) -> usize {
        self.first_block(sector) + self.blocks_in_sector(sector) - 1
    }

    pub fn sector_of(&self, block: usize) -> usize {
        if block < 128 {
            block / 4
        } else {
            32 + (block - 128) / 16
        }
    }

    pub fn num_blocks(&self) -> usize {
        self.first_block(self.num_sectors() - 1) + self.blocks_in_sector(self.num_sectors() - 1)
    }

    pub fn is_trailer(&self, block: usize) -> bool {
        self.trailer_block(self.sector_of(block)) == block
    }

    /// Sectors whose MAD entry may point to an application.
    pub fn is_mad_sector(&self, sector: usize) -> bool {
        sector == 0 || (sector == MFC_MAD2_SECTOR && *self == Self::Classic4k)
    }
}

/// Build a sector trailer.
pub fn trailer(key_a: &Key, access: &[u8; 4], key_b: &Key) -> [u8; 16] {
    let mut t = [0u8; 16];
    t[..6].copy_from_slice(key_a);
    t[6..10].copy_from_slice(access);
    t[10..].copy_from_slice(key_b);
    t
}
