// libnfctag/src/protocol/t3t.rs
//! Type 3 Tag (FeliCa) frames.
//!
//! Frames start with a length byte covering the whole frame (SoD length),
//! followed by the command code, the IDm and the parameters. Service codes
//! are little-endian, the NDEF attribute block is big-endian.

use super::WireCommand;
use super::checksum::t3t_attr_checksum;
use super::parser::{self, Reader};
use crate::types::{BlockElement, Idm, ServiceCode, SystemCode};
use crate::{Error, Result};

pub const T3T_CMD_POLL: u8 = 0x00;
pub const T3T_CMD_CHECK: u8 = 0x06;
pub const T3T_CMD_UPDATE: u8 = 0x08;
pub const T3T_RSP_POLL: u8 = 0x01;
pub const T3T_RSP_CHECK: u8 = 0x07;
pub const T3T_RSP_UPDATE: u8 = 0x09;

pub const T3T_BLOCK_SIZE: usize = 16;

/// Largest frame the SoD length byte can describe.
pub const T3T_MAX_FRAME_LEN: usize = 0xFF;
/// Length byte, response code, IDm, both status flags and the block count
/// of a CHECK response.
const T3T_CHECK_RSP_HEADER_LEN: usize = 13;
/// Length byte, command code, IDm, one service and the block count of an
/// UPDATE request.
const T3T_UPDATE_HEADER_LEN: usize = 14;
/// Blocks one CHECK may request for its response to stay within
/// [`T3T_MAX_FRAME_LEN`].
pub const T3T_MAX_CHECK_BLOCKS: usize =
    (T3T_MAX_FRAME_LEN - T3T_CHECK_RSP_HEADER_LEN) / T3T_BLOCK_SIZE;

pub const T3T_NDEF_VERSION: u8 = 0x10;
pub const T3T_WRITEF_OFF: u8 = 0x00;
pub const T3T_WRITEF_ON: u8 = 0x0F;
pub const T3T_RWFLAG_RO: u8 = 0x00;
pub const T3T_RWFLAG_RW: u8 = 0x01;

/// FeliCa Lite memory configuration block.
pub const T3T_FELICA_LITE_MC_BLOCK: u16 = 0x88;
/// MC byte enabling the NDEF system code.
pub const T3T_MC_SYS_OP_OFFSET: usize = 3;
pub const T3T_MC_SYS_OP_NDEF: u8 = 0x01;
/// Number of user blocks of a FeliCa Lite.
pub const T3T_FELICA_LITE_USER_BLOCKS: u16 = 14;

/// FeliCa status flag 1 values.
pub const T3T_STATUS1_OK: u8 = 0x00;
pub const T3T_STATUS1_ERROR: u8 = 0x01;
pub const T3T_STATUS1_GENERAL: u8 = 0xFF;
/// FeliCa status flag 2 values.
pub const T3T_STATUS2_MEMORY: u8 = 0x70;
pub const T3T_STATUS2_ILLEGAL_NSVC: u8 = 0xA1;
pub const T3T_STATUS2_ILLEGAL_NBLK: u8 = 0xA2;
pub const T3T_STATUS2_ILLEGAL_BLOCK: u8 = 0xA8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum T3tCommand {
    Poll {
        system_code: SystemCode,
        request_code: u8,
        time_slot: u8,
    },
    Check {
        idm: Idm,
        services: Vec<ServiceCode>,
        blocks: Vec<BlockElement>,
    },
    Update {
        idm: Idm,
        services: Vec<ServiceCode>,
        blocks: Vec<BlockElement>,
        data: Vec<u8>,
    },
}

/// Blocks a single-service UPDATE ending at `last_block` can carry within
/// [`T3T_MAX_FRAME_LEN`].
pub fn max_update_blocks(last_block: u16) -> usize {
    let element = BlockElement::new(0, last_block).encode().len();
    (T3T_MAX_FRAME_LEN - T3T_UPDATE_HEADER_LEN) / (T3T_BLOCK_SIZE + element)
}

/// Store the frame length in the leading SoD byte.
fn seal(mut buf: Vec<u8>) -> Result<Vec<u8>> {
    buf[0] = u8::try_from(buf.len()).map_err(|_| Error::InvalidLength {
        expected: T3T_MAX_FRAME_LEN,
        actual: buf.len(),
    })?;
    Ok(buf)
}

fn push_service_and_blocks(buf: &mut Vec<u8>, services: &[ServiceCode], blocks: &[BlockElement]) {
    buf.push(services.len() as u8);
    for svc in services {
        buf.extend_from_slice(&svc.to_le_bytes());
    }
    buf.push(blocks.len() as u8);
    for blk in blocks {
        buf.extend_from_slice(&blk.encode());
    }
}

impl WireCommand for T3tCommand {
    fn opcode(&self) -> u8 {
        match self {
            Self::Poll { .. } => T3T_CMD_POLL,
            Self::Check { .. } => T3T_CMD_CHECK,
            Self::Update { .. } => T3T_CMD_UPDATE,
        }
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0x00, self.opcode()];
        match self {
            Self::Poll {
                system_code,
                request_code,
                time_slot,
            } => {
                buf.extend_from_slice(&system_code.to_be_bytes());
                buf.push(*request_code);
                buf.push(*time_slot);
            }
            Self::Check {
                idm,
                services,
                blocks,
            } => {
                buf.extend_from_slice(idm.as_bytes());
                push_service_and_blocks(&mut buf, services, blocks);
            }
            Self::Update {
                idm,
                services,
                blocks,
                data,
            } => {
                buf.extend_from_slice(idm.as_bytes());
                push_service_and_blocks(&mut buf, services, blocks);
                buf.extend_from_slice(data);
            }
        }
        seal(buf)
    }
}

/// Validate the SoD length, response code and IDm of a response, returning
/// the bytes following the IDm.
fn response_body<'a>(data: &'a [u8], code: u8, idm: &Idm) -> Result<&'a [u8]> {
    parser::ensure_len(data, 10)?;
    if data[0] as usize != data.len() {
        return Err(Error::InvalidLength {
            expected: data[0] as usize,
            actual: data.len(),
        });
    }
    parser::expect_response_code(&data[1..], code)?;
    if &data[2..10] != idm.as_bytes() {
        return Err(Error::Refused("response idm mismatch".into()));
    }
    Ok(&data[10..])
}

fn check_status(status1: u8, status2: u8) -> Result<()> {
    if status1 != T3T_STATUS1_OK {
        return Err(Error::FelicaStatus { status1, status2 });
    }
    Ok(())
}

/// Decode a CHECK response into the concatenated block data.
pub fn decode_check(data: &[u8], idm: &Idm, expected_blocks: usize) -> Result<Vec<u8>> {
    let body = response_body(data, T3T_RSP_CHECK, idm)?;
    let mut r = Reader::new(body);
    let status1 = r.u8()?;
    let status2 = r.u8()?;
    check_status(status1, status2)?;
    let nblk = r.u8()? as usize;
    if nblk != expected_blocks {
        return Err(Error::InvalidLength {
            expected: expected_blocks,
            actual: nblk,
        });
    }
    Ok(r.bytes(nblk * T3T_BLOCK_SIZE)?.to_vec())
}

/// Decode an UPDATE response.
pub fn decode_update(data: &[u8], idm: &Idm) -> Result<()> {
    let body = response_body(data, T3T_RSP_UPDATE, idm)?;
    let mut r = Reader::new(body);
    let status1 = r.u8()?;
    let status2 = r.u8()?;
    check_status(status1, status2)
}

/// Decode a POLL response into IDm and PMm.
pub fn decode_poll(data: &[u8]) -> Result<(Idm, [u8; 8])> {
    parser::ensure_len(data, 18)?;
    parser::expect_response_code(&data[1..], T3T_RSP_POLL)?;
    let idm = Idm::try_from(&data[2..10])?;
    let mut pmm = [0u8; 8];
    pmm.copy_from_slice(&data[10..18]);
    Ok((idm, pmm))
}

/// Build a CHECK/UPDATE response header; the caller appends block data.
pub fn encode_response(code: u8, idm: &Idm, status1: u8, status2: u8, payload: &[u8]) -> Result<Vec<u8>> {
    let mut buf = vec![0x00, code];
    buf.extend_from_slice(idm.as_bytes());
    buf.push(status1);
    buf.push(status2);
    buf.extend_from_slice(payload);
    seal(buf)
}

/// NDEF attribute information block (block 0 of the NDEF service).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdefAttributes {
    pub version: u8,
    /// Blocks readable with one CHECK.
    pub nbr: u8,
    /// Blocks writable with one UPDATE.
    pub nbw: u8,
    /// Blocks available for NDEF data.
    pub nmaxb: u16,
    pub writef: u8,
    pub rwflag: u8,
    /// Stored NDEF length.
    pub ln: u32,
}

impl NdefAttributes {
    pub fn decode(block: &[u8]) -> Result<Self> {
        parser::ensure_len(block, T3T_BLOCK_SIZE)?;
        let stored = parser::be_u16_at(block, 14)?;
        let computed = t3t_attr_checksum(block);
        if stored != computed {
            return Err(Error::ChecksumMismatch {
                expected: computed,
                actual: stored,
            });
        }
        let mut r = Reader::new(block);
        let version = r.u8()?;
        let nbr = r.u8()?;
        let nbw = r.u8()?;
        let nmaxb = r.be_u16()?;
        r.bytes(4)?;
        let writef = r.u8()?;
        let rwflag = r.u8()?;
        let ln = r.be_u24()?;
        Ok(Self {
            version,
            nbr,
            nbw,
            nmaxb,
            writef,
            rwflag,
            ln,
        })
    }

    pub fn encode(&self) -> [u8; 16] {
        let mut b = [0u8; 16];
        b[0] = self.version;
        b[1] = self.nbr;
        b[2] = self.nbw;
        b[3..5].copy_from_slice(&self.nmaxb.to_be_bytes());
        b[9] = self.writef;
        b[10] = self.rwflag;
        b[11..14].copy_from_slice(&self.ln.to_be_bytes()[1..]);
        let sum = t3t_attr_checksum(&b);
        b[14..16].copy_from_slice(&sum.to_be_bytes());
        b
    }

    pub fn capacity(&self) -> usize {
        self.nmaxb as usize * T3T_BLOCK_SIZE
    }

    pub fn is_read_only(&self) -> bool {
        self.rwflag != T3T_RWFLAG_RW
    }
}
