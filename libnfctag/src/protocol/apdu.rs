// libnfctag/src/protocol/apdu.rs
//! ISO 7816-4 APDUs used by the Type 4 Tag mapping.

use super::WireCommand;
use super::parser::{self, Reader};
use crate::{Error, Result};

pub const T4T_CLA: u8 = 0x00;
pub const T4T_INS_SELECT: u8 = 0xA4;
pub const T4T_INS_READ_BINARY: u8 = 0xB0;
pub const T4T_INS_UPDATE_BINARY: u8 = 0xD6;

/// SELECT by DF name.
pub const T4T_P1_SELECT_BY_NAME: u8 = 0x04;
/// SELECT by file identifier.
pub const T4T_P1_SELECT_BY_FILE_ID: u8 = 0x00;
/// First or only occurrence, no response data (mapping version 2.0).
pub const T4T_P2_SELECT_FIRST_NO_FCI: u8 = 0x0C;

/// NDEF Tag Application, mapping version 2.0.
pub const T4T_AID_V2: [u8; 7] = [0xD2, 0x76, 0x00, 0x00, 0x85, 0x01, 0x01];
/// NDEF Tag Application, mapping version 1.0.
pub const T4T_AID_V1: [u8; 7] = [0xD2, 0x76, 0x00, 0x00, 0x85, 0x01, 0x00];

pub const T4T_CC_FILE_ID: u16 = 0xE103;
pub const T4T_DEFAULT_NDEF_FILE_ID: u16 = 0xE104;

pub const T4T_SW_OK: u16 = 0x9000;
pub const T4T_SW_WRONG_LENGTH: u16 = 0x6700;
pub const T4T_SW_SECURITY: u16 = 0x6982;
pub const T4T_SW_NOT_ALLOWED: u16 = 0x6986;
pub const T4T_SW_FILE_NOT_FOUND: u16 = 0x6A82;
pub const T4T_SW_WRONG_P1P2: u16 = 0x6B00;
pub const T4T_SW_INS_NOT_SUPPORTED: u16 = 0x6D00;
pub const T4T_SW_CLA_NOT_SUPPORTED: u16 = 0x6E00;

/// Capability container constants.
pub const T4T_CC_MIN_LEN: u16 = 0x000F;
pub const T4T_CC_READ_LEN: u8 = 0x0F;
pub const T4T_CC_WRITE_ACCESS_OFFSET: u16 = 14;
pub const T4T_MIN_MAX_LE: u16 = 0x000F;
pub const T4T_MIN_MAX_LC: u16 = 0x0001;
pub const T4T_NDEF_FILE_CONTROL_TLV: u8 = 0x04;
pub const T4T_NDEF_FILE_CONTROL_LEN: u8 = 0x06;
pub const T4T_MIN_FILE_SIZE: u16 = 0x0005;
pub const T4T_MAX_FILE_SIZE: u16 = 0xFFFE;
pub const T4T_READ_ACCESS_GRANTED: u8 = 0x00;
pub const T4T_WRITE_ACCESS_GRANTED: u8 = 0x00;
pub const T4T_WRITE_ACCESS_PROPRIETARY: u8 = 0x80;
pub const T4T_NO_WRITE_ACCESS: u8 = 0xFF;
/// Size of the NLEN field in front of the NDEF message.
pub const T4T_NLEN_SIZE: usize = 2;
/// Largest offset a short READ/UPDATE BINARY can address.
pub const T4T_MAX_SHORT_OFFSET: usize = 0x7FFF;

/// File identifiers that can never be the NDEF file.
pub const T4T_RESERVED_FILE_IDS: [u16; 6] = [0x0000, 0xE102, 0xE103, 0x3F00, 0x3FFF, 0xFFFF];

/// Command APDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apdu {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
    /// Expected response length; `Some(0)` encodes Le = 0x00.
    pub le: Option<u8>,
}

impl Apdu {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(6 + self.data.len());
        buf.extend_from_slice(&[self.cla, self.ins, self.p1, self.p2]);
        if !self.data.is_empty() {
            buf.push(self.data.len() as u8);
            buf.extend_from_slice(&self.data);
        }
        if let Some(le) = self.le {
            buf.push(le);
        }
        buf
    }

    /// Parse a short command APDU (cases 1 to 4).
    pub fn decode(frame: &[u8]) -> Result<Self> {
        let mut r = Reader::new(frame);
        let cla = r.u8()?;
        let ins = r.u8()?;
        let p1 = r.u8()?;
        let p2 = r.u8()?;
        let (data, le) = match r.remaining() {
            0 => (Vec::new(), None),
            1 => (Vec::new(), Some(r.u8()?)),
            _ => {
                let lc = r.u8()? as usize;
                let data = r.bytes(lc)?.to_vec();
                let le = match r.remaining() {
                    0 => None,
                    1 => Some(r.u8()?),
                    n => {
                        return Err(Error::InvalidLength {
                            expected: lc + 6,
                            actual: lc + 5 + n,
                        });
                    }
                };
                (data, le)
            }
        };
        Ok(Self {
            cla,
            ins,
            p1,
            p2,
            data,
            le,
        })
    }

    /// Offset carried in P1/P2 by READ and UPDATE BINARY.
    pub fn offset(&self) -> usize {
        u16::from_be_bytes([self.p1 & 0x7F, self.p2]) as usize
    }
}

/// Response APDU: data followed by SW1 SW2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse<'a> {
    pub data: &'a [u8],
    pub sw: u16,
}

impl<'a> ApduResponse<'a> {
    pub fn decode(frame: &'a [u8]) -> Result<Self> {
        parser::ensure_len(frame, 2)?;
        let split = frame.len() - 2;
        Ok(Self {
            data: &frame[..split],
            sw: parser::be_u16_at(frame, split)?,
        })
    }

    /// Fail unless the status word is 9000.
    pub fn ok(self) -> Result<&'a [u8]> {
        if self.sw != T4T_SW_OK {
            return Err(Error::StatusWord(self.sw));
        }
        Ok(self.data)
    }

    /// Build a response frame.
    pub fn encode(data: &[u8], sw: u16) -> Vec<u8> {
        let mut v = data.to_vec();
        v.extend_from_slice(&sw.to_be_bytes());
        v
    }
}

/// T4T mapping version selected by the application SELECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum T4tVersion {
    V1,
    V2,
}

impl T4tVersion {
    pub fn major(&self) -> u8 {
        match self {
            T4tVersion::V1 => 1,
            T4tVersion::V2 => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum T4tCommand {
    SelectApp(T4tVersion),
    SelectFile { version: T4tVersion, file_id: u16 },
    ReadBinary { offset: u16, le: u8 },
    UpdateBinary { offset: u16, data: Vec<u8> },
    /// Empty I-block used as presence check.
    Empty,
}

impl T4tCommand {
    pub fn apdu(&self) -> Option<Apdu> {
        let apdu = match self {
            Self::SelectApp(version) => Apdu {
                cla: T4T_CLA,
                ins: T4T_INS_SELECT,
                p1: T4T_P1_SELECT_BY_NAME,
                p2: 0x00,
                data: match version {
                    T4tVersion::V2 => T4T_AID_V2.to_vec(),
                    T4tVersion::V1 => T4T_AID_V1.to_vec(),
                },
                le: match version {
                    T4tVersion::V2 => Some(0x00),
                    T4tVersion::V1 => None,
                },
            },
            Self::SelectFile { version, file_id } => Apdu {
                cla: T4T_CLA,
                ins: T4T_INS_SELECT,
                p1: T4T_P1_SELECT_BY_FILE_ID,
                p2: match version {
                    T4tVersion::V2 => T4T_P2_SELECT_FIRST_NO_FCI,
                    T4tVersion::V1 => 0x00,
                },
                data: file_id.to_be_bytes().to_vec(),
                le: None,
            },
            Self::ReadBinary { offset, le } => {
                let [p1, p2] = offset.to_be_bytes();
                Apdu {
                    cla: T4T_CLA,
                    ins: T4T_INS_READ_BINARY,
                    p1,
                    p2,
                    data: Vec::new(),
                    le: Some(*le),
                }
            }
            Self::UpdateBinary { offset, data } => {
                let [p1, p2] = offset.to_be_bytes();
                Apdu {
                    cla: T4T_CLA,
                    ins: T4T_INS_UPDATE_BINARY,
                    p1,
                    p2,
                    data: data.clone(),
                    le: None,
                }
            }
            Self::Empty => return None,
        };
        Some(apdu)
    }
}

impl WireCommand for T4tCommand {
    fn opcode(&self) -> u8 {
        self.apdu().map(|a| a.ins).unwrap_or(0)
    }

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(self.apdu().map(|a| a.encode()).unwrap_or_default())
    }
}

/// NDEF File Control TLV of the capability container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdefFileControl {
    pub file_id: u16,
    pub max_file_size: u16,
    pub read_access: u8,
    pub write_access: u8,
}

/// Capability container file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct T4tCc {
    pub cc_len: u16,
    pub version: u8,
    pub max_le: u16,
    pub max_lc: u16,
    pub ndef_fc: NdefFileControl,
}

impl T4tCc {
    /// Parse and validate a CC read from a tag running `version`.
    pub fn parse(data: &[u8], version: T4tVersion) -> Result<Self> {
        let mut r = Reader::new(data);
        let cc_len = r.be_u16()?;
        let cc_version = r.u8()?;
        let max_le = r.be_u16()?;
        let max_lc = r.be_u16()?;
        let tlv_type = r.u8()?;
        let tlv_len = r.u8()?;
        if tlv_type != T4T_NDEF_FILE_CONTROL_TLV || tlv_len != T4T_NDEF_FILE_CONTROL_LEN {
            return Err(Error::InvalidCc(format!(
                "ndef file control tlv {:#04x}/{:#04x}",
                tlv_type, tlv_len
            )));
        }
        let file_id = r.be_u16()?;
        let max_file_size = r.be_u16()?;
        let read_access = r.u8()?;
        let write_access = r.u8()?;

        let cc = Self {
            cc_len,
            version: cc_version,
            max_le,
            max_lc,
            ndef_fc: NdefFileControl {
                file_id,
                max_file_size,
                read_access,
                write_access,
            },
        };
        cc.validate(version)?;
        Ok(cc)
    }

    pub fn validate(&self, version: T4tVersion) -> Result<()> {
        let fc = &self.ndef_fc;
        if self.cc_len < T4T_CC_MIN_LEN {
            return Err(Error::InvalidCc(format!("cc length {:#06x}", self.cc_len)));
        }
        if self.version >> 4 != version.major() {
            return Err(Error::InvalidCc(format!(
                "mapping version {:#04x} does not match application v{}",
                self.version,
                version.major()
            )));
        }
        if self.max_le < T4T_MIN_MAX_LE {
            return Err(Error::InvalidCc(format!("MaxLe {:#06x}", self.max_le)));
        }
        if self.max_lc < T4T_MIN_MAX_LC {
            return Err(Error::InvalidCc(format!("MaxLc {:#06x}", self.max_lc)));
        }
        if T4T_RESERVED_FILE_IDS.contains(&fc.file_id) {
            return Err(Error::InvalidCc(format!("reserved file id {:#06x}", fc.file_id)));
        }
        if fc.max_file_size < T4T_MIN_FILE_SIZE || fc.max_file_size > T4T_MAX_FILE_SIZE {
            return Err(Error::InvalidCc(format!(
                "max ndef file size {:#06x}",
                fc.max_file_size
            )));
        }
        if fc.read_access != T4T_READ_ACCESS_GRANTED {
            return Err(Error::InvalidCc(format!("read access {:#04x}", fc.read_access)));
        }
        if fc.write_access != T4T_WRITE_ACCESS_GRANTED
            && fc.write_access < T4T_WRITE_ACCESS_PROPRIETARY
        {
            return Err(Error::InvalidCc(format!("write access {:#04x}", fc.write_access)));
        }
        Ok(())
    }

    pub fn encode(&self) -> Vec<u8> {
        let fc = &self.ndef_fc;
        let mut v = Vec::with_capacity(15);
        v.extend_from_slice(&self.cc_len.to_be_bytes());
        v.push(self.version);
        v.extend_from_slice(&self.max_le.to_be_bytes());
        v.extend_from_slice(&self.max_lc.to_be_bytes());
        v.push(T4T_NDEF_FILE_CONTROL_TLV);
        v.push(T4T_NDEF_FILE_CONTROL_LEN);
        v.extend_from_slice(&fc.file_id.to_be_bytes());
        v.extend_from_slice(&fc.max_file_size.to_be_bytes());
        v.push(fc.read_access);
        v.push(fc.write_access);
        v
    }

    pub fn is_read_only(&self) -> bool {
        self.ndef_fc.write_access != T4T_WRITE_ACCESS_GRANTED
    }
}
