// libnfctag/src/tlv/scanner.rs

use log::{debug, warn};

use super::TlvType;
use super::lock::{LockControlTlv, MemoryControlTlv};
use crate::constants::{TLV_CONTROL_VALUE_LEN, TLV_LONG_LENGTH_MARKER, TLV_LONG_LENGTH_MAX};
use crate::{Error, Result};

/// Location and length of an NDEF TLV found on the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdefTlv {
    /// Offset of the TLV type byte.
    pub header_offset: usize,
    /// Offset of the first length byte.
    pub length_offset: usize,
    /// Offset of the last length byte; the value starts at the next data byte.
    pub last_length_offset: usize,
    /// 1 or 3.
    pub length_field_size: usize,
    pub msg_len: usize,
}

/// Outcome of feeding one byte to the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEvent {
    NeedMore,
    LockControl(LockControlTlv),
    MemoryControl(MemoryControlTlv),
    Ndef(NdefTlv),
    /// Terminator TLV reached before any NDEF TLV.
    Terminator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    WaitTlvDetect,
    WaitFindLenFieldLen {
        tlv: TlvType,
        header: usize,
    },
    WaitReadTlvLen0 {
        tlv: TlvType,
        header: usize,
        length_offset: usize,
    },
    WaitReadTlvLen1 {
        tlv: TlvType,
        header: usize,
        length_offset: usize,
        hi: u8,
    },
    WaitReadTlvValue {
        tlv: TlvType,
        remaining: usize,
        value: Vec<u8>,
    },
    Done,
}

/// Incremental TLV scanner.
///
/// The tag image arrives one read response at a time, so the scanner is
/// fed byte by byte with the logical offset of each byte. The caller only
/// feeds data bytes: lock and reserved bytes are filtered out with the
/// memory map before they reach the scanner.
#[derive(Debug, Clone)]
pub struct TlvScanner {
    state: State,
}

impl Default for TlvScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl TlvScanner {
    pub fn new() -> Self {
        Self {
            state: State::WaitTlvDetect,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Feed the data byte found at `offset`.
    pub fn feed(&mut self, offset: usize, byte: u8) -> Result<ScanEvent> {
        let state = std::mem::replace(&mut self.state, State::Done);
        let (next, event) = match state {
            State::Done => (State::Done, ScanEvent::NeedMore),
            State::WaitTlvDetect => match TlvType::try_from(byte) {
                Ok(TlvType::Null) => (State::WaitTlvDetect, ScanEvent::NeedMore),
                Ok(TlvType::Terminator) => {
                    debug!("terminator tlv at {}", offset);
                    (State::Done, ScanEvent::Terminator)
                }
                Ok(tlv) => (
                    State::WaitFindLenFieldLen {
                        tlv,
                        header: offset,
                    },
                    ScanEvent::NeedMore,
                ),
                Err(e) => {
                    warn!("invalid tlv type {:#04x} at {}", byte, offset);
                    return Err(e);
                }
            },
            State::WaitFindLenFieldLen { tlv, header } => {
                if byte == TLV_LONG_LENGTH_MARKER {
                    (
                        State::WaitReadTlvLen0 {
                            tlv,
                            header,
                            length_offset: offset,
                        },
                        ScanEvent::NeedMore,
                    )
                } else {
                    self.length_known(tlv, header, offset, offset, 1, byte as usize)?
                }
            }
            State::WaitReadTlvLen0 {
                tlv,
                header,
                length_offset,
            } => (
                State::WaitReadTlvLen1 {
                    tlv,
                    header,
                    length_offset,
                    hi: byte,
                },
                ScanEvent::NeedMore,
            ),
            State::WaitReadTlvLen1 {
                tlv,
                header,
                length_offset,
                hi,
            } => {
                let len = u16::from_be_bytes([hi, byte]) as usize;
                if len > TLV_LONG_LENGTH_MAX {
                    return Err(Error::MalformedTlv(format!(
                        "reserved tlv length {:#06x} at {}",
                        len, length_offset
                    )));
                }
                self.length_known(tlv, header, length_offset, offset, 3, len)?
            }
            State::WaitReadTlvValue {
                tlv,
                remaining,
                mut value,
            } => {
                if tlv != TlvType::Proprietary {
                    value.push(byte);
                }
                if remaining > 1 {
                    (
                        State::WaitReadTlvValue {
                            tlv,
                            remaining: remaining - 1,
                            value,
                        },
                        ScanEvent::NeedMore,
                    )
                } else {
                    (State::WaitTlvDetect, Self::value_complete(tlv, &value)?)
                }
            }
        };
        self.state = next;
        Ok(event)
    }

    fn length_known(
        &mut self,
        tlv: TlvType,
        header: usize,
        length_offset: usize,
        last_length_offset: usize,
        length_field_size: usize,
        len: usize,
    ) -> Result<(State, ScanEvent)> {
        match tlv {
            TlvType::Ndef => {
                let found = NdefTlv {
                    header_offset: header,
                    length_offset,
                    last_length_offset,
                    length_field_size,
                    msg_len: len,
                };
                debug!("ndef tlv at {} len {}", header, len);
                Ok((State::Done, ScanEvent::Ndef(found)))
            }
            TlvType::LockControl | TlvType::MemoryControl => {
                if length_field_size != 1 || len != TLV_CONTROL_VALUE_LEN {
                    return Err(Error::MalformedTlv(format!(
                        "control tlv at {} has length {}",
                        header, len
                    )));
                }
                Ok((
                    State::WaitReadTlvValue {
                        tlv,
                        remaining: len,
                        value: Vec::with_capacity(len),
                    },
                    ScanEvent::NeedMore,
                ))
            }
            _ if len == 0 => Ok((State::WaitTlvDetect, ScanEvent::NeedMore)),
            _ => Ok((
                State::WaitReadTlvValue {
                    tlv,
                    remaining: len,
                    value: Vec::new(),
                },
                ScanEvent::NeedMore,
            )),
        }
    }

    fn value_complete(tlv: TlvType, value: &[u8]) -> Result<ScanEvent> {
        match tlv {
            TlvType::LockControl => Ok(ScanEvent::LockControl(LockControlTlv::from_value(value)?)),
            TlvType::MemoryControl => Ok(ScanEvent::MemoryControl(
                MemoryControlTlv::from_value(value)?,
            )),
            _ => Ok(ScanEvent::NeedMore),
        }
    }

    /// Called when the end of tag memory is reached.
    pub fn finish(&self) -> Result<()> {
        if self.is_done() {
            Ok(())
        } else {
            Err(Error::NdefNotFound)
        }
    }
}
