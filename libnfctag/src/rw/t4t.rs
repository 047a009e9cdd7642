// libnfctag/src/rw/t4t.rs
//! Type 4 Tag reader/writer (ISO-DEP APDUs).
//!
//! Detection selects the NDEF application (mapping 2.0 first, 1.0 as
//! fallback), reads and validates the capability container, selects the
//! NDEF file and reads NLEN. Updates zero NLEN before writing the message
//! and store the real length last.

use std::mem;

use log::{debug, info, warn};

use super::{NdefInfo, RwCtx, RwEvent, RwState, TagHandler};
use crate::config::T4tPresenceCheck;
use crate::protocol::apdu::{
    T4T_CC_FILE_ID, T4T_CC_READ_LEN, T4T_CC_WRITE_ACCESS_OFFSET, T4T_MAX_SHORT_OFFSET,
    T4T_NLEN_SIZE, T4T_NO_WRITE_ACCESS, T4tCc, T4tVersion,
};
use crate::protocol::parser;
use crate::protocol::{ApduResponse, T4tCommand};
use crate::types::{NdefFlags, Status, TagProtocol};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    None,
    SelectApp(T4tVersion),
    SelectCc,
    ReadCc,
    SelectNdef,
    ReadNlen,
    ReadData,
    ClearNlen,
    WriteData,
    WriteNlen,
    LockSelectCc,
    LockWriteAccess,
    LockSelectNdef,
    Presence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selected {
    None,
    Cc,
    Ndef,
}

pub struct T4t {
    state: RwState,
    phase: Phase,
    version: T4tVersion,
    selected: Selected,
    cc: Option<T4tCc>,
    detected: bool,
    nlen: usize,
    flags: NdefFlags,
    /// Message being read or written.
    buf: Vec<u8>,
    /// File offset of the next transfer.
    offset: usize,
}

impl Default for T4t {
    fn default() -> Self {
        Self::new()
    }
}

impl T4t {
    pub fn new() -> Self {
        Self {
            state: RwState::Idle,
            phase: Phase::None,
            version: T4tVersion::V2,
            selected: Selected::None,
            cc: None,
            detected: false,
            nlen: 0,
            flags: NdefFlags::NONE,
            buf: Vec::new(),
            offset: 0,
        }
    }

    fn ensure_ndef_selected(&self) -> Result<()> {
        if !self.detected {
            return Err(Error::NotInitialized);
        }
        if self.selected != Selected::Ndef {
            return Err(Error::Refused("ndef file is not selected".into()));
        }
        Ok(())
    }

    /// Capability container read by the last detection.
    pub fn cc(&self) -> Option<&T4tCc> {
        self.cc.as_ref()
    }

    fn send(&mut self, ctx: &mut RwCtx<'_>, cmd: T4tCommand) -> Result<()> {
        let timeout = ctx.config.t4t_timeout_ms;
        ctx.send(cmd, timeout)
    }

    fn select_file(&mut self, ctx: &mut RwCtx<'_>, file_id: u16) -> Result<()> {
        let version = self.version;
        self.send(ctx, T4tCommand::SelectFile { version, file_id })
    }

    fn ndef_file_id(&self) -> Result<u16> {
        self.cc
            .map(|cc| cc.ndef_fc.file_id)
            .ok_or(Error::NotInitialized)
    }

    fn max_ndef_len(&self) -> usize {
        self.cc
            .map(|cc| cc.ndef_fc.max_file_size as usize - T4T_NLEN_SIZE)
            .unwrap_or(0)
    }

    /// Largest READ BINARY payload.
    fn read_chunk(&self, ctx: &RwCtx<'_>) -> usize {
        let max_le = self.cc.map(|cc| cc.max_le as usize).unwrap_or(0);
        max_le.min(ctx.config.t4t_max_transfer).min(0xFF)
    }

    /// Largest UPDATE BINARY payload.
    fn write_chunk(&self, ctx: &RwCtx<'_>) -> usize {
        let max_lc = self.cc.map(|cc| cc.max_lc as usize).unwrap_or(0);
        max_lc.min(ctx.config.t4t_max_transfer).min(0xFF)
    }

    fn on_select_app(&mut self, ctx: &mut RwCtx<'_>, version: T4tVersion, rsp: &[u8]) -> Result<()> {
        match ApduResponse::decode(rsp)?.ok() {
            Ok(_) => {
                debug!("t4t ndef application v{} selected", version.major());
                self.version = version;
                self.phase = Phase::SelectCc;
                self.select_file(ctx, T4T_CC_FILE_ID)
            }
            Err(Error::StatusWord(sw)) if version == T4tVersion::V2 => {
                debug!("t4t v2 application rejected ({:#06x}), trying v1", sw);
                self.phase = Phase::SelectApp(T4tVersion::V1);
                self.send(ctx, T4tCommand::SelectApp(T4tVersion::V1))
            }
            Err(e) => Err(e),
        }
    }

    fn read_next(&mut self, ctx: &mut RwCtx<'_>) -> Result<()> {
        let done = self.buf.len();
        if done >= self.nlen {
            let msg = mem::take(&mut self.buf);
            self.complete(ctx, RwEvent::NdefReadComplete(msg));
            return Ok(());
        }
        if self.offset > T4T_MAX_SHORT_OFFSET {
            return Err(Error::NotSupported(format!(
                "t4t read offset {:#06x} needs extended addressing",
                self.offset
            )));
        }
        let le = (self.nlen - done).min(self.read_chunk(ctx));
        if le == 0 {
            return Err(Error::Refused("t4t MaxLe is zero".into()));
        }
        self.phase = Phase::ReadData;
        let offset = self.offset as u16;
        self.send(ctx, T4tCommand::ReadBinary { offset, le: le as u8 })
    }

    fn write_next(&mut self, ctx: &mut RwCtx<'_>) -> Result<()> {
        let written = self.offset - T4T_NLEN_SIZE;
        if written >= self.buf.len() {
            self.phase = Phase::WriteNlen;
            let data = (self.buf.len() as u16).to_be_bytes().to_vec();
            return self.send(ctx, T4tCommand::UpdateBinary { offset: 0, data });
        }
        if self.offset > T4T_MAX_SHORT_OFFSET {
            return Err(Error::NotSupported(format!(
                "t4t write offset {:#06x} needs extended addressing",
                self.offset
            )));
        }
        let chunk = (self.buf.len() - written).min(self.write_chunk(ctx));
        if chunk == 0 {
            return Err(Error::Refused("t4t MaxLc is zero".into()));
        }
        let data = self.buf[written..written + chunk].to_vec();
        self.phase = Phase::WriteData;
        let offset = self.offset as u16;
        self.offset += chunk;
        self.send(ctx, T4tCommand::UpdateBinary { offset, data })
    }
}

impl TagHandler for T4t {
    fn protocol(&self) -> TagProtocol {
        TagProtocol::T4t
    }

    fn state(&self) -> RwState {
        self.state
    }

    fn set_state(&mut self, state: RwState) {
        self.state = state;
    }

    fn detect_ndef(&mut self, ctx: &mut RwCtx<'_>) -> Result<()> {
        self.detected = false;
        self.cc = None;
        self.flags = NdefFlags::NONE;
        self.selected = Selected::None;
        self.state = RwState::DetectNdef;
        self.phase = Phase::SelectApp(T4tVersion::V2);
        self.send(ctx, T4tCommand::SelectApp(T4tVersion::V2))
    }

    fn read_ndef(&mut self, ctx: &mut RwCtx<'_>, max_len: usize) -> Result<()> {
        self.ensure_ndef_selected()?;
        if self.nlen > max_len {
            return Err(Error::Refused(format!(
                "ndef message of {} bytes exceeds buffer of {}",
                self.nlen, max_len
            )));
        }
        self.state = RwState::ReadNdef;
        self.buf = Vec::with_capacity(self.nlen);
        self.offset = T4T_NLEN_SIZE;
        self.read_next(ctx)
    }

    fn write_ndef(&mut self, ctx: &mut RwCtx<'_>, msg: &[u8]) -> Result<()> {
        self.ensure_ndef_selected()?;
        if self.flags.contains(NdefFlags::READ_ONLY) {
            return Err(Error::Refused("tag is read only".into()));
        }
        if msg.len() > self.max_ndef_len() {
            return Err(Error::Refused(format!(
                "ndef message of {} bytes exceeds capacity of {}",
                msg.len(),
                self.max_ndef_len()
            )));
        }
        self.buf = msg.to_vec();
        self.offset = T4T_NLEN_SIZE;
        self.state = RwState::WriteNdef;
        self.phase = Phase::ClearNlen;
        self.send(
            ctx,
            T4tCommand::UpdateBinary {
                offset: 0,
                data: vec![0x00, 0x00],
            },
        )
    }

    fn set_read_only(&mut self, ctx: &mut RwCtx<'_>, hard_lock: bool) -> Result<()> {
        if !self.detected {
            return Err(Error::NotInitialized);
        }
        if hard_lock {
            debug!("t4t has no hard lock, setting the cc write access only");
        }
        self.state = RwState::SetReadOnly;
        self.phase = Phase::LockSelectCc;
        self.select_file(ctx, T4T_CC_FILE_ID)
    }

    fn presence_check(&mut self, ctx: &mut RwCtx<'_>) -> Result<()> {
        self.state = RwState::PresenceCheck;
        self.phase = Phase::Presence;
        let cmd = match ctx.config.t4t_presence_check {
            T4tPresenceCheck::ReadBinary => T4tCommand::ReadBinary { offset: 0, le: 1 },
            T4tPresenceCheck::EmptyFrame => T4tCommand::Empty,
        };
        let timeout = ctx.config.presence_check_timeout_ms;
        ctx.send(cmd, timeout)
    }

    fn on_response(&mut self, ctx: &mut RwCtx<'_>, rsp: &[u8]) -> Result<()> {
        let phase = mem::replace(&mut self.phase, Phase::None);
        if phase == Phase::Presence {
            debug!("t4t presence answered with {} bytes", rsp.len());
            self.complete(ctx, RwEvent::PresenceCheck(Status::Ok));
            return Ok(());
        }
        if let Phase::SelectApp(version) = phase {
            return self.on_select_app(ctx, version, rsp);
        }

        let data = ApduResponse::decode(rsp)?.ok()?;
        match phase {
            Phase::None | Phase::SelectApp(_) | Phase::Presence => {
                Err(Error::Refused("unexpected t4t response".into()))
            }
            Phase::SelectCc => {
                self.selected = Selected::Cc;
                self.phase = Phase::ReadCc;
                self.send(
                    ctx,
                    T4tCommand::ReadBinary {
                        offset: 0,
                        le: T4T_CC_READ_LEN,
                    },
                )
            }
            Phase::ReadCc => {
                let mut cc = T4tCc::parse(data, self.version)?;
                debug!("t4t cc {:?}", cc);
                // READ/UPDATE BINARY offsets stop at 0x7FFF
                let reachable = (T4T_MAX_SHORT_OFFSET + 1) as u16;
                if cc.ndef_fc.max_file_size > reachable {
                    warn!(
                        "t4t: ndef file of {} bytes, using the first {}",
                        cc.ndef_fc.max_file_size, reachable
                    );
                    cc.ndef_fc.max_file_size = reachable;
                }
                self.cc = Some(cc);
                self.phase = Phase::SelectNdef;
                self.select_file(ctx, cc.ndef_fc.file_id)
            }
            Phase::SelectNdef => {
                self.selected = Selected::Ndef;
                self.phase = Phase::ReadNlen;
                self.send(
                    ctx,
                    T4tCommand::ReadBinary {
                        offset: 0,
                        le: T4T_NLEN_SIZE as u8,
                    },
                )
            }
            Phase::ReadNlen => {
                let nlen = parser::be_u16_at(data, 0)? as usize;
                let max = self.max_ndef_len();
                if nlen > max {
                    return Err(Error::InvalidLength {
                        expected: max,
                        actual: nlen,
                    });
                }
                let cc = self.cc.ok_or(Error::NotInitialized)?;
                let mut flags = NdefFlags::SUPPORTED | NdefFlags::FORMATED;
                if cc.is_read_only() {
                    flags |= NdefFlags::READ_ONLY;
                } else {
                    flags |= NdefFlags::SOFT_LOCKABLE;
                }
                self.nlen = nlen;
                self.flags = flags;
                self.detected = true;
                info!("t4t ndef detected: {} of {} bytes", nlen, max);
                self.complete(
                    ctx,
                    RwEvent::NdefDetect(NdefInfo {
                        status: Status::Ok,
                        protocol: TagProtocol::T4t,
                        cur_size: nlen,
                        max_size: max,
                        flags,
                    }),
                );
                Ok(())
            }
            Phase::ReadData => {
                if data.is_empty() {
                    return Err(Error::InvalidLength {
                        expected: 1,
                        actual: 0,
                    });
                }
                let take = data.len().min(self.nlen - self.buf.len());
                self.buf.extend_from_slice(&data[..take]);
                self.offset += data.len();
                self.read_next(ctx)
            }
            Phase::ClearNlen => {
                if self.buf.is_empty() {
                    self.nlen = 0;
                    self.complete(ctx, RwEvent::NdefUpdateComplete);
                    return Ok(());
                }
                self.write_next(ctx)
            }
            Phase::WriteData => self.write_next(ctx),
            Phase::WriteNlen => {
                self.nlen = self.buf.len();
                info!("t4t ndef updated: {} bytes", self.nlen);
                self.complete(ctx, RwEvent::NdefUpdateComplete);
                Ok(())
            }
            Phase::LockSelectCc => {
                self.selected = Selected::Cc;
                self.phase = Phase::LockWriteAccess;
                self.send(
                    ctx,
                    T4tCommand::UpdateBinary {
                        offset: T4T_CC_WRITE_ACCESS_OFFSET,
                        data: vec![T4T_NO_WRITE_ACCESS],
                    },
                )
            }
            Phase::LockWriteAccess => {
                if let Some(cc) = self.cc.as_mut() {
                    cc.ndef_fc.write_access = T4T_NO_WRITE_ACCESS;
                }
                self.phase = Phase::LockSelectNdef;
                let file_id = self.ndef_file_id()?;
                self.select_file(ctx, file_id)
            }
            Phase::LockSelectNdef => {
                self.selected = Selected::Ndef;
                self.flags |= NdefFlags::READ_ONLY;
                self.flags.remove(NdefFlags::SOFT_LOCKABLE);
                self.complete(ctx, RwEvent::SetReadOnly(Status::Ok));
                Ok(())
            }
        }
    }

    fn reset_op(&mut self) {
        self.phase = Phase::None;
        if self.state != RwState::ReadNdef {
            self.buf.clear();
        }
    }
}
