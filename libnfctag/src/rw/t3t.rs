// libnfctag/src/rw/t3t.rs
//! Type 3 Tag reader/writer.
//!
//! The NDEF attribute block (block 0 of the NDEF service) carries
//! everything: CHECK/UPDATE chunk sizes, capacity, the write-in-progress
//! flag and the message length. Updates raise WriteF before touching data
//! blocks and lower it together with the new length.

use std::mem;

use log::{debug, info, warn};

use super::{NdefInfo, RwCtx, RwEvent, RwState, TagHandler};
use crate::protocol::t3t::{
    self, T3T_BLOCK_SIZE, T3T_FELICA_LITE_MC_BLOCK, T3T_MAX_CHECK_BLOCKS, T3T_FELICA_LITE_USER_BLOCKS,
    T3T_MC_SYS_OP_NDEF, T3T_MC_SYS_OP_OFFSET, T3T_NDEF_VERSION, T3T_RWFLAG_RO, T3T_RWFLAG_RW,
    T3T_WRITEF_OFF, T3T_WRITEF_ON,
};
use crate::protocol::{NdefAttributes, T3tCommand};
use crate::types::{BlockElement, Idm, NdefFlags, Pmm, ServiceCode, Status, SystemCode, TagProtocol};
use crate::{Error, Result};

const ATTR_BLOCK: u16 = 0;
/// Memory configuration bytes cleared by a hard lock (user block write
/// permissions and the MC write permission).
const MC_LOCK_BYTES: std::ops::Range<usize> = 0..3;

/// Attribute block written by FormatNDef on a FeliCa Lite.
const DEFAULT_ATTRIBUTES: NdefAttributes = NdefAttributes {
    version: T3T_NDEF_VERSION,
    nbr: 4,
    nbw: 1,
    nmaxb: T3T_FELICA_LITE_USER_BLOCKS - 1,
    writef: T3T_WRITEF_OFF,
    rwflag: T3T_RWFLAG_RW,
    ln: 0,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    None,
    DetectAttr,
    ReadData { count: u16 },
    WriteStart,
    WriteData { count: u16 },
    WriteEnd,
    LockAttr,
    LockReadMc,
    LockWriteMc,
    FormatReadMc,
    FormatWriteMc,
    FormatWriteAttr,
    Presence,
}

pub struct T3t {
    idm: Idm,
    pmm: Pmm,
    system_code: SystemCode,
    state: RwState,
    phase: Phase,
    attr: Option<NdefAttributes>,
    flags: NdefFlags,
    /// Next NDEF data block to transfer.
    next_block: u16,
    buf: Vec<u8>,
    /// Zero bytes padding the message being written to a block boundary.
    pad: usize,
    hard_lock: bool,
}

impl T3t {
    pub fn new(idm: Idm, pmm: Pmm, system_code: SystemCode) -> Self {
        Self {
            idm,
            pmm,
            system_code,
            state: RwState::Idle,
            phase: Phase::None,
            attr: None,
            flags: NdefFlags::NONE,
            next_block: 1,
            buf: Vec::new(),
            pad: 0,
            hard_lock: false,
        }
    }

    pub fn idm(&self) -> &Idm {
        &self.idm
    }

    pub fn pmm(&self) -> &Pmm {
        &self.pmm
    }

    /// Attribute block read by the last detection.
    pub fn attributes(&self) -> Option<&NdefAttributes> {
        self.attr.as_ref()
    }

    fn check(&mut self, ctx: &mut RwCtx<'_>, first: u16, count: u16) -> Result<()> {
        let cmd = T3tCommand::Check {
            idm: self.idm,
            services: vec![ServiceCode::NDEF_RO],
            blocks: (first..first + count).map(|b| BlockElement::new(0, b)).collect(),
        };
        let timeout = ctx.config.t3t_timeout_ms;
        ctx.send(cmd, timeout)
    }

    fn update(&mut self, ctx: &mut RwCtx<'_>, first: u16, data: Vec<u8>) -> Result<()> {
        let count = (data.len() / T3T_BLOCK_SIZE) as u16;
        let cmd = T3tCommand::Update {
            idm: self.idm,
            services: vec![ServiceCode::NDEF_RW],
            blocks: (first..first + count).map(|b| BlockElement::new(0, b)).collect(),
            data,
        };
        let timeout = ctx.config.t3t_timeout_ms;
        ctx.send(cmd, timeout)
    }

    fn write_attr(&mut self, ctx: &mut RwCtx<'_>, attr: NdefAttributes) -> Result<()> {
        self.update(ctx, ATTR_BLOCK, attr.encode().to_vec())
    }

    fn on_attr(&mut self, ctx: &mut RwCtx<'_>, rsp: &[u8]) -> Result<()> {
        let block = t3t::decode_check(rsp, &self.idm, 1)?;
        let attr = NdefAttributes::decode(&block)?;
        if attr.version >> 4 != T3T_NDEF_VERSION >> 4 {
            return Err(Error::InvalidCc(format!("t3t mapping version {:#04x}", attr.version)));
        }
        if attr.writef == T3T_WRITEF_ON {
            warn!("t3t: previous NDEF update was interrupted");
        }
        let max_size = attr.capacity();
        let mut flags = NdefFlags::SUPPORTED | NdefFlags::FORMATED;
        if attr.is_read_only() {
            flags |= NdefFlags::READ_ONLY;
        } else {
            flags |= NdefFlags::SOFT_LOCKABLE | NdefFlags::HARD_LOCKABLE;
        }
        self.flags = flags;
        self.attr = Some(attr);
        info!("t3t ndef detected: {} of {} bytes", attr.ln, max_size);
        self.complete(
            ctx,
            RwEvent::NdefDetect(NdefInfo {
                status: Status::Ok,
                protocol: TagProtocol::T3t,
                cur_size: attr.ln as usize,
                max_size,
                flags,
            }),
        );
        Ok(())
    }

    fn read_next(&mut self, ctx: &mut RwCtx<'_>, attr: &NdefAttributes) -> Result<()> {
        let total = (attr.ln as usize).div_ceil(T3T_BLOCK_SIZE) as u16;
        let done = self.next_block - 1;
        if done >= total {
            let mut msg = mem::take(&mut self.buf);
            msg.truncate(attr.ln as usize);
            self.complete(ctx, RwEvent::NdefReadComplete(msg));
            return Ok(());
        }
        let nbr = (attr.nbr.max(1) as usize).min(T3T_MAX_CHECK_BLOCKS) as u16;
        let count = (total - done).min(nbr);
        self.phase = Phase::ReadData { count };
        let first = self.next_block;
        self.check(ctx, first, count)
    }

    fn write_next(&mut self, ctx: &mut RwCtx<'_>, attr: &NdefAttributes) -> Result<()> {
        let total = (self.buf.len() / T3T_BLOCK_SIZE) as u16;
        let done = self.next_block - 1;
        if done >= total {
            let mut end = *attr;
            end.writef = T3T_WRITEF_OFF;
            end.ln = self.msg_len() as u32;
            self.phase = Phase::WriteEnd;
            return self.write_attr(ctx, end);
        }
        let mut count = (total - done).min(attr.nbw.max(1) as u16);
        let fit = t3t::max_update_blocks(self.next_block + count - 1) as u16;
        if count > fit {
            debug!("t3t: {} blocks per UPDATE, Nbw {} exceeds the frame", fit, attr.nbw);
            count = fit;
        }
        let start = done as usize * T3T_BLOCK_SIZE;
        let data = self.buf[start..start + count as usize * T3T_BLOCK_SIZE].to_vec();
        self.phase = Phase::WriteData { count };
        let first = self.next_block;
        self.update(ctx, first, data)
    }

    /// Unpadded length of the message being written.
    fn msg_len(&self) -> usize {
        self.buf.len() - self.pad
    }
}

impl TagHandler for T3t {
    fn protocol(&self) -> TagProtocol {
        TagProtocol::T3t
    }

    fn state(&self) -> RwState {
        self.state
    }

    fn set_state(&mut self, state: RwState) {
        self.state = state;
    }

    fn detect_ndef(&mut self, ctx: &mut RwCtx<'_>) -> Result<()> {
        self.attr = None;
        self.flags = NdefFlags::NONE;
        if self.system_code != SystemCode::NDEF && self.system_code != SystemCode::ANY {
            debug!("t3t: system code {:#06x} is not NDEF", self.system_code.as_u16());
        }
        self.state = RwState::DetectNdef;
        self.phase = Phase::DetectAttr;
        self.check(ctx, ATTR_BLOCK, 1)
    }

    fn read_ndef(&mut self, ctx: &mut RwCtx<'_>, max_len: usize) -> Result<()> {
        let attr = self.attr.ok_or(Error::NotInitialized)?;
        if attr.ln as usize > max_len {
            return Err(Error::Refused(format!(
                "ndef message of {} bytes exceeds buffer of {}",
                attr.ln, max_len
            )));
        }
        self.state = RwState::ReadNdef;
        self.buf = Vec::with_capacity(attr.ln as usize);
        self.next_block = 1;
        self.read_next(ctx, &attr)
    }

    fn write_ndef(&mut self, ctx: &mut RwCtx<'_>, msg: &[u8]) -> Result<()> {
        let attr = self.attr.ok_or(Error::NotInitialized)?;
        if self.flags.contains(NdefFlags::READ_ONLY) {
            return Err(Error::Refused("tag is read only".into()));
        }
        if msg.len() > attr.capacity() {
            return Err(Error::Refused(format!(
                "ndef message of {} bytes exceeds capacity of {}",
                msg.len(),
                attr.capacity()
            )));
        }
        self.buf = msg.to_vec();
        self.pad = msg.len().next_multiple_of(T3T_BLOCK_SIZE) - msg.len();
        self.buf.resize(msg.len() + self.pad, 0);
        self.next_block = 1;

        let mut start = attr;
        start.writef = T3T_WRITEF_ON;
        self.state = RwState::WriteNdef;
        self.phase = Phase::WriteStart;
        self.write_attr(ctx, start)
    }

    fn set_read_only(&mut self, ctx: &mut RwCtx<'_>, hard_lock: bool) -> Result<()> {
        let attr = self.attr.ok_or(Error::NotInitialized)?;
        let mut locked = attr;
        locked.rwflag = T3T_RWFLAG_RO;
        self.hard_lock = hard_lock;
        self.state = RwState::SetReadOnly;
        self.phase = Phase::LockAttr;
        self.write_attr(ctx, locked)
    }

    fn format_ndef(&mut self, ctx: &mut RwCtx<'_>) -> Result<()> {
        self.state = RwState::Format;
        self.phase = Phase::FormatReadMc;
        self.check(ctx, T3T_FELICA_LITE_MC_BLOCK, 1)
    }

    fn presence_check(&mut self, ctx: &mut RwCtx<'_>) -> Result<()> {
        self.state = RwState::PresenceCheck;
        self.phase = Phase::Presence;
        let timeout = ctx.config.presence_check_timeout_ms;
        ctx.send(
            T3tCommand::Poll {
                system_code: self.system_code,
                request_code: 0,
                time_slot: 0,
            },
            timeout,
        )
    }

    fn on_response(&mut self, ctx: &mut RwCtx<'_>, rsp: &[u8]) -> Result<()> {
        match mem::replace(&mut self.phase, Phase::None) {
            Phase::None => Err(Error::Refused("unexpected t3t response".into())),
            Phase::DetectAttr => self.on_attr(ctx, rsp),
            Phase::ReadData { count } => {
                let attr = self.attr.ok_or(Error::NotInitialized)?;
                let data = t3t::decode_check(rsp, &self.idm, count as usize)?;
                self.buf.extend_from_slice(&data);
                self.next_block += count;
                self.read_next(ctx, &attr)
            }
            Phase::WriteStart => {
                t3t::decode_update(rsp, &self.idm)?;
                let attr = self.attr.ok_or(Error::NotInitialized)?;
                self.write_next(ctx, &attr)
            }
            Phase::WriteData { count } => {
                t3t::decode_update(rsp, &self.idm)?;
                self.next_block += count;
                let attr = self.attr.ok_or(Error::NotInitialized)?;
                self.write_next(ctx, &attr)
            }
            Phase::WriteEnd => {
                t3t::decode_update(rsp, &self.idm)?;
                let len = self.msg_len();
                if let Some(attr) = self.attr.as_mut() {
                    attr.ln = len as u32;
                    attr.writef = T3T_WRITEF_OFF;
                }
                info!("t3t ndef updated: {} bytes", len);
                self.complete(ctx, RwEvent::NdefUpdateComplete);
                Ok(())
            }
            Phase::LockAttr => {
                t3t::decode_update(rsp, &self.idm)?;
                if let Some(attr) = self.attr.as_mut() {
                    attr.rwflag = T3T_RWFLAG_RO;
                }
                if self.hard_lock {
                    self.phase = Phase::LockReadMc;
                    return self.check(ctx, T3T_FELICA_LITE_MC_BLOCK, 1);
                }
                self.flags |= NdefFlags::READ_ONLY;
                self.complete(ctx, RwEvent::SetReadOnly(Status::Ok));
                Ok(())
            }
            Phase::LockReadMc => {
                let mut mc = t3t::decode_check(rsp, &self.idm, 1)?;
                for b in &mut mc[MC_LOCK_BYTES] {
                    *b = 0x00;
                }
                self.phase = Phase::LockWriteMc;
                self.update(ctx, T3T_FELICA_LITE_MC_BLOCK, mc)
            }
            Phase::LockWriteMc => {
                t3t::decode_update(rsp, &self.idm)?;
                self.flags |= NdefFlags::READ_ONLY;
                self.flags.remove(NdefFlags::SOFT_LOCKABLE | NdefFlags::HARD_LOCKABLE);
                self.complete(ctx, RwEvent::SetReadOnly(Status::Ok));
                Ok(())
            }
            Phase::FormatReadMc => {
                let mut mc = t3t::decode_check(rsp, &self.idm, 1)?;
                mc[T3T_MC_SYS_OP_OFFSET] = T3T_MC_SYS_OP_NDEF;
                self.phase = Phase::FormatWriteMc;
                self.update(ctx, T3T_FELICA_LITE_MC_BLOCK, mc)
            }
            Phase::FormatWriteMc => {
                t3t::decode_update(rsp, &self.idm)?;
                self.phase = Phase::FormatWriteAttr;
                self.write_attr(ctx, DEFAULT_ATTRIBUTES)
            }
            Phase::FormatWriteAttr => {
                t3t::decode_update(rsp, &self.idm)?;
                self.attr = None;
                self.flags = NdefFlags::NONE;
                self.complete(ctx, RwEvent::Format(Status::Ok));
                Ok(())
            }
            Phase::Presence => {
                let (idm, _) = t3t::decode_poll(rsp)?;
                if idm != self.idm {
                    return Err(Error::Refused(format!("poll answered by {}", idm.to_hex())));
                }
                self.complete(ctx, RwEvent::PresenceCheck(Status::Ok));
                Ok(())
            }
        }
    }

    fn reset_op(&mut self) {
        self.phase = Phase::None;
        self.hard_lock = false;
    }
}
