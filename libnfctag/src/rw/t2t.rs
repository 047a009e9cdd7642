// libnfctag/src/rw/t2t.rs
//! Type 2 Tag reader/writer.
//!
//! Detection reads the header (blocks 0..=3) for the capability container
//! and the static lock bytes, then scans the data area 16 bytes at a time.
//! Lock and Memory Control TLVs found on the way are applied to the memory
//! map immediately so the remaining scan skips the bytes they describe.
//! Blocks beyond 255 are reached through SECTOR SELECT, whose second packet
//! is acknowledged by silence.

use std::collections::{BTreeMap, VecDeque};

use log::{debug, info};

use super::{NdefInfo, RwCtx, RwEvent, RwState, TagHandler};
use crate::addressing::{ByteKind, MemoryMap};
use crate::constants::{
    CC_ACCESS_RO, CC_ACCESS_RW, CC_VERSION_1_0, CC_VERSION_MAJOR, NDEF_MAGIC_NUMBER, TLV_NDEF,
    TLV_TERMINATOR,
};
use crate::ndef::{NdefCollector, WritePlan};
use crate::protocol::t2t::{
    self, T2T_BLOCK_SIZE, T2T_CC_OFFSET, T2T_DATA_START, T2T_DEFAULT_BYTES_PER_LOCK_BIT,
    T2T_STATIC_DATA_SIZE, T2T_STATIC_LOCK0, T2T_STATIC_LOCK1,
};
use crate::protocol::T2tCommand;
use crate::tlv::{max_message_len, LockControlTlv, LockTable, NdefTlv, ScanEvent, TlvScanner};
use crate::types::{NdefFlags, Status, TagProtocol};
use crate::{Error, Result};

/// Blocks covered by one READ.
const BLOCKS_PER_READ: u16 = 4;
const CC_BLOCK: u16 = 3;
const STATIC_LOCK_BLOCK: u16 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Read(u16),
    Write(u16, [u8; 4]),
    /// Planned NDEF bytes laid over the block image.
    WritePlanned { block: u16, invalidated: bool },
    /// `(index, value)` pairs laid over the block image.
    WriteOverlay { block: u16, bytes: Vec<(usize, u8)> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    None,
    ReadCc,
    ScanTlv(u16),
    ReadLocks(u16),
    ReadNdef(u16),
    FormatHeader,
    StepRead(u16),
    StepWrite(u16),
    Presence,
    RawRead(u16),
    RawWrite(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectorSelect {
    /// Waiting for the ACK of the first packet.
    Ack { sector: u8 },
    /// Second packet sent; a timeout means success.
    Passive { sector: u8 },
}

pub struct T2t {
    uid: Vec<u8>,
    state: RwState,
    phase: Phase,
    cur_sector: u8,
    select: Option<SectorSelect>,
    /// Command parked until the sector select completes.
    pending: Option<(T2tCommand, u64)>,
    header: [u8; 16],
    cc: [u8; 4],
    map: MemoryMap,
    locks: LockTable,
    scanner: TlvScanner,
    ndef: Option<NdefTlv>,
    msg_offset: usize,
    msg_len: usize,
    max_size: usize,
    flags: NdefFlags,
    detect_flags: NdefFlags,
    collector: Option<NdefCollector>,
    plan: Option<WritePlan>,
    images: BTreeMap<u16, [u8; 4]>,
    steps: VecDeque<Step>,
}

impl T2t {
    pub fn new(nfcid1: &[u8]) -> Result<Self> {
        if !matches!(nfcid1.len(), 4 | 7 | 10) {
            return Err(Error::InvalidLength {
                expected: 7,
                actual: nfcid1.len(),
            });
        }
        Ok(Self {
            uid: nfcid1.to_vec(),
            state: RwState::Idle,
            phase: Phase::None,
            cur_sector: 0,
            select: None,
            pending: None,
            header: [0; 16],
            cc: [0; 4],
            map: MemoryMap::new(T2T_BLOCK_SIZE, T2T_DATA_START, T2T_DATA_START),
            locks: LockTable::default(),
            scanner: TlvScanner::new(),
            ndef: None,
            msg_offset: 0,
            msg_len: 0,
            max_size: 0,
            flags: NdefFlags::NONE,
            detect_flags: NdefFlags::NONE,
            collector: None,
            plan: None,
            images: BTreeMap::new(),
            steps: VecDeque::new(),
        })
    }

    /// Capability container read by the last detection.
    pub fn cc(&self) -> [u8; 4] {
        self.cc
    }

    pub fn memory_map(&self) -> &MemoryMap {
        &self.map
    }

    fn data_size(&self) -> usize {
        self.cc[2] as usize * 8
    }

    /// Send a block addressed command, selecting the sector first when
    /// `block` lies outside the current one.
    fn send_block<F>(&mut self, ctx: &mut RwCtx<'_>, block: u16, timeout: u64, make: F) -> Result<()>
    where
        F: FnOnce(u8) -> T2tCommand,
    {
        let (sector, blk) = t2t::split_block(block);
        let cmd = make(blk);
        if sector == self.cur_sector {
            return ctx.send(cmd, timeout);
        }
        debug!("t2t: selecting sector {} for block {}", sector, block);
        self.pending = Some((cmd, timeout));
        self.select = Some(SectorSelect::Ack { sector });
        let select_timeout = ctx.config.t2t_timeout_ms;
        ctx.send(T2tCommand::SectorSelect1, select_timeout)
    }

    fn read(&mut self, ctx: &mut RwCtx<'_>, block: u16) -> Result<()> {
        let timeout = ctx.config.t2t_timeout_ms;
        self.send_block(ctx, block, timeout, |block| T2tCommand::Read { block })
    }

    fn write(&mut self, ctx: &mut RwCtx<'_>, block: u16, data: [u8; 4]) -> Result<()> {
        let timeout = ctx.config.t2t_timeout_ms;
        self.send_block(ctx, block, timeout, |block| T2tCommand::Write { block, data })
    }

    fn on_sector_select(&mut self, ctx: &mut RwCtx<'_>, select: SectorSelect, data: &[u8]) -> Result<()> {
        match select {
            SectorSelect::Ack { sector } => {
                t2t::decode_ack(data)?;
                self.select = Some(SectorSelect::Passive { sector });
                let timeout = ctx.config.t2t_timeout_ms;
                ctx.send_passive(T2tCommand::SectorSelect2 { sector }, timeout)
            }
            SectorSelect::Passive { sector } => {
                self.select = None;
                Err(Error::Refused(format!("sector {} select answered with NACK", sector)))
            }
        }
    }

    // ---- detection ----

    fn on_cc(&mut self, ctx: &mut RwCtx<'_>, data: &[u8]) -> Result<()> {
        let data = t2t::decode_read(data)?;
        self.header.copy_from_slice(data);
        self.cc.copy_from_slice(&data[T2T_CC_OFFSET..T2T_CC_OFFSET + 4]);

        if self.cc == [0; 4] {
            self.detect_flags = NdefFlags::SUPPORTED | NdefFlags::FORMATABLE;
            return Err(Error::InvalidCc("capability container is blank".into()));
        }
        if self.cc[0] != NDEF_MAGIC_NUMBER {
            self.detect_flags = NdefFlags::UNKNOWN;
            return Err(Error::InvalidCc(format!("magic number {:#04x}", self.cc[0])));
        }
        if self.cc[1] >> 4 > CC_VERSION_MAJOR {
            return Err(Error::InvalidCc(format!("mapping version {:#04x}", self.cc[1])));
        }
        if self.cc[2] == 0 {
            return Err(Error::InvalidCc("data area size is zero".into()));
        }
        if self.cc[3] != CC_ACCESS_RW && self.cc[3] != CC_ACCESS_RO {
            return Err(Error::InvalidCc(format!("access condition {:#04x}", self.cc[3])));
        }

        let size = self.data_size();
        self.map = MemoryMap::new(T2T_BLOCK_SIZE, T2T_DATA_START, T2T_DATA_START + size);
        self.locks = LockTable::new(T2T_DATA_START + T2T_STATIC_DATA_SIZE);
        debug!("t2t cc {:02x?}, data area {} bytes", self.cc, size);

        let first = (T2T_DATA_START / T2T_BLOCK_SIZE) as u16;
        self.phase = Phase::ScanTlv(first);
        self.read(ctx, first)
    }

    fn on_scan(&mut self, ctx: &mut RwCtx<'_>, block: u16, data: &[u8]) -> Result<()> {
        let data = t2t::decode_read(data)?;
        let start = block as usize * T2T_BLOCK_SIZE;
        for (i, byte) in data.iter().enumerate() {
            let offset = start + i;
            self.locks.record(offset, *byte);
            if self.scanner.is_done() || !self.map.is_data(offset) {
                continue;
            }
            match self.scanner.feed(offset, *byte)? {
                ScanEvent::LockControl(tlv) => {
                    debug!("t2t lock control {:?}", tlv);
                    self.locks.add_lock_control(tlv);
                    self.map.exclude(tlv.range(), ByteKind::Lock);
                }
                ScanEvent::MemoryControl(tlv) => {
                    debug!("t2t memory control {:?}", tlv);
                    self.locks.add_memory_control(tlv);
                    self.map.exclude(tlv.range(), ByteKind::Reserved);
                }
                ScanEvent::Ndef(tlv) => self.ndef = Some(tlv),
                ScanEvent::Terminator | ScanEvent::NeedMore => {}
            }
        }

        if self.scanner.is_done() {
            if self.ndef.is_none() {
                return Err(Error::NdefNotFound);
            }
            return self.read_lock_bytes(ctx);
        }

        let next = block + BLOCKS_PER_READ;
        if next as usize * T2T_BLOCK_SIZE >= self.map.data_end() {
            self.scanner.finish()?;
            return Err(Error::NdefNotFound);
        }
        self.phase = Phase::ScanTlv(next);
        self.read(ctx, next)
    }

    fn read_lock_bytes(&mut self, ctx: &mut RwCtx<'_>) -> Result<()> {
        let size = self.data_size();
        if !self.locks.has_lock_controls() && size > T2T_STATIC_DATA_SIZE {
            let per_bit = t2t::manufacturer(self.uid[0])
                .map(|m| m.bytes_per_lock_bit)
                .unwrap_or(T2T_DEFAULT_BYTES_PER_LOCK_BIT);
            let tlv = LockControlTlv {
                offset: T2T_DATA_START + size,
                num_bits: (size - T2T_STATIC_DATA_SIZE).div_ceil(per_bit as usize) as u16,
                bytes_locked_per_bit: per_bit,
            };
            debug!("t2t: no lock control tlv, assuming {:?}", tlv);
            self.locks.add_lock_control(tlv);
            self.map.exclude(tlv.range(), ByteKind::Lock);
        }

        match self.locks.unread_offsets().first() {
            Some(offset) => {
                let block = (offset / T2T_BLOCK_SIZE) as u16;
                self.phase = Phase::ReadLocks(block);
                self.read(ctx, block)
            }
            None => self.detect_complete(ctx),
        }
    }

    fn on_lock_bytes(&mut self, ctx: &mut RwCtx<'_>, block: u16, data: &[u8]) -> Result<()> {
        let data = t2t::decode_read(data)?;
        let start = block as usize * T2T_BLOCK_SIZE;
        for (i, byte) in data.iter().enumerate() {
            self.locks.record(start + i, *byte);
        }
        self.read_lock_bytes(ctx)
    }

    fn is_locked(&self, header_offset: usize) -> bool {
        if self.cc[3] == CC_ACCESS_RO {
            return true;
        }
        let lock0 = self.header[T2T_STATIC_LOCK0];
        let lock1 = self.header[T2T_STATIC_LOCK1];
        if lock0 & 0xF0 == 0xF0 && lock1 == 0xFF {
            return true;
        }
        let data_end = self.map.data_end();
        self.locks
            .locked_ranges()
            .iter()
            .any(|r| r.start < data_end && r.end > header_offset)
    }

    fn detect_complete(&mut self, ctx: &mut RwCtx<'_>) -> Result<()> {
        let tlv = self.ndef.ok_or(Error::NdefNotFound)?;
        self.msg_len = tlv.msg_len;
        self.msg_offset = self
            .map
            .next_data_offset(tlv.last_length_offset + 1)
            .unwrap_or(self.map.data_end());
        self.max_size = max_message_len(self.map.data_bytes_from(tlv.header_offset + 1));

        let mut flags = NdefFlags::SUPPORTED | NdefFlags::FORMATED;
        if self.is_locked(tlv.header_offset) || self.msg_len > self.max_size {
            flags |= NdefFlags::READ_ONLY;
        } else {
            flags |= NdefFlags::SOFT_LOCKABLE | NdefFlags::HARD_LOCKABLE;
        }
        self.flags = flags;

        info!(
            "t2t ndef detected: {} of {} bytes, flags {:#04x}",
            self.msg_len,
            self.max_size,
            flags.bits()
        );
        self.complete(
            ctx,
            RwEvent::NdefDetect(NdefInfo {
                status: Status::Ok,
                protocol: TagProtocol::T2t,
                cur_size: self.msg_len,
                max_size: self.max_size,
                flags,
            }),
        );
        Ok(())
    }

    // ---- read ----

    fn on_ndef_data(&mut self, ctx: &mut RwCtx<'_>, block: u16, data: &[u8]) -> Result<()> {
        let data = t2t::decode_read(data)?;
        let collector = self
            .collector
            .as_mut()
            .ok_or_else(|| Error::Refused("no read in progress".into()))?;
        collector.feed(&self.map, block as usize * T2T_BLOCK_SIZE, data);

        match collector.next_offset() {
            Some(offset) => {
                let next = (offset / T2T_BLOCK_SIZE) as u16;
                self.phase = Phase::ReadNdef(next);
                self.read(ctx, next)
            }
            None => {
                let msg = self.collector.take().map(|c| c.into_data()).unwrap_or_default();
                self.complete(ctx, RwEvent::NdefReadComplete(msg));
                Ok(())
            }
        }
    }

    // ---- block steps shared by write, set read only and format ----

    fn planned_block(&self, block: u16, invalidated: bool) -> Result<[u8; 4]> {
        let plan = self
            .plan
            .as_ref()
            .ok_or_else(|| Error::Refused("no write in progress".into()))?;
        let planned = plan
            .block(block as usize)
            .ok_or_else(|| Error::Refused(format!("block {} is not planned", block)))?;
        let base = if planned.is_partial(T2T_BLOCK_SIZE) {
            *self
                .images
                .get(&block)
                .ok_or_else(|| Error::Refused(format!("block {} was not read", block)))?
        } else {
            [0; 4]
        };
        let mut out = [0u8; 4];
        out.copy_from_slice(&planned.apply(&base, invalidated));
        Ok(out)
    }

    fn next_step(&mut self, ctx: &mut RwCtx<'_>) -> Result<()> {
        let Some(step) = self.steps.pop_front() else {
            return self.steps_done(ctx);
        };
        let (block, data) = match step {
            Step::Read(block) => (block, None),
            Step::Write(block, data) => (block, Some(data)),
            Step::WritePlanned { block, invalidated } => {
                (block, Some(self.planned_block(block, invalidated)?))
            }
            Step::WriteOverlay { block, bytes } => {
                let mut data = *self
                    .images
                    .get(&block)
                    .ok_or_else(|| Error::Refused(format!("block {} was not read", block)))?;
                for (index, value) in bytes {
                    data[index] |= value;
                }
                (block, Some(data))
            }
        };
        match data {
            None => {
                self.phase = Phase::StepRead(block);
                self.read(ctx, block)
            }
            Some(data) => {
                self.phase = Phase::StepWrite(block);
                self.write(ctx, block, data)
            }
        }
    }

    fn steps_done(&mut self, ctx: &mut RwCtx<'_>) -> Result<()> {
        match self.state {
            RwState::WriteNdef => {
                let plan = self
                    .plan
                    .take()
                    .ok_or_else(|| Error::Refused("no write in progress".into()))?;
                self.msg_offset = plan.msg_offset;
                self.msg_len = plan.msg_len;
                if let Some(tlv) = self.ndef.as_mut() {
                    tlv.msg_len = plan.msg_len;
                    tlv.length_field_size = plan.length_field_size;
                    tlv.last_length_offset = plan.msg_offset.saturating_sub(1);
                }
                info!("t2t ndef updated: {} bytes", self.msg_len);
                self.complete(ctx, RwEvent::NdefUpdateComplete);
            }
            RwState::SetReadOnly => {
                self.cc[3] = CC_ACCESS_RO;
                self.flags |= NdefFlags::READ_ONLY;
                self.flags.remove(NdefFlags::SOFT_LOCKABLE | NdefFlags::HARD_LOCKABLE);
                self.complete(ctx, RwEvent::SetReadOnly(Status::Ok));
            }
            RwState::Format => {
                self.ndef = None;
                self.flags = NdefFlags::NONE;
                self.complete(ctx, RwEvent::Format(Status::Ok));
            }
            other => {
                return Err(Error::Refused(format!("no block steps expected in {:?}", other)));
            }
        }
        Ok(())
    }

    fn on_format_header(&mut self, ctx: &mut RwCtx<'_>, data: &[u8]) -> Result<()> {
        let data = t2t::decode_read(data)?;
        let cc = &data[T2T_CC_OFFSET..T2T_CC_OFFSET + 4];
        if cc[3] == CC_ACCESS_RO {
            return Err(Error::Refused("tag is read only".into()));
        }
        let cc2 = if cc[0] == NDEF_MAGIC_NUMBER && cc[2] != 0 {
            cc[2]
        } else {
            t2t::manufacturer(self.uid[0])
                .map(|m| m.default_cc2)
                .ok_or_else(|| {
                    Error::NotSupported(format!("t2t format for manufacturer {:#04x}", self.uid[0]))
                })?
        };
        let first_data = (T2T_DATA_START / T2T_BLOCK_SIZE) as u16;
        self.steps = VecDeque::from(vec![
            Step::Write(CC_BLOCK, [NDEF_MAGIC_NUMBER, CC_VERSION_1_0, cc2, CC_ACCESS_RW]),
            Step::Write(first_data, [TLV_NDEF, 0x00, TLV_TERMINATOR, 0x00]),
        ]);
        self.next_step(ctx)
    }

    // ---- raw block access ----

    pub(crate) fn read_block(&mut self, ctx: &mut RwCtx<'_>, block: u16) -> Result<()> {
        self.state = RwState::ReadBlock(block);
        self.phase = Phase::RawRead(block);
        self.read(ctx, block)
    }

    pub(crate) fn write_block(&mut self, ctx: &mut RwCtx<'_>, block: u16, data: [u8; 4]) -> Result<()> {
        self.state = RwState::WriteBlock(block);
        self.phase = Phase::RawWrite(block);
        self.write(ctx, block, data)
    }
}

impl TagHandler for T2t {
    fn protocol(&self) -> TagProtocol {
        TagProtocol::T2t
    }

    fn state(&self) -> RwState {
        self.state
    }

    fn set_state(&mut self, state: RwState) {
        self.state = state;
    }

    fn detect_ndef(&mut self, ctx: &mut RwCtx<'_>) -> Result<()> {
        self.ndef = None;
        self.flags = NdefFlags::NONE;
        self.detect_flags = NdefFlags::NONE;
        self.scanner = TlvScanner::new();
        self.msg_len = 0;
        self.max_size = 0;
        self.state = RwState::DetectNdef;
        self.phase = Phase::ReadCc;
        self.read(ctx, 0)
    }

    fn read_ndef(&mut self, ctx: &mut RwCtx<'_>, max_len: usize) -> Result<()> {
        if self.ndef.is_none() {
            return Err(Error::NotInitialized);
        }
        if self.msg_len > max_len {
            return Err(Error::Refused(format!(
                "ndef message of {} bytes exceeds buffer of {}",
                self.msg_len, max_len
            )));
        }
        let collector = NdefCollector::new(&self.map, self.msg_offset, self.msg_len)?;
        self.state = RwState::ReadNdef;
        match collector.next_offset() {
            None => {
                self.complete(ctx, RwEvent::NdefReadComplete(Vec::new()));
                Ok(())
            }
            Some(offset) => {
                self.collector = Some(collector);
                let block = (offset / T2T_BLOCK_SIZE) as u16;
                self.phase = Phase::ReadNdef(block);
                self.read(ctx, block)
            }
        }
    }

    fn write_ndef(&mut self, ctx: &mut RwCtx<'_>, msg: &[u8]) -> Result<()> {
        let tlv = self.ndef.ok_or(Error::NotInitialized)?;
        if self.flags.contains(NdefFlags::READ_ONLY) {
            return Err(Error::Refused("tag is read only".into()));
        }
        if msg.len() > self.max_size {
            return Err(Error::Refused(format!(
                "ndef message of {} bytes exceeds capacity of {}",
                msg.len(),
                self.max_size
            )));
        }
        let plan = WritePlan::new(&self.map, tlv.header_offset, msg)?;

        let mut steps = VecDeque::new();
        steps.extend(plan.partial_blocks().into_iter().map(|b| Step::Read(b as u16)));
        steps.extend(plan.block_numbers().into_iter().map(|b| Step::WritePlanned {
            block: b as u16,
            invalidated: true,
        }));
        steps.extend(plan.length_blocks().into_iter().map(|b| Step::WritePlanned {
            block: b as u16,
            invalidated: false,
        }));
        debug!("t2t write of {} bytes in {} steps", msg.len(), steps.len());

        self.images.clear();
        self.plan = Some(plan);
        self.steps = steps;
        self.state = RwState::WriteNdef;
        self.next_step(ctx)
    }

    fn set_read_only(&mut self, ctx: &mut RwCtx<'_>, hard_lock: bool) -> Result<()> {
        if self.ndef.is_none() {
            return Err(Error::NotInitialized);
        }
        let mut steps = VecDeque::new();
        let mut cc = self.cc;
        cc[3] = CC_ACCESS_RO;
        steps.push_back(Step::Write(CC_BLOCK, cc));

        if hard_lock {
            steps.push_back(Step::Write(
                STATIC_LOCK_BLOCK,
                [self.header[8], self.header[9], 0xFF, 0xFF],
            ));
            let mut by_block: BTreeMap<u16, Vec<(usize, u8)>> = BTreeMap::new();
            for (offset, value) in self.locks.hard_lock_values() {
                by_block
                    .entry((offset / T2T_BLOCK_SIZE) as u16)
                    .or_default()
                    .push((offset % T2T_BLOCK_SIZE, value));
            }
            for (block, bytes) in by_block {
                steps.push_back(Step::Read(block));
                steps.push_back(Step::WriteOverlay { block, bytes });
            }
        }

        self.images.clear();
        self.steps = steps;
        self.state = RwState::SetReadOnly;
        self.next_step(ctx)
    }

    fn format_ndef(&mut self, ctx: &mut RwCtx<'_>) -> Result<()> {
        self.state = RwState::Format;
        self.phase = Phase::FormatHeader;
        self.read(ctx, 0)
    }

    fn presence_check(&mut self, ctx: &mut RwCtx<'_>) -> Result<()> {
        self.state = RwState::PresenceCheck;
        self.phase = Phase::Presence;
        let timeout = ctx.config.presence_check_timeout_ms;
        self.send_block(ctx, 0, timeout, |block| T2tCommand::Read { block })
    }

    fn on_response(&mut self, ctx: &mut RwCtx<'_>, data: &[u8]) -> Result<()> {
        if let Some(select) = self.select {
            return self.on_sector_select(ctx, select, data);
        }
        match self.phase {
            Phase::None => Err(Error::Refused("unexpected t2t response".into())),
            Phase::ReadCc => self.on_cc(ctx, data),
            Phase::ScanTlv(block) => self.on_scan(ctx, block, data),
            Phase::ReadLocks(block) => self.on_lock_bytes(ctx, block, data),
            Phase::ReadNdef(block) => self.on_ndef_data(ctx, block, data),
            Phase::FormatHeader => self.on_format_header(ctx, data),
            Phase::StepRead(block) => {
                let data = t2t::decode_read(data)?;
                let mut image = [0u8; 4];
                image.copy_from_slice(&data[..T2T_BLOCK_SIZE]);
                self.images.insert(block, image);
                self.next_step(ctx)
            }
            Phase::StepWrite(block) => {
                t2t::decode_ack(data)?;
                debug!("t2t block {} written", block);
                self.next_step(ctx)
            }
            Phase::Presence => {
                self.complete(ctx, RwEvent::PresenceCheck(Status::Ok));
                Ok(())
            }
            Phase::RawRead(block) => {
                let data = t2t::decode_read(data)?.to_vec();
                self.complete(
                    ctx,
                    RwEvent::BlockData {
                        status: Status::Ok,
                        block,
                        data,
                    },
                );
                Ok(())
            }
            Phase::RawWrite(block) => {
                t2t::decode_ack(data)?;
                self.complete(
                    ctx,
                    RwEvent::BlockWritten {
                        status: Status::Ok,
                        block,
                    },
                );
                Ok(())
            }
        }
    }

    fn on_timeout(&mut self, ctx: &mut RwCtx<'_>) -> Result<bool> {
        let Some(SectorSelect::Passive { sector }) = self.select else {
            return Ok(false);
        };
        debug!("t2t sector {} selected", sector);
        self.select = None;
        self.cur_sector = sector;
        let (cmd, timeout) = self
            .pending
            .take()
            .ok_or_else(|| Error::Refused("no command behind sector select".into()))?;
        ctx.send(cmd, timeout)?;
        Ok(true)
    }

    fn reset_op(&mut self) {
        self.phase = Phase::None;
        self.select = None;
        self.pending = None;
        self.collector = None;
        self.plan = None;
        self.images.clear();
        self.steps.clear();
    }

    fn failure_flags(&self) -> NdefFlags {
        self.detect_flags
    }
}
