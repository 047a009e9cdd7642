// libnfctag/src/rw/i93.rs
//! ISO 15693 (Type 5) reader/writer.
//!
//! Block geometry comes from Get System Information, or from the product
//! table when the tag does not report its memory size. The capability
//! container occupies the first four bytes of the memory, or eight when
//! its MLEN byte is zero.

use std::collections::{BTreeMap, VecDeque};

use log::{debug, info, warn};

use super::{NdefInfo, RwCtx, RwEvent, RwState, TagHandler};
use crate::addressing::{ByteKind, MemoryMap};
use crate::constants::{NDEF_MAGIC_NUMBER, NDEF_MAGIC_NUMBER_E2, TLV_NDEF, TLV_TERMINATOR};
use crate::ndef::{NdefCollector, WritePlan};
use crate::protocol::i93::{
    self, I93_CC_EXT_SIZE, I93_CC_SIZE, I93_CC_VERSION_1_0, I93_CC_VERSION_MASK,
    I93_CC_WRITE_ACCESS_DENIED, I93_CC_WRITE_ACCESS_MASK, I93_FLAG_HIGH_DATA_RATE,
    I93_FLAG_OPTION, I93_FLAG_PROT_EXT, I93_MAX_BLOCKS_SHORT_ADDR, I93_MFG_TI, I93_UID_LEN, I93Op,
    SystemInfo, Uid,
};
use crate::protocol::I93Command;
use crate::tlv::{max_message_len, NdefTlv, ScanEvent, TlvScanner};
use crate::types::{NdefFlags, Status, TagProtocol};
use crate::{Error, Result};

/// Largest memory a four byte capability container can describe.
const I93_CC_SHORT_MAX_AREA: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Purpose {
    Detect,
    Format,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Read(u16),
    Write(u16, Vec<u8>),
    WritePlanned { block: u16, invalidated: bool },
    Lock(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    None,
    SysInfo(Purpose),
    ReadCc(u16),
    ScanTlv(u16),
    ReadNdef(u16),
    StepRead(u16),
    StepWrite(u16),
    Presence,
    RawRead(u16),
    RawWrite(u16),
}

pub struct I93 {
    uid: Uid,
    state: RwState,
    phase: Phase,
    block_size: usize,
    num_blocks: u16,
    /// Two byte block numbers (protocol extension flag).
    ext: bool,
    /// Raw bytes of the first blocks, holding the capability container.
    header: Vec<u8>,
    cc_size: usize,
    map: MemoryMap,
    scanner: TlvScanner,
    ndef: Option<NdefTlv>,
    msg_offset: usize,
    msg_len: usize,
    max_size: usize,
    flags: NdefFlags,
    detect_flags: NdefFlags,
    collector: Option<NdefCollector>,
    plan: Option<WritePlan>,
    images: BTreeMap<u16, Vec<u8>>,
    steps: VecDeque<Step>,
}

impl I93 {
    pub fn new(uid: &[u8]) -> Result<Self> {
        let uid: Uid = uid.try_into().map_err(|_| Error::InvalidLength {
            expected: I93_UID_LEN,
            actual: uid.len(),
        })?;
        Ok(Self {
            uid,
            state: RwState::Idle,
            phase: Phase::None,
            block_size: 0,
            num_blocks: 0,
            ext: false,
            header: Vec::new(),
            cc_size: I93_CC_SIZE,
            map: MemoryMap::new(4, I93_CC_SIZE, I93_CC_SIZE),
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

    pub fn uid(&self) -> &Uid {
        &self.uid
    }

    /// Capability container read by the last detection.
    pub fn cc(&self) -> &[u8] {
        &self.header[..self.cc_size.min(self.header.len())]
    }

    /// `(block size, number of blocks)` once known.
    pub fn geometry(&self) -> Option<(usize, u16)> {
        (self.block_size != 0).then_some((self.block_size, self.num_blocks))
    }

    fn is_ti(&self) -> bool {
        self.uid[1] == I93_MFG_TI
    }

    fn command(&self, ctx: &RwCtx<'_>, op: I93Op) -> I93Command {
        let mut flags = 0;
        if ctx.config.i93_high_data_rate {
            flags |= I93_FLAG_HIGH_DATA_RATE;
        }
        let block = match &op {
            I93Op::ReadSingleBlock { block }
            | I93Op::WriteSingleBlock { block, .. }
            | I93Op::LockBlock { block } => Some(*block),
            I93Op::ReadMultipleBlocks { first, .. } => Some(*first),
            I93Op::GetSystemInfo => None,
        };
        if self.ext || block.is_some_and(|b| b as usize >= I93_MAX_BLOCKS_SHORT_ADDR) {
            flags |= I93_FLAG_PROT_EXT;
        }
        if self.is_ti() && matches!(op, I93Op::WriteSingleBlock { .. } | I93Op::LockBlock { .. }) {
            flags |= I93_FLAG_OPTION;
        }
        I93Command {
            flags,
            uid: self.uid,
            op,
        }
    }

    fn send(&mut self, ctx: &mut RwCtx<'_>, op: I93Op) -> Result<()> {
        let cmd = self.command(ctx, op);
        let timeout = ctx.config.i93_timeout_ms;
        ctx.send(cmd, timeout)
    }

    fn read(&mut self, ctx: &mut RwCtx<'_>, block: u16) -> Result<()> {
        self.send(ctx, I93Op::ReadSingleBlock { block })
    }

    fn write(&mut self, ctx: &mut RwCtx<'_>, block: u16, data: Vec<u8>) -> Result<()> {
        self.send(ctx, I93Op::WriteSingleBlock { block, data })
    }

    fn decode_block<'a>(&self, data: &'a [u8]) -> Result<&'a [u8]> {
        i93::decode_read_block(data, self.block_size)
    }

    fn block_of(&self, offset: usize) -> u16 {
        (offset / self.block_size) as u16
    }

    // ---- geometry ----

    fn request_system_info(&mut self, ctx: &mut RwCtx<'_>, purpose: Purpose) -> Result<()> {
        self.ext = i93::lookup_product(&self.uid)
            .is_some_and(|p| p.num_blocks as usize > I93_MAX_BLOCKS_SHORT_ADDR);
        self.phase = Phase::SysInfo(purpose);
        self.send(ctx, I93Op::GetSystemInfo)
    }

    fn on_system_info(&mut self, ctx: &mut RwCtx<'_>, purpose: Purpose, data: &[u8]) -> Result<()> {
        let reported = match SystemInfo::decode(data, self.ext) {
            Ok(info) => info.num_blocks.zip(info.block_size),
            Err(e) => {
                debug!("i93 get system information failed: {}", e);
                None
            }
        };
        let (num_blocks, block_size) = match reported {
            Some((n, bs)) => (n, bs as usize),
            None => {
                let product = i93::lookup_product(&self.uid).ok_or_else(|| {
                    Error::NotSupported(format!(
                        "i93 memory size unknown for manufacturer {:#04x}",
                        self.uid[1]
                    ))
                })?;
                debug!("i93 geometry from product table: {}", product.name);
                (product.num_blocks, product.block_size as usize)
            }
        };
        if block_size == 0 || num_blocks == 0 {
            return Err(Error::NotSupported("i93 tag reports no memory".into()));
        }
        self.block_size = block_size;
        self.num_blocks = num_blocks;
        self.ext = num_blocks as usize > I93_MAX_BLOCKS_SHORT_ADDR;
        debug!(
            "i93 geometry: {} blocks of {} bytes{}",
            num_blocks,
            block_size,
            if self.ext { ", extended addressing" } else { "" }
        );

        match purpose {
            Purpose::Detect => {
                self.header.clear();
                self.phase = Phase::ReadCc(0);
                self.read(ctx, 0)
            }
            Purpose::Format => self.format_blocks(ctx),
        }
    }

    fn total_size(&self) -> usize {
        self.block_size * self.num_blocks as usize
    }

    // ---- detection ----

    fn on_cc(&mut self, ctx: &mut RwCtx<'_>, block: u16, data: &[u8]) -> Result<()> {
        let data = self.decode_block(data)?;
        self.header.extend_from_slice(data);

        if block == 0 {
            let mut cc = [0u8; I93_CC_SIZE];
            let head = &self.header[..I93_CC_SIZE.min(self.header.len())];
            cc[..head.len()].copy_from_slice(head);
            if cc == [0; I93_CC_SIZE] {
                self.detect_flags = NdefFlags::SUPPORTED | NdefFlags::FORMATABLE;
                return Err(Error::InvalidCc("capability container is blank".into()));
            }
            if cc[0] != NDEF_MAGIC_NUMBER && cc[0] != NDEF_MAGIC_NUMBER_E2 {
                self.detect_flags = NdefFlags::UNKNOWN;
                return Err(Error::InvalidCc(format!("magic number {:#04x}", cc[0])));
            }
            if cc[1] & I93_CC_VERSION_MASK != I93_CC_VERSION_1_0 {
                return Err(Error::InvalidCc(format!("mapping version {:#04x}", cc[1])));
            }
        }

        let cc_size = if self.header.get(2).copied().unwrap_or(0) == 0 {
            I93_CC_EXT_SIZE
        } else {
            I93_CC_SIZE
        };
        if self.header.len() < cc_size {
            let next = block + 1;
            self.phase = Phase::ReadCc(next);
            return self.read(ctx, next);
        }

        let area = if cc_size == I93_CC_SIZE {
            self.header[2] as usize * 8
        } else {
            u16::from_be_bytes([self.header[6], self.header[7]]) as usize * 8
        };
        if area == 0 {
            return Err(Error::InvalidCc("data area size is zero".into()));
        }
        let data_end = (cc_size + area).min(self.total_size());
        self.cc_size = cc_size;
        self.map = MemoryMap::new(self.block_size, cc_size, data_end);
        debug!(
            "i93 cc {:02x?}, data area {}..{}",
            &self.header[..cc_size],
            cc_size,
            data_end
        );

        let first = self.block_of(cc_size);
        self.phase = Phase::ScanTlv(first);
        self.read(ctx, first)
    }

    fn on_scan(&mut self, ctx: &mut RwCtx<'_>, block: u16, data: &[u8]) -> Result<()> {
        let data = self.decode_block(data)?.to_vec();
        let start = block as usize * self.block_size;
        for (i, byte) in data.iter().enumerate() {
            let offset = start + i;
            if self.scanner.is_done() || !self.map.is_data(offset) {
                continue;
            }
            match self.scanner.feed(offset, *byte)? {
                ScanEvent::LockControl(tlv) => self.map.exclude(tlv.range(), ByteKind::Lock),
                ScanEvent::MemoryControl(tlv) => self.map.exclude(tlv.range(), ByteKind::Reserved),
                ScanEvent::Ndef(tlv) => self.ndef = Some(tlv),
                ScanEvent::Terminator | ScanEvent::NeedMore => {}
            }
        }

        if self.scanner.is_done() {
            return self.detect_complete(ctx);
        }
        let next = block + 1;
        if next as usize * self.block_size >= self.map.data_end() {
            self.scanner.finish()?;
            return Err(Error::NdefNotFound);
        }
        self.phase = Phase::ScanTlv(next);
        self.read(ctx, next)
    }

    fn cc_read_only(&self) -> bool {
        self.header[1] & I93_CC_WRITE_ACCESS_MASK != 0
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
        if self.cc_read_only() || self.msg_len > self.max_size {
            flags |= NdefFlags::READ_ONLY;
        } else {
            flags |= NdefFlags::SOFT_LOCKABLE | NdefFlags::HARD_LOCKABLE;
        }
        self.flags = flags;

        info!(
            "i93 ndef detected: {} of {} bytes, flags {:#04x}",
            self.msg_len,
            self.max_size,
            flags.bits()
        );
        self.complete(
            ctx,
            RwEvent::NdefDetect(NdefInfo {
                status: Status::Ok,
                protocol: TagProtocol::I93,
                cur_size: self.msg_len,
                max_size: self.max_size,
                flags,
            }),
        );
        Ok(())
    }

    // ---- read ----

    fn on_ndef_data(&mut self, ctx: &mut RwCtx<'_>, block: u16, data: &[u8]) -> Result<()> {
        let data = self.decode_block(data)?.to_vec();
        let start = block as usize * self.block_size;
        let collector = self
            .collector
            .as_mut()
            .ok_or_else(|| Error::Refused("no read in progress".into()))?;
        collector.feed(&self.map, start, &data);

        match collector.next_offset() {
            Some(offset) => {
                let next = self.block_of(offset);
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

    // ---- block steps ----

    fn planned_block(&self, block: u16, invalidated: bool) -> Result<Vec<u8>> {
        let plan = self
            .plan
            .as_ref()
            .ok_or_else(|| Error::Refused("no write in progress".into()))?;
        let planned = plan
            .block(block as usize)
            .ok_or_else(|| Error::Refused(format!("block {} is not planned", block)))?;
        let zero = vec![0u8; self.block_size];
        let base = if planned.is_partial(self.block_size) {
            self.images
                .get(&block)
                .ok_or_else(|| Error::Refused(format!("block {} was not read", block)))?
        } else {
            &zero
        };
        Ok(planned.apply(base, invalidated))
    }

    fn next_step(&mut self, ctx: &mut RwCtx<'_>) -> Result<()> {
        let Some(step) = self.steps.pop_front() else {
            return self.steps_done(ctx);
        };
        match step {
            Step::Read(block) => {
                self.phase = Phase::StepRead(block);
                self.read(ctx, block)
            }
            Step::Write(block, data) => {
                self.phase = Phase::StepWrite(block);
                self.write(ctx, block, data)
            }
            Step::WritePlanned { block, invalidated } => {
                let data = self.planned_block(block, invalidated)?;
                self.phase = Phase::StepWrite(block);
                self.write(ctx, block, data)
            }
            Step::Lock(block) => {
                self.phase = Phase::StepWrite(block);
                self.send(ctx, I93Op::LockBlock { block })
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
                info!("i93 ndef updated: {} bytes", self.msg_len);
                self.complete(ctx, RwEvent::NdefUpdateComplete);
            }
            RwState::SetReadOnly => {
                self.header[1] |= I93_CC_WRITE_ACCESS_DENIED;
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

    fn format_blocks(&mut self, ctx: &mut RwCtx<'_>) -> Result<()> {
        let total = self.total_size();
        let mut image = if total > I93_CC_SHORT_MAX_AREA {
            let mlen = ((total - I93_CC_EXT_SIZE) / 8) as u16;
            let [hi, lo] = mlen.to_be_bytes();
            vec![NDEF_MAGIC_NUMBER_E2, I93_CC_VERSION_1_0, 0x00, 0x00, 0x00, 0x00, hi, lo]
        } else {
            let mlen = ((total - I93_CC_SIZE) / 8) as u8;
            vec![NDEF_MAGIC_NUMBER, I93_CC_VERSION_1_0, mlen, 0x00]
        };
        image.extend_from_slice(&[TLV_NDEF, 0x00, TLV_TERMINATOR]);
        let padded = image.len().div_ceil(self.block_size) * self.block_size;
        image.resize(padded, 0x00);
        debug!("i93 format image {:02x?}", image);

        self.steps = image
            .chunks(self.block_size)
            .enumerate()
            .map(|(i, chunk)| Step::Write(i as u16, chunk.to_vec()))
            .collect();
        self.next_step(ctx)
    }

    // ---- raw block access ----

    pub(crate) fn read_block(&mut self, ctx: &mut RwCtx<'_>, block: u16) -> Result<()> {
        self.state = RwState::ReadBlock(block);
        self.phase = Phase::RawRead(block);
        self.read(ctx, block)
    }

    pub(crate) fn write_block(&mut self, ctx: &mut RwCtx<'_>, block: u16, data: &[u8]) -> Result<()> {
        if self.block_size != 0 && data.len() != self.block_size {
            return Err(Error::InvalidLength {
                expected: self.block_size,
                actual: data.len(),
            });
        }
        if data.is_empty() {
            return Err(Error::Refused("empty block data".into()));
        }
        self.state = RwState::WriteBlock(block);
        self.phase = Phase::RawWrite(block);
        self.write(ctx, block, data.to_vec())
    }
}

impl TagHandler for I93 {
    fn protocol(&self) -> TagProtocol {
        TagProtocol::I93
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
        self.request_system_info(ctx, Purpose::Detect)
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
                let block = self.block_of(offset);
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
        debug!("i93 write of {} bytes in {} steps", msg.len(), steps.len());

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
        let mut block0 = self.header[..self.block_size.min(self.header.len())].to_vec();
        block0[1] |= I93_CC_WRITE_ACCESS_DENIED;
        let mut steps = VecDeque::from(vec![Step::Write(0, block0)]);
        if hard_lock {
            let last = self.block_of(self.map.data_end().saturating_sub(1));
            steps.extend((0..=last).map(Step::Lock));
        }
        self.steps = steps;
        self.state = RwState::SetReadOnly;
        self.next_step(ctx)
    }

    fn format_ndef(&mut self, ctx: &mut RwCtx<'_>) -> Result<()> {
        self.state = RwState::Format;
        self.request_system_info(ctx, Purpose::Format)
    }

    fn presence_check(&mut self, ctx: &mut RwCtx<'_>) -> Result<()> {
        self.state = RwState::PresenceCheck;
        self.phase = Phase::Presence;
        let cmd = self.command(ctx, I93Op::ReadSingleBlock { block: 0 });
        let timeout = ctx.config.presence_check_timeout_ms;
        ctx.send(cmd, timeout)
    }

    fn on_response(&mut self, ctx: &mut RwCtx<'_>, data: &[u8]) -> Result<()> {
        match self.phase {
            Phase::None => Err(Error::Refused("unexpected i93 response".into())),
            Phase::SysInfo(purpose) => self.on_system_info(ctx, purpose, data),
            Phase::ReadCc(block) => self.on_cc(ctx, block, data),
            Phase::ScanTlv(block) => self.on_scan(ctx, block, data),
            Phase::ReadNdef(block) => self.on_ndef_data(ctx, block, data),
            Phase::StepRead(block) => {
                let image = self.decode_block(data)?.to_vec();
                self.images.insert(block, image);
                self.next_step(ctx)
            }
            Phase::StepWrite(block) => {
                i93::decode_response(data)?;
                debug!("i93 block {} done", block);
                self.next_step(ctx)
            }
            Phase::Presence => {
                if let Err(e) = i93::decode_response(data) {
                    warn!("i93 presence check answered with {}", e);
                }
                self.complete(ctx, RwEvent::PresenceCheck(Status::Ok));
                Ok(())
            }
            Phase::RawRead(block) => {
                let data = i93::decode_response(data)?.to_vec();
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
                i93::decode_response(data)?;
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

    fn reset_op(&mut self) {
        self.phase = Phase::None;
        self.collector = None;
        self.plan = None;
        self.images.clear();
        self.steps.clear();
    }

    fn failure_flags(&self) -> NdefFlags {
        self.detect_flags
    }
}
