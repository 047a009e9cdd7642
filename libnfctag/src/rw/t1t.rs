// libnfctag/src/rw/t1t.rs
//! Type 1 Tag reader/writer.
//!
//! The tag is small enough to mirror: detection issues RALL for the first
//! 120 bytes and keeps the result as a memory image. Dynamic memory tags
//! load the rest of their image on demand, one READ8 block inside segment
//! 0 or one RSEG segment beyond it. NDEF writes invalidate the magic number
//! first and restore it last, so no length zeroing is needed.

use std::collections::{BTreeMap, VecDeque};
use std::mem;

use log::{debug, info, warn};

use super::{NdefInfo, RwCtx, RwEvent, RwState, TagHandler};
use crate::addressing::{ByteKind, MemoryMap};
use crate::constants::{
    CC_ACCESS_RO, CC_ACCESS_RW, CC_VERSION_1_0, CC_VERSION_MAJOR, NDEF_MAGIC_NUMBER, TLV_LOCK_CONTROL,
    TLV_MEMORY_CONTROL, TLV_NDEF, TLV_TERMINATOR,
};
use crate::ndef::{NdefCollector, WritePlan};
use crate::protocol::t1t::{
    self, T1T_BLOCK_SIZE, T1T_CC_NMN_OFFSET, T1T_CC_RWA_OFFSET, T1T_DATA_START,
    T1T_DEFAULT_LOCK_TLV, T1T_DEFAULT_MEM_TLV, T1T_DYNAMIC_RESERVED, T1T_NDEF_SUPPORTED_HR0,
    T1T_STATIC_HR0, T1T_STATIC_LOCK0, T1T_STATIC_LOCK1, T1T_STATIC_RESERVED, T1T_STATIC_SIZE,
    T1T_TOPAZ512_HR0, Uid,
};
use crate::protocol::T1tCommand;
use crate::tlv::{
    max_message_len, LockControlTlv, LockTable, MemoryControlTlv, NdefTlv, ScanEvent, TlvScanner,
};
use crate::types::{NdefFlags, Status, TagProtocol};
use crate::{Error, Result};

const SEGMENT_SIZE: usize = 128;
const BLOCKS_PER_SEGMENT: usize = SEGMENT_SIZE / T1T_BLOCK_SIZE;
/// Start of the area covered by dynamic lock bits.
const DYNAMIC_AREA_START: usize = 0x80;
/// Highest block reachable with single byte addressing.
const MAX_BYTE_ADDRESSED_BLOCK: u8 = 0x0F;

const TMS_STATIC: u8 = 0x0E;
const TMS_TOPAZ512: u8 = 0x3F;

/// What to resume once a missing part of the image is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum After {
    Scan,
    Locks,
    Read,
    Write,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    None,
    Rall,
    LoadBlock { block: u8, then: After },
    LoadSegment { segment: u8, then: After },
    Step(T1tCommand),
    Presence,
    RawRead { block: u8, add: u8 },
    RawWrite { block: u8, add: u8 },
}

pub struct T1t {
    hr: [u8; 2],
    uid: Uid,
    state: RwState,
    phase: Phase,
    mem: Vec<u8>,
    /// Per block: image content is valid.
    loaded: Vec<bool>,
    cc: [u8; 4],
    map: MemoryMap,
    locks: LockTable,
    scanner: TlvScanner,
    scan_pos: usize,
    ndef: Option<NdefTlv>,
    msg_offset: usize,
    msg_len: usize,
    max_size: usize,
    flags: NdefFlags,
    detect_flags: NdefFlags,
    plan: Option<WritePlan>,
    steps: VecDeque<T1tCommand>,
}

impl T1t {
    pub fn new(hr: [u8; 2], uid: &[u8]) -> Result<Self> {
        if uid.len() < t1t::T1T_UID_LEN {
            return Err(Error::InvalidLength {
                expected: t1t::T1T_UID_LEN,
                actual: uid.len(),
            });
        }
        let mut id = [0u8; t1t::T1T_UID_LEN];
        id.copy_from_slice(&uid[..t1t::T1T_UID_LEN]);
        Ok(Self {
            hr,
            uid: id,
            state: RwState::Idle,
            phase: Phase::None,
            mem: Vec::new(),
            loaded: Vec::new(),
            cc: [0; 4],
            map: MemoryMap::new(T1T_BLOCK_SIZE, T1T_DATA_START, T1T_DATA_START),
            locks: LockTable::default(),
            scanner: TlvScanner::new(),
            scan_pos: T1T_DATA_START,
            ndef: None,
            msg_offset: 0,
            msg_len: 0,
            max_size: 0,
            flags: NdefFlags::NONE,
            detect_flags: NdefFlags::NONE,
            plan: None,
            steps: VecDeque::new(),
        })
    }

    fn is_dynamic(&self) -> bool {
        self.hr[0] != T1T_STATIC_HR0
    }

    fn is_loaded(&self, offset: usize) -> bool {
        self.loaded
            .get(offset / T1T_BLOCK_SIZE)
            .copied()
            .unwrap_or(false)
    }

    fn send(&mut self, ctx: &mut RwCtx<'_>, cmd: T1tCommand) -> Result<()> {
        let timeout = ctx.config.t1t_timeout_ms;
        ctx.send(cmd, timeout)
    }

    /// Fetch the part of the image holding `offset`.
    fn load(&mut self, ctx: &mut RwCtx<'_>, offset: usize, then: After) -> Result<()> {
        let uid = self.uid;
        if offset < SEGMENT_SIZE {
            let block = (offset / T1T_BLOCK_SIZE) as u8;
            self.phase = Phase::LoadBlock { block, then };
            self.send(ctx, T1tCommand::Read8 { uid, block })
        } else {
            let segment = (offset / SEGMENT_SIZE) as u8;
            self.phase = Phase::LoadSegment { segment, then };
            self.send(ctx, T1tCommand::Rseg { uid, segment })
        }
    }

    fn store(&mut self, start: usize, bytes: &[u8]) {
        let end = (start + bytes.len()).min(self.mem.len());
        if start >= end {
            return;
        }
        self.mem[start..end].copy_from_slice(&bytes[..end - start]);
        for block in start / T1T_BLOCK_SIZE..end.div_ceil(T1T_BLOCK_SIZE) {
            self.loaded[block] = true;
        }
    }

    fn resume(&mut self, ctx: &mut RwCtx<'_>, then: After) -> Result<()> {
        match then {
            After::Scan => self.scan(ctx),
            After::Locks => self.read_locks(ctx),
            After::Read => self.continue_read(ctx),
            After::Write => self.start_write(ctx),
        }
    }

    // ---- detection ----

    fn on_rall(&mut self, ctx: &mut RwCtx<'_>, rsp: &[u8]) -> Result<()> {
        let (hr, bytes) = t1t::decode_rall(rsp)?;
        if hr != self.hr {
            warn!("t1t: RALL header ROM {:02x?} differs from activation {:02x?}", hr, self.hr);
        }
        self.mem = vec![0; T1T_STATIC_SIZE];
        self.loaded = vec![false; T1T_STATIC_SIZE / T1T_BLOCK_SIZE];
        self.store(0, bytes);

        self.cc.copy_from_slice(&self.mem[T1T_CC_NMN_OFFSET..T1T_CC_RWA_OFFSET + 1]);
        if self.cc == [0; 4] {
            self.detect_flags = NdefFlags::SUPPORTED | NdefFlags::FORMATABLE;
            return Err(Error::InvalidCc("capability container is blank".into()));
        }
        if self.cc[0] != NDEF_MAGIC_NUMBER {
            return Err(Error::InvalidCc(format!("magic number {:#04x}", self.cc[0])));
        }
        if self.cc[1] >> 4 > CC_VERSION_MAJOR {
            return Err(Error::InvalidCc(format!("mapping version {:#04x}", self.cc[1])));
        }
        if self.cc[3] != CC_ACCESS_RW && self.cc[3] != CC_ACCESS_RO {
            return Err(Error::InvalidCc(format!("access condition {:#04x}", self.cc[3])));
        }

        let size = (self.cc[2] as usize + 1) * T1T_BLOCK_SIZE;
        if self.is_dynamic() {
            let image = size.max(SEGMENT_SIZE);
            self.mem.resize(image, 0);
            self.loaded.resize(image / T1T_BLOCK_SIZE, false);
        }
        self.map = MemoryMap::new(T1T_BLOCK_SIZE, T1T_DATA_START, size.min(self.mem.len()));
        self.map.exclude(T1T_STATIC_LOCK0..T1T_STATIC_LOCK1 + 1, ByteKind::Lock);
        if self.is_dynamic() {
            self.map.exclude(T1T_DYNAMIC_RESERVED, ByteKind::Reserved);
        } else {
            self.map.exclude(T1T_STATIC_RESERVED, ByteKind::Reserved);
        }
        self.locks = LockTable::new(DYNAMIC_AREA_START);
        debug!(
            "t1t cc {:02x?}, {} bytes, {} memory",
            self.cc,
            size,
            if self.is_dynamic() { "dynamic" } else { "static" }
        );

        self.scan_pos = T1T_DATA_START;
        self.scan(ctx)
    }

    fn scan(&mut self, ctx: &mut RwCtx<'_>) -> Result<()> {
        while self.scan_pos < self.map.data_end() && !self.scanner.is_done() {
            let offset = self.scan_pos;
            if !self.is_loaded(offset) {
                return self.load(ctx, offset, After::Scan);
            }
            self.scan_pos += 1;
            if !self.map.is_data(offset) {
                continue;
            }
            match self.scanner.feed(offset, self.mem[offset])? {
                ScanEvent::LockControl(tlv) => {
                    debug!("t1t lock control {:?}", tlv);
                    self.locks.add_lock_control(tlv);
                    self.map.exclude(tlv.range(), ByteKind::Lock);
                }
                ScanEvent::MemoryControl(tlv) => {
                    debug!("t1t memory control {:?}", tlv);
                    self.locks.add_memory_control(tlv);
                    self.map.exclude(tlv.range(), ByteKind::Reserved);
                }
                ScanEvent::Ndef(tlv) => self.ndef = Some(tlv),
                ScanEvent::Terminator | ScanEvent::NeedMore => {}
            }
        }
        if self.ndef.is_none() {
            self.scanner.finish()?;
            return Err(Error::NdefNotFound);
        }
        self.read_locks(ctx)
    }

    fn read_locks(&mut self, ctx: &mut RwCtx<'_>) -> Result<()> {
        if self.is_dynamic() && !self.locks.has_lock_controls() {
            let lock = LockControlTlv::from_value(&T1T_DEFAULT_LOCK_TLV)?;
            let reserved = MemoryControlTlv::from_value(&T1T_DEFAULT_MEM_TLV)?;
            debug!("t1t: no control tlvs, assuming {:?} and {:?}", lock, reserved);
            self.locks.add_lock_control(lock);
            self.locks.add_memory_control(reserved);
            self.map.exclude(lock.range(), ByteKind::Lock);
            self.map.exclude(reserved.range(), ByteKind::Reserved);
        }
        for offset in self.locks.unread_offsets() {
            if offset >= self.mem.len() {
                // lock byte outside the tag memory, count it as clear
                self.locks.record(offset, 0);
                continue;
            }
            if !self.is_loaded(offset) {
                return self.load(ctx, offset, After::Locks);
            }
            self.locks.record(offset, self.mem[offset]);
        }
        self.detect_complete(ctx)
    }

    fn is_locked(&self, header_offset: usize) -> bool {
        if self.cc[3] == CC_ACCESS_RO {
            return true;
        }
        if self.mem[T1T_STATIC_LOCK0] == 0xFF && self.mem[T1T_STATIC_LOCK1] == 0xFF {
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
        info!("t1t ndef detected: {} of {} bytes", self.msg_len, self.max_size);
        self.complete(
            ctx,
            RwEvent::NdefDetect(NdefInfo {
                status: Status::Ok,
                protocol: TagProtocol::T1t,
                cur_size: self.msg_len,
                max_size: self.max_size,
                flags,
            }),
        );
        Ok(())
    }

    // ---- read ----

    fn continue_read(&mut self, ctx: &mut RwCtx<'_>) -> Result<()> {
        let missing = self
            .map
            .data_offsets(self.msg_offset)
            .take(self.msg_len)
            .find(|o| !self.is_loaded(*o));
        if let Some(offset) = missing {
            return self.load(ctx, offset, After::Read);
        }
        let mut collector = NdefCollector::new(&self.map, self.msg_offset, self.msg_len)?;
        collector.feed(&self.map, 0, &self.mem);
        self.complete(ctx, RwEvent::NdefReadComplete(collector.into_data()));
        Ok(())
    }

    // ---- write ----

    fn start_write(&mut self, ctx: &mut RwCtx<'_>) -> Result<()> {
        let plan = self
            .plan
            .as_ref()
            .ok_or_else(|| Error::Refused("no write in progress".into()))?;
        let missing = plan
            .blocks()
            .filter(|b| b.is_partial(T1T_BLOCK_SIZE))
            .map(|b| b.block * T1T_BLOCK_SIZE)
            .find(|o| !self.is_loaded(*o));
        if let Some(offset) = missing {
            return self.load(ctx, offset, After::Write);
        }

        let uid = self.uid;
        let mut steps = VecDeque::new();
        steps.push_back(T1tCommand::WriteE {
            uid,
            add: T1T_CC_NMN_OFFSET as u8,
            data: 0x00,
        });
        for planned in plan.blocks() {
            let start = planned.block * T1T_BLOCK_SIZE;
            let whole = (start..start + T1T_BLOCK_SIZE).all(|o| self.map.is_data(o));
            if self.is_dynamic() && (planned.block > MAX_BYTE_ADDRESSED_BLOCK as usize || whole) {
                let mut data = [0u8; 8];
                data.copy_from_slice(&planned.apply(&self.mem[start..start + T1T_BLOCK_SIZE], false));
                steps.push_back(T1tCommand::WriteE8 {
                    uid,
                    block: planned.block as u8,
                    data,
                });
            } else {
                for b in &planned.bytes {
                    steps.push_back(T1tCommand::WriteE {
                        uid,
                        add: (start + b.index) as u8,
                        data: b.value,
                    });
                }
            }
        }
        steps.push_back(T1tCommand::WriteE {
            uid,
            add: T1T_CC_NMN_OFFSET as u8,
            data: NDEF_MAGIC_NUMBER,
        });
        debug!("t1t write in {} commands", steps.len());
        self.steps = steps;
        self.next_step(ctx)
    }

    fn next_step(&mut self, ctx: &mut RwCtx<'_>) -> Result<()> {
        match self.steps.pop_front() {
            Some(cmd) => {
                self.phase = Phase::Step(cmd.clone());
                self.send(ctx, cmd)
            }
            None => self.steps_done(ctx),
        }
    }

    fn check_step(cmd: &T1tCommand, rsp: &[u8]) -> Result<()> {
        match cmd {
            T1tCommand::WriteE { add, data, .. } => {
                let got = t1t::decode_byte(rsp, *add)?;
                if got != *data {
                    return Err(Error::TagError(got));
                }
                Ok(())
            }
            T1tCommand::WriteNe { add, .. } => t1t::decode_byte(rsp, *add).map(drop),
            T1tCommand::WriteE8 { block, data, .. } => {
                if t1t::decode_block(rsp, *block)? != *data {
                    return Err(Error::Refused(format!("block {:#04x} not written", block)));
                }
                Ok(())
            }
            T1tCommand::WriteNe8 { block, .. } => t1t::decode_block(rsp, *block).map(drop),
            other => Err(Error::Refused(format!("{:?} is not a write", other))),
        }
    }

    fn steps_done(&mut self, ctx: &mut RwCtx<'_>) -> Result<()> {
        match self.state {
            RwState::WriteNdef => {
                let plan = self
                    .plan
                    .take()
                    .ok_or_else(|| Error::Refused("no write in progress".into()))?;
                for planned in plan.blocks() {
                    for b in &planned.bytes {
                        self.mem[planned.block * T1T_BLOCK_SIZE + b.index] = b.value;
                    }
                }
                self.msg_offset = plan.msg_offset;
                self.msg_len = plan.msg_len;
                if let Some(tlv) = self.ndef.as_mut() {
                    tlv.msg_len = plan.msg_len;
                    tlv.length_field_size = plan.length_field_size;
                    tlv.last_length_offset = plan.msg_offset.saturating_sub(1);
                }
                info!("t1t ndef updated: {} bytes", self.msg_len);
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
                return Err(Error::Refused(format!("no write steps expected in {:?}", other)));
            }
        }
        Ok(())
    }

    // ---- raw access ----

    pub(crate) fn read_byte(&mut self, ctx: &mut RwCtx<'_>, block: u8, byte: u8) -> Result<()> {
        if block > MAX_BYTE_ADDRESSED_BLOCK || byte as usize >= T1T_BLOCK_SIZE {
            return Err(Error::Refused(format!("t1t address {}/{}", block, byte)));
        }
        let add = t1t::address(block, byte);
        self.state = RwState::ReadBlock(block as u16);
        self.phase = Phase::RawRead { block, add };
        let uid = self.uid;
        self.send(ctx, T1tCommand::Read { uid, add })
    }

    pub(crate) fn write_byte(
        &mut self,
        ctx: &mut RwCtx<'_>,
        block: u8,
        byte: u8,
        value: u8,
        erase: bool,
    ) -> Result<()> {
        if block > MAX_BYTE_ADDRESSED_BLOCK || byte as usize >= T1T_BLOCK_SIZE {
            return Err(Error::Refused(format!("t1t address {}/{}", block, byte)));
        }
        let add = t1t::address(block, byte);
        self.state = RwState::WriteBlock(block as u16);
        self.phase = Phase::RawWrite { block, add };
        let uid = self.uid;
        let cmd = if erase {
            T1tCommand::WriteE {
                uid,
                add,
                data: value,
            }
        } else {
            T1tCommand::WriteNe {
                uid,
                add,
                data: value,
            }
        };
        self.send(ctx, cmd)
    }
}

impl TagHandler for T1t {
    fn protocol(&self) -> TagProtocol {
        TagProtocol::T1t
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
        if self.hr[0] & 0xF0 != T1T_NDEF_SUPPORTED_HR0 {
            return Err(Error::NotSupported(format!("t1t HR0 {:#04x}", self.hr[0])));
        }
        self.state = RwState::DetectNdef;
        self.phase = Phase::Rall;
        let uid = self.uid;
        self.send(ctx, T1tCommand::Rall { uid })
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
        self.state = RwState::ReadNdef;
        self.continue_read(ctx)
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
        self.plan = Some(WritePlan::new(&self.map, tlv.header_offset, msg)?);
        self.state = RwState::WriteNdef;
        self.start_write(ctx)
    }

    fn set_read_only(&mut self, ctx: &mut RwCtx<'_>, hard_lock: bool) -> Result<()> {
        if self.ndef.is_none() {
            return Err(Error::NotInitialized);
        }
        let uid = self.uid;
        let mut steps = VecDeque::new();
        steps.push_back(T1tCommand::WriteE {
            uid,
            add: T1T_CC_RWA_OFFSET as u8,
            data: CC_ACCESS_RO,
        });
        if hard_lock {
            for add in [T1T_STATIC_LOCK0, T1T_STATIC_LOCK1] {
                steps.push_back(T1tCommand::WriteNe {
                    uid,
                    add: add as u8,
                    data: 0xFF,
                });
            }
            let mut segmented: BTreeMap<u8, [u8; 8]> = BTreeMap::new();
            for (offset, value) in self.locks.hard_lock_values() {
                if offset < SEGMENT_SIZE {
                    steps.push_back(T1tCommand::WriteNe {
                        uid,
                        add: offset as u8,
                        data: value,
                    });
                } else {
                    segmented.entry((offset / T1T_BLOCK_SIZE) as u8).or_default()
                        [offset % T1T_BLOCK_SIZE] = value;
                }
            }
            for (block, data) in segmented {
                steps.push_back(T1tCommand::WriteNe8 { uid, block, data });
            }
        }
        self.steps = steps;
        self.state = RwState::SetReadOnly;
        self.next_step(ctx)
    }

    fn format_ndef(&mut self, ctx: &mut RwCtx<'_>) -> Result<()> {
        let (tms, tlvs): (u8, &[u8]) = match self.hr[0] {
            T1T_STATIC_HR0 => (TMS_STATIC, &[TLV_NDEF, 0x00, TLV_TERMINATOR][..]),
            T1T_TOPAZ512_HR0 => (
                TMS_TOPAZ512,
                &[
                    TLV_LOCK_CONTROL,
                    0x03,
                    T1T_DEFAULT_LOCK_TLV[0],
                    T1T_DEFAULT_LOCK_TLV[1],
                    T1T_DEFAULT_LOCK_TLV[2],
                    TLV_MEMORY_CONTROL,
                    0x03,
                    T1T_DEFAULT_MEM_TLV[0],
                    T1T_DEFAULT_MEM_TLV[1],
                    T1T_DEFAULT_MEM_TLV[2],
                    TLV_NDEF,
                    0x00,
                    TLV_TERMINATOR,
                ][..],
            ),
            other => {
                return Err(Error::NotSupported(format!("t1t format for HR0 {:#04x}", other)));
            }
        };
        if self.ndef.is_some() && self.cc[3] == CC_ACCESS_RO {
            return Err(Error::Refused("tag is read only".into()));
        }

        let uid = self.uid;
        let cc = [NDEF_MAGIC_NUMBER, CC_VERSION_1_0, tms, CC_ACCESS_RW];
        self.steps = cc
            .iter()
            .chain(tlvs.iter())
            .enumerate()
            .map(|(i, data)| T1tCommand::WriteE {
                uid,
                add: (T1T_CC_NMN_OFFSET + i) as u8,
                data: *data,
            })
            .collect();
        self.state = RwState::Format;
        self.next_step(ctx)
    }

    fn presence_check(&mut self, ctx: &mut RwCtx<'_>) -> Result<()> {
        self.state = RwState::PresenceCheck;
        self.phase = Phase::Presence;
        let timeout = ctx.config.presence_check_timeout_ms;
        ctx.send(T1tCommand::Rid, timeout)
    }

    fn on_response(&mut self, ctx: &mut RwCtx<'_>, rsp: &[u8]) -> Result<()> {
        match mem::replace(&mut self.phase, Phase::None) {
            Phase::None => Err(Error::Refused("unexpected t1t response".into())),
            Phase::Rall => self.on_rall(ctx, rsp),
            Phase::LoadBlock { block, then } => {
                let data = t1t::decode_block(rsp, block)?;
                self.store(block as usize * T1T_BLOCK_SIZE, &data);
                self.resume(ctx, then)
            }
            Phase::LoadSegment { segment, then } => {
                let data = t1t::decode_segment(rsp, segment)?.to_vec();
                self.store(segment as usize * SEGMENT_SIZE, &data);
                debug!(
                    "t1t segment {} loaded ({} blocks)",
                    segment, BLOCKS_PER_SEGMENT
                );
                self.resume(ctx, then)
            }
            Phase::Step(cmd) => {
                Self::check_step(&cmd, rsp)?;
                self.next_step(ctx)
            }
            Phase::Presence => {
                t1t::decode_rid(rsp)?;
                self.complete(ctx, RwEvent::PresenceCheck(Status::Ok));
                Ok(())
            }
            Phase::RawRead { block, add } => {
                let value = t1t::decode_byte(rsp, add)?;
                self.complete(
                    ctx,
                    RwEvent::BlockData {
                        status: Status::Ok,
                        block: block as u16,
                        data: vec![value],
                    },
                );
                Ok(())
            }
            Phase::RawWrite { block, add } => {
                t1t::decode_byte(rsp, add)?;
                self.complete(
                    ctx,
                    RwEvent::BlockWritten {
                        status: Status::Ok,
                        block: block as u16,
                    },
                );
                Ok(())
            }
        }
    }

    fn reset_op(&mut self) {
        self.phase = Phase::None;
        self.plan = None;
        self.steps.clear();
    }

    fn failure_flags(&self) -> NdefFlags {
        self.detect_flags
    }
}
