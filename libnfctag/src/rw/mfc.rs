// libnfctag/src/rw/mfc.rs
//! MIFARE Classic reader/writer.
//!
//! NDEF sectors are found through the MIFARE Application Directory: MAD1
//! in sector 0 and, on 4K cards, MAD2 in sector 16. Every block access is
//! preceded by an authentication whenever the block lies in another sector
//! than the last authenticated one.

use std::collections::{BTreeMap, VecDeque};

use log::{debug, info, trace};

use super::{NdefInfo, RwCtx, RwEvent, RwState, TagHandler};
use crate::addressing::{ByteKind, MemoryMap};
use crate::constants::{TLV_NDEF, TLV_TERMINATOR};
use crate::ndef::{NdefCollector, WritePlan};
use crate::protocol::mfc::{
    self, Key, MfcGeometry, MFC_ACCESS_MAD, MFC_ACCESS_NDEF_RO, MFC_ACCESS_NDEF_RW, MFC_BLOCK_SIZE,
    MFC_KEY_DEFAULT, MFC_KEY_MAD, MFC_KEY_NDEF, MFC_MAD2_SECTOR, MFC_MAD_INFO, MFC_NDEF_AID,
};
use crate::protocol::{mad_crc8, MfcCommand};
use crate::tlv::{max_message_len, NdefTlv, ScanEvent, TlvScanner};
use crate::types::{NdefFlags, Status, TagProtocol};
use crate::{Error, Result};

/// MAD1 spans blocks 1 and 2.
const MAD1_BLOCKS: [u8; 2] = [1, 2];
/// MAD2 spans the three data blocks of sector 16.
const MAD2_BLOCKS: [u8; 3] = [64, 65, 66];
/// Sectors described by MAD1 (sector 0 holds the directory itself).
const MAD1_SECTORS: usize = 16;

/// Why a block is being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadFor {
    Mad,
    Trailer,
    Scan,
    Ndef,
    Step,
}

/// What follows a successful authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Then {
    Read(u8, ReadFor),
    Step,
    Presence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    None,
    Auth { sector: usize, key: Key, then: Then },
    Read { block: u8, purpose: ReadFor },
    WriteRequest { block: u8, data: [u8; 16] },
    WriteData(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Read(u8),
    Write(u8, [u8; 16]),
    WritePlanned { block: u8, invalidated: bool },
}

pub struct Mfc {
    uid: Vec<u8>,
    geometry: MfcGeometry,
    state: RwState,
    phase: Phase,
    /// Last authenticated sector and the key used.
    auth: Option<(usize, Key)>,
    /// Key used to authenticate block steps.
    step_key: Key,
    mad: Vec<u8>,
    ndef_sectors: Vec<usize>,
    trailer_ro: bool,
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
    images: BTreeMap<u8, [u8; 16]>,
    steps: VecDeque<Step>,
}

impl Mfc {
    pub fn new(uid: &[u8], sak: u8) -> Result<Self> {
        if !matches!(uid.len(), 4 | 7) {
            return Err(Error::InvalidLength {
                expected: 4,
                actual: uid.len(),
            });
        }
        Ok(Self {
            uid: uid.to_vec(),
            geometry: MfcGeometry::from_sak(sak)?,
            state: RwState::Idle,
            phase: Phase::None,
            auth: None,
            step_key: MFC_KEY_NDEF,
            mad: Vec::new(),
            ndef_sectors: Vec::new(),
            trailer_ro: false,
            map: MemoryMap::new(MFC_BLOCK_SIZE, 0, 0),
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

    pub fn uid(&self) -> &[u8] {
        &self.uid
    }

    pub fn geometry(&self) -> MfcGeometry {
        self.geometry
    }

    /// Sectors the MAD assigns to NDEF.
    pub fn ndef_sectors(&self) -> &[usize] {
        &self.ndef_sectors
    }

    fn send(&mut self, ctx: &mut RwCtx<'_>, cmd: MfcCommand) -> Result<()> {
        let timeout = ctx.config.mfc_timeout_ms;
        ctx.send(cmd, timeout)
    }

    fn read_key(&self, sector: usize) -> Key {
        if self.geometry.is_mad_sector(sector) {
            MFC_KEY_MAD
        } else {
            MFC_KEY_NDEF
        }
    }

    fn authenticate(&mut self, ctx: &mut RwCtx<'_>, sector: usize, key: Key, then: Then) -> Result<()> {
        trace!("mfc authenticate sector {}", sector);
        self.auth = None;
        self.phase = Phase::Auth { sector, key, then };
        self.send(
            ctx,
            MfcCommand::Authenticate {
                sector: sector as u8,
                key_b: false,
                key,
            },
        )
    }

    fn is_authenticated(&self, block: u8) -> bool {
        let sector = self.geometry.sector_of(block as usize);
        self.auth.is_some_and(|(s, _)| s == sector)
    }

    /// Read `block`, authenticating its sector first when needed.
    fn read(&mut self, ctx: &mut RwCtx<'_>, block: u8, purpose: ReadFor) -> Result<()> {
        if !self.is_authenticated(block) {
            let sector = self.geometry.sector_of(block as usize);
            let key = match purpose {
                ReadFor::Step => self.step_key,
                _ => self.read_key(sector),
            };
            return self.authenticate(ctx, sector, key, Then::Read(block, purpose));
        }
        self.phase = Phase::Read { block, purpose };
        self.send(ctx, MfcCommand::Read { block })
    }

    fn on_read(&mut self, ctx: &mut RwCtx<'_>, block: u8, purpose: ReadFor, data: [u8; 16]) -> Result<()> {
        match purpose {
            ReadFor::Mad => self.on_mad(ctx, block, data),
            ReadFor::Trailer => {
                self.trailer_ro = data[6..9] == MFC_ACCESS_NDEF_RO[..3];
                debug!("mfc ndef trailer access {:02x?}", &data[6..10]);
                let first = self.map.data_start() / MFC_BLOCK_SIZE;
                self.read(ctx, first as u8, ReadFor::Scan)
            }
            ReadFor::Scan => self.on_scan(ctx, block, data),
            ReadFor::Ndef => self.on_ndef_data(ctx, block, data),
            ReadFor::Step => {
                self.images.insert(block, data);
                self.next_step(ctx)
            }
        }
    }

    // ---- detection ----

    fn on_mad(&mut self, ctx: &mut RwCtx<'_>, block: u8, data: [u8; 16]) -> Result<()> {
        self.mad.extend_from_slice(&data);
        let next = MAD1_BLOCKS
            .iter()
            .chain(MAD2_BLOCKS.iter())
            .skip_while(|b| **b != block)
            .nth(1)
            .copied();

        if block == MAD1_BLOCKS[1] {
            check_mad(&self.mad, "mad1")?;
            if self.geometry != MfcGeometry::Classic4k {
                return self.mad_complete(ctx);
            }
        }
        match next {
            Some(next) => self.read(ctx, next, ReadFor::Mad),
            None => {
                check_mad(&self.mad[32..], "mad2")?;
                self.mad_complete(ctx)
            }
        }
    }

    fn mad_complete(&mut self, ctx: &mut RwCtx<'_>) -> Result<()> {
        let sectors = self.geometry.num_sectors();
        let mut ndef_sectors = Vec::new();
        for sector in 1..sectors {
            let entry = if sector < MAD1_SECTORS {
                2 * sector
            } else if sector == MFC_MAD2_SECTOR {
                continue;
            } else {
                32 + 2 * (sector - MFC_MAD2_SECTOR)
            };
            if self.mad.get(entry..entry + 2) == Some(&MFC_NDEF_AID[..]) {
                ndef_sectors.push(sector);
            }
        }
        let (Some(&first), Some(&last)) = (ndef_sectors.first(), ndef_sectors.last()) else {
            return Err(Error::NdefNotFound);
        };
        debug!("mfc ndef sectors {:?}", ndef_sectors);

        let start = self.geometry.first_block(first) * MFC_BLOCK_SIZE;
        let end = (self.geometry.trailer_block(last) + 1) * MFC_BLOCK_SIZE;
        let mut map = MemoryMap::new(MFC_BLOCK_SIZE, start, end);
        for sector in first..=last {
            let first_block = self.geometry.first_block(sector);
            let trailer = self.geometry.trailer_block(sector);
            if ndef_sectors.contains(&sector) {
                map.exclude(
                    trailer * MFC_BLOCK_SIZE..(trailer + 1) * MFC_BLOCK_SIZE,
                    ByteKind::Reserved,
                );
            } else {
                map.exclude(
                    first_block * MFC_BLOCK_SIZE..(trailer + 1) * MFC_BLOCK_SIZE,
                    ByteKind::Reserved,
                );
            }
        }
        self.map = map;
        self.ndef_sectors = ndef_sectors;

        let trailer = self.geometry.trailer_block(first) as u8;
        self.read(ctx, trailer, ReadFor::Trailer)
    }

    fn on_scan(&mut self, ctx: &mut RwCtx<'_>, block: u8, data: [u8; 16]) -> Result<()> {
        let start = block as usize * MFC_BLOCK_SIZE;
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
        match self.map.next_data_offset(start + MFC_BLOCK_SIZE) {
            Some(offset) => self.read(ctx, (offset / MFC_BLOCK_SIZE) as u8, ReadFor::Scan),
            None => {
                self.scanner.finish()?;
                Err(Error::NdefNotFound)
            }
        }
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
        if self.trailer_ro || self.msg_len > self.max_size {
            flags |= NdefFlags::READ_ONLY;
        } else {
            flags |= NdefFlags::SOFT_LOCKABLE;
        }
        self.flags = flags;
        info!(
            "mfc ndef detected: {} of {} bytes in {} sectors",
            self.msg_len,
            self.max_size,
            self.ndef_sectors.len()
        );
        self.complete(
            ctx,
            RwEvent::NdefDetect(NdefInfo {
                status: Status::Ok,
                protocol: TagProtocol::Mfc,
                cur_size: self.msg_len,
                max_size: self.max_size,
                flags,
            }),
        );
        Ok(())
    }

    // ---- read ----

    fn on_ndef_data(&mut self, ctx: &mut RwCtx<'_>, block: u8, data: [u8; 16]) -> Result<()> {
        let collector = self
            .collector
            .as_mut()
            .ok_or_else(|| Error::Refused("no read in progress".into()))?;
        collector.feed(&self.map, block as usize * MFC_BLOCK_SIZE, &data);
        match collector.next_offset() {
            Some(offset) => self.read(ctx, (offset / MFC_BLOCK_SIZE) as u8, ReadFor::Ndef),
            None => {
                let msg = self.collector.take().map(|c| c.into_data()).unwrap_or_default();
                self.complete(ctx, RwEvent::NdefReadComplete(msg));
                Ok(())
            }
        }
    }

    // ---- block steps ----

    fn planned_block(&self, block: u8, invalidated: bool) -> Result<[u8; 16]> {
        let plan = self
            .plan
            .as_ref()
            .ok_or_else(|| Error::Refused("no write in progress".into()))?;
        let planned = plan
            .block(block as usize)
            .ok_or_else(|| Error::Refused(format!("block {} is not planned", block)))?;
        let base = if planned.is_partial(MFC_BLOCK_SIZE) {
            *self
                .images
                .get(&block)
                .ok_or_else(|| Error::Refused(format!("block {} was not read", block)))?
        } else {
            [0; 16]
        };
        let mut out = [0u8; 16];
        out.copy_from_slice(&planned.apply(&base, invalidated));
        Ok(out)
    }

    fn next_step(&mut self, ctx: &mut RwCtx<'_>) -> Result<()> {
        let Some(step) = self.steps.pop_front() else {
            return self.steps_done(ctx);
        };
        let block = match &step {
            Step::Read(b) | Step::Write(b, _) => *b,
            Step::WritePlanned { block, .. } => *block,
        };
        if !self.is_authenticated(block) {
            let sector = self.geometry.sector_of(block as usize);
            self.steps.push_front(step);
            let key = self.step_key;
            return self.authenticate(ctx, sector, key, Then::Step);
        }
        let data = match step {
            Step::Read(block) => return self.read(ctx, block, ReadFor::Step),
            Step::Write(_, data) => data,
            Step::WritePlanned { block, invalidated } => self.planned_block(block, invalidated)?,
        };
        self.phase = Phase::WriteRequest { block, data };
        self.send(ctx, MfcCommand::WriteRequest { block })
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
                info!("mfc ndef updated: {} bytes", self.msg_len);
                self.complete(ctx, RwEvent::NdefUpdateComplete);
            }
            RwState::SetReadOnly => {
                self.trailer_ro = true;
                self.flags |= NdefFlags::READ_ONLY;
                self.flags.remove(NdefFlags::SOFT_LOCKABLE);
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

    fn format_steps(&self) -> VecDeque<Step> {
        let sectors = self.geometry.num_sectors();
        let mut steps = VecDeque::new();
        let mad_trailer = mfc::trailer(&MFC_KEY_MAD, &MFC_ACCESS_MAD, &MFC_KEY_DEFAULT);

        let mut mad1 = [0u8; 32];
        mad1[1] = MFC_MAD_INFO;
        for sector in 1..sectors.min(MAD1_SECTORS) {
            mad1[2 * sector..2 * sector + 2].copy_from_slice(&MFC_NDEF_AID);
        }
        mad1[0] = mad_crc8(&mad1[1..]);
        for (block, chunk) in MAD1_BLOCKS.iter().zip(mad1.chunks(MFC_BLOCK_SIZE)) {
            steps.push_back(Step::Write(*block, to_block(chunk)));
        }
        steps.push_back(Step::Write(3, mad_trailer));

        if self.geometry == MfcGeometry::Classic4k {
            let mut mad2 = [0u8; 48];
            for sector in MFC_MAD2_SECTOR + 1..sectors {
                let entry = 2 * (sector - MFC_MAD2_SECTOR);
                mad2[entry..entry + 2].copy_from_slice(&MFC_NDEF_AID);
            }
            mad2[0] = mad_crc8(&mad2[1..]);
            for (block, chunk) in MAD2_BLOCKS.iter().zip(mad2.chunks(MFC_BLOCK_SIZE)) {
                steps.push_back(Step::Write(*block, to_block(chunk)));
            }
            steps.push_back(Step::Write(
                self.geometry.trailer_block(MFC_MAD2_SECTOR) as u8,
                mad_trailer,
            ));
        }

        let ndef_trailer = mfc::trailer(&MFC_KEY_NDEF, &MFC_ACCESS_NDEF_RW, &MFC_KEY_DEFAULT);
        for sector in (1..sectors).filter(|s| !self.geometry.is_mad_sector(*s)) {
            if sector == 1 {
                let mut first = [0u8; 16];
                first[..3].copy_from_slice(&[TLV_NDEF, 0x00, TLV_TERMINATOR]);
                steps.push_back(Step::Write(self.geometry.first_block(1) as u8, first));
            }
            steps.push_back(Step::Write(
                self.geometry.trailer_block(sector) as u8,
                ndef_trailer,
            ));
        }
        steps
    }
}

fn check_mad(mad: &[u8], name: &str) -> Result<()> {
    let crc = mad_crc8(&mad[1..]);
    if crc != mad[0] {
        return Err(Error::InvalidCc(format!(
            "{} crc {:#04x}, computed {:#04x}",
            name, mad[0], crc
        )));
    }
    Ok(())
}

fn to_block(chunk: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..chunk.len()].copy_from_slice(chunk);
    out
}

impl TagHandler for Mfc {
    fn protocol(&self) -> TagProtocol {
        TagProtocol::Mfc
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
        self.mad.clear();
        self.ndef_sectors.clear();
        self.trailer_ro = false;
        self.msg_len = 0;
        self.max_size = 0;
        self.auth = None;
        self.state = RwState::DetectNdef;
        self.read(ctx, MAD1_BLOCKS[0], ReadFor::Mad)
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
                self.read(ctx, (offset / MFC_BLOCK_SIZE) as u8, ReadFor::Ndef)
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
        steps.extend(plan.partial_blocks().into_iter().map(|b| Step::Read(b as u8)));
        steps.extend(plan.block_numbers().into_iter().map(|b| Step::WritePlanned {
            block: b as u8,
            invalidated: true,
        }));
        steps.extend(plan.length_blocks().into_iter().map(|b| Step::WritePlanned {
            block: b as u8,
            invalidated: false,
        }));
        debug!("mfc write of {} bytes in {} steps", msg.len(), steps.len());

        self.images.clear();
        self.plan = Some(plan);
        self.steps = steps;
        self.step_key = MFC_KEY_NDEF;
        self.state = RwState::WriteNdef;
        self.next_step(ctx)
    }

    fn set_read_only(&mut self, ctx: &mut RwCtx<'_>, hard_lock: bool) -> Result<()> {
        if self.ndef.is_none() {
            return Err(Error::NotInitialized);
        }
        if hard_lock {
            return Err(Error::NotSupported("mifare classic hard lock".into()));
        }
        let trailer = mfc::trailer(&MFC_KEY_NDEF, &MFC_ACCESS_NDEF_RO, &MFC_KEY_DEFAULT);
        self.steps = self
            .ndef_sectors
            .iter()
            .map(|s| Step::Write(self.geometry.trailer_block(*s) as u8, trailer))
            .collect();
        self.step_key = MFC_KEY_NDEF;
        self.state = RwState::SetReadOnly;
        self.next_step(ctx)
    }

    fn format_ndef(&mut self, ctx: &mut RwCtx<'_>) -> Result<()> {
        self.steps = self.format_steps();
        self.step_key = MFC_KEY_DEFAULT;
        self.auth = None;
        self.state = RwState::Format;
        self.next_step(ctx)
    }

    fn presence_check(&mut self, ctx: &mut RwCtx<'_>) -> Result<()> {
        self.state = RwState::PresenceCheck;
        let (sector, key) = self.auth.unwrap_or((0, MFC_KEY_MAD));
        self.authenticate(ctx, sector, key, Then::Presence)
    }

    fn on_response(&mut self, ctx: &mut RwCtx<'_>, data: &[u8]) -> Result<()> {
        match self.phase {
            Phase::None => Err(Error::Refused("unexpected mfc response".into())),
            Phase::Auth { sector, key, then } => {
                if then == Then::Presence {
                    if mfc::decode_auth(data).is_ok() {
                        self.auth = Some((sector, key));
                    }
                    self.complete(ctx, RwEvent::PresenceCheck(Status::Ok));
                    return Ok(());
                }
                mfc::decode_auth(data)?;
                self.auth = Some((sector, key));
                match then {
                    Then::Read(block, purpose) => self.read(ctx, block, purpose),
                    Then::Step | Then::Presence => self.next_step(ctx),
                }
            }
            Phase::Read { block, purpose } => {
                let block_data = mfc::decode_read(data)?;
                self.on_read(ctx, block, purpose, block_data)
            }
            Phase::WriteRequest { block, data: payload } => {
                mfc::decode_ack(data)?;
                self.phase = Phase::WriteData(block);
                self.send(ctx, MfcCommand::WriteData { data: payload })
            }
            Phase::WriteData(block) => {
                mfc::decode_ack(data)?;
                trace!("mfc block {} written", block);
                self.next_step(ctx)
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
