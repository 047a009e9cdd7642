// libnfctag/src/test_support.rs
//! Test support helpers intended for use by unit and integration tests.
//!
//! Memory backed tag simulators answer the frames a [`ReaderWriter`]
//! sends. [`Loopback`] shuttles frames between a reader and a simulator,
//! and [`CeLoopback`] connects a reader to a [`CardEmulator`], so a whole
//! NDEF operation runs to completion in one call.
#![allow(dead_code)]

use crate::ce::CardEmulator;
use crate::config::{CeConfig, RwConfig};
use crate::protocol::i93::{
    I93_CMD_GET_SYS_INFO, I93_CMD_LOCK_BLOCK, I93_CMD_READ_MULTI_BLOCK, I93_CMD_READ_SINGLE_BLOCK,
    I93_CMD_WRITE_SINGLE_BLOCK, I93_FLAG_PROT_EXT, I93_INFO_FLAG_MEM_SIZE, SystemInfo,
};
use crate::protocol::mfc::{
    self, MFC_ACK, MFC_AUTH, MFC_BLOCK_SIZE, MFC_CMD_READ, MFC_CMD_WRITE, MFC_KEY_DEFAULT,
    MFC_XCHG_DATA, MfcGeometry,
};
use crate::protocol::t1t::{
    T1T_BLOCK_SIZE, T1T_CMD_RALL, T1T_CMD_READ, T1T_CMD_READ8, T1T_CMD_RID, T1T_CMD_RSEG,
    T1T_CMD_WRITE_E, T1T_CMD_WRITE_E8, T1T_CMD_WRITE_NE, T1T_CMD_WRITE_NE8, T1T_STATIC_SIZE,
};
use crate::protocol::t2t::{
    T2T_ACK, T2T_BLOCK_SIZE, T2T_CMD_READ, T2T_CMD_SECTOR_SELECT, T2T_CMD_WRITE, T2T_READ_SIZE,
};
use crate::rw::{ReaderWriter, RwEvent};
use crate::transport::{MockTimer, MockTransport};
use crate::Result;

/// Frames a reader may exchange before a loop is considered runaway.
const MAX_EXCHANGES: usize = 4096;

/// Something answering reader frames: `None` means the tag stays silent.
pub trait TagSim {
    fn respond(&mut self, frame: &[u8]) -> Option<Vec<u8>>;
}

impl<F> TagSim for F
where
    F: FnMut(&[u8]) -> Option<Vec<u8>>,
{
    fn respond(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        self(frame)
    }
}

/// Copy `bytes` into `mem` at `offset`, growing nothing.
fn load(mem: &mut [u8], offset: usize, bytes: &[u8]) {
    mem[offset..offset + bytes.len()].copy_from_slice(bytes);
}

/// `len` bytes of `mem` from `offset`, zero padded past the end.
fn window(mem: &[u8], offset: usize, len: usize) -> Vec<u8> {
    (offset..offset + len)
        .map(|o| mem.get(o).copied().unwrap_or(0))
        .collect()
}

// ---- Type 1 ----

/// Topaz style tag: byte addressed commands map straight onto `mem`.
#[derive(Debug, Clone)]
pub struct T1tSim {
    pub hr: [u8; 2],
    pub uid: [u8; 4],
    pub mem: Vec<u8>,
}

impl T1tSim {
    /// Static memory tag (HR0 0x11) with an NDEF capability container and
    /// `data` laid out from byte 12.
    pub fn static_tag(uid: [u8; 4], data: &[u8]) -> Self {
        let mut mem = vec![0u8; 0x80];
        load(&mut mem, 0, &uid);
        load(&mut mem, 8, &[0xE1, 0x10, 0x0E, 0x00]);
        load(&mut mem, 12, data);
        Self {
            hr: [0x11, 0x48],
            uid,
            mem,
        }
    }

    /// Topaz 512 (HR0 0x12) with 512 bytes of dynamic memory, blank lock
    /// and reserved bytes and `data` laid out from byte 12.
    pub fn dynamic_tag(uid: [u8; 4], data: &[u8]) -> Self {
        let mut mem = vec![0u8; 0x200];
        load(&mut mem, 0, &uid);
        load(&mut mem, 8, &[0xE1, 0x10, 0x3F, 0x00]);
        load(&mut mem, 12, data);
        Self {
            hr: [0x12, 0x4C],
            uid,
            mem,
        }
    }
}

impl TagSim for T1tSim {
    fn respond(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        let op = *frame.first()?;
        let add = *frame.get(1)? as usize;
        match op {
            T1T_CMD_RID => {
                let mut rsp = self.hr.to_vec();
                rsp.extend_from_slice(&self.uid);
                Some(rsp)
            }
            T1T_CMD_RALL => {
                let mut rsp = self.hr.to_vec();
                rsp.extend(window(&self.mem, 0, T1T_STATIC_SIZE));
                Some(rsp)
            }
            T1T_CMD_READ => Some(vec![add as u8, *self.mem.get(add)?]),
            T1T_CMD_WRITE_E | T1T_CMD_WRITE_NE => {
                let value = *frame.get(2)?;
                let cell = self.mem.get_mut(add)?;
                if op == T1T_CMD_WRITE_E {
                    *cell = value;
                } else {
                    *cell |= value;
                }
                Some(vec![add as u8, *cell])
            }
            T1T_CMD_RSEG => {
                let mut rsp = vec![add as u8];
                rsp.extend(window(&self.mem, (add >> 4) * 128, 128));
                Some(rsp)
            }
            T1T_CMD_READ8 => {
                let mut rsp = vec![add as u8];
                rsp.extend(window(&self.mem, add * T1T_BLOCK_SIZE, T1T_BLOCK_SIZE));
                Some(rsp)
            }
            T1T_CMD_WRITE_E8 | T1T_CMD_WRITE_NE8 => {
                let data = frame.get(2..2 + T1T_BLOCK_SIZE)?;
                let start = add * T1T_BLOCK_SIZE;
                let block = self.mem.get_mut(start..start + T1T_BLOCK_SIZE)?;
                for (dst, src) in block.iter_mut().zip(data) {
                    *dst = if op == T1T_CMD_WRITE_E8 { *src } else { *dst | *src };
                }
                let mut rsp = vec![add as u8];
                rsp.extend_from_slice(block);
                Some(rsp)
            }
            _ => None,
        }
    }
}

// ---- Type 2 ----

/// Type 2 tag with SECTOR SELECT support. Writes to blocks listed in
/// `protected` are NACKed.
#[derive(Debug, Clone)]
pub struct T2tSim {
    pub mem: Vec<u8>,
    pub protected: Vec<u16>,
    sector: u8,
    selecting: bool,
}

impl T2tSim {
    /// Tag with the 7 byte `uid`, capability container `cc` and `data`
    /// from block 4. Memory covers the data area plus one spare block
    /// group for dynamic lock bytes.
    pub fn new(uid: &[u8], cc: [u8; 4], data: &[u8]) -> Self {
        let size = 16 + cc[2] as usize * 8 + 16;
        let mut mem = vec![0u8; size.max(64)];
        load(&mut mem, 0, &uid[..3]);
        load(&mut mem, 4, &uid[3..uid.len().min(7)]);
        load(&mut mem, 12, &cc);
        load(&mut mem, 16, data);
        Self::with_memory(mem)
    }

    pub fn with_memory(mem: Vec<u8>) -> Self {
        Self {
            mem,
            protected: Vec::new(),
            sector: 0,
            selecting: false,
        }
    }

    pub fn block(&self, block: usize) -> &[u8] {
        &self.mem[block * T2T_BLOCK_SIZE..(block + 1) * T2T_BLOCK_SIZE]
    }

    fn offset(&self, block: u8) -> usize {
        (self.sector as usize * 256 + block as usize) * T2T_BLOCK_SIZE
    }
}

impl TagSim for T2tSim {
    fn respond(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        if self.selecting {
            // second packet: acknowledged by silence
            self.selecting = false;
            self.sector = *frame.first()?;
            return None;
        }
        match frame {
            [T2T_CMD_SECTOR_SELECT, 0xFF] => {
                self.selecting = true;
                Some(vec![T2T_ACK])
            }
            [T2T_CMD_READ, block] => Some(window(&self.mem, self.offset(*block), T2T_READ_SIZE)),
            [T2T_CMD_WRITE, block, data @ ..] if data.len() == T2T_BLOCK_SIZE => {
                let start = self.offset(*block);
                let absolute = (start / T2T_BLOCK_SIZE) as u16;
                if self.protected.contains(&absolute) || start + T2T_BLOCK_SIZE > self.mem.len() {
                    return Some(vec![0x00]);
                }
                load(&mut self.mem, start, data);
                Some(vec![T2T_ACK])
            }
            _ => None,
        }
    }
}

// ---- ISO 15693 ----

#[derive(Debug, Clone)]
pub struct I93Sim {
    pub uid: [u8; 8],
    pub block_size: usize,
    pub mem: Vec<u8>,
    pub locked: Vec<bool>,
    /// Answer Get System Information with the memory size.
    pub system_info: bool,
}

impl I93Sim {
    pub fn new(uid: [u8; 8], block_size: usize, num_blocks: usize) -> Self {
        Self {
            uid,
            block_size,
            mem: vec![0u8; block_size * num_blocks],
            locked: vec![false; num_blocks],
            system_info: true,
        }
    }

    /// Lay `bytes` over the memory from `offset`.
    pub fn load(mut self, offset: usize, bytes: &[u8]) -> Self {
        load(&mut self.mem, offset, bytes);
        self
    }

    fn num_blocks(&self) -> usize {
        self.locked.len()
    }

    fn read_block(&self, block: usize) -> Option<&[u8]> {
        self.mem
            .get(block * self.block_size..(block + 1) * self.block_size)
    }
}

impl TagSim for I93Sim {
    fn respond(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        let flags = *frame.first()?;
        let cmd = *frame.get(1)?;
        let addressed: Vec<u8> = frame.get(2..10)?.iter().rev().copied().collect();
        if addressed != self.uid {
            return None;
        }
        let ext = flags & I93_FLAG_PROT_EXT != 0;
        let params = &frame[10..];
        let (block, rest) = if ext {
            let b = u16::from_le_bytes([*params.first()?, *params.get(1)?]) as usize;
            (b, &params[2..])
        } else {
            (params.first().copied().unwrap_or(0) as usize, params.get(1..).unwrap_or(&[]))
        };
        let error = |code: u8| Some(vec![0x01, code]);

        match cmd {
            I93_CMD_GET_SYS_INFO if self.system_info => Some(
                SystemInfo {
                    info_flags: I93_INFO_FLAG_MEM_SIZE,
                    uid: self.uid,
                    num_blocks: Some(self.num_blocks() as u16),
                    block_size: Some(self.block_size as u8),
                    ..Default::default()
                }
                .encode(ext),
            ),
            I93_CMD_GET_SYS_INFO => error(0x02),
            I93_CMD_READ_SINGLE_BLOCK => match self.read_block(block) {
                Some(data) => {
                    let mut rsp = vec![0x00];
                    rsp.extend_from_slice(data);
                    Some(rsp)
                }
                None => error(0x10),
            },
            I93_CMD_READ_MULTI_BLOCK => {
                let count = *rest.first()? as usize + 1;
                let mut rsp = vec![0x00];
                for b in block..block + count {
                    match self.read_block(b) {
                        Some(data) => rsp.extend_from_slice(data),
                        None => return error(0x10),
                    }
                }
                Some(rsp)
            }
            I93_CMD_WRITE_SINGLE_BLOCK => {
                if block >= self.num_blocks() || rest.len() != self.block_size {
                    return error(0x10);
                }
                if self.locked[block] {
                    return error(0x12);
                }
                let start = block * self.block_size;
                load(&mut self.mem, start, rest);
                Some(vec![0x00])
            }
            I93_CMD_LOCK_BLOCK => match self.locked.get_mut(block) {
                Some(locked) => {
                    *locked = true;
                    Some(vec![0x00])
                }
                None => error(0x10),
            },
            _ => error(0x01),
        }
    }
}

// ---- MIFARE Classic ----

/// MIFARE Classic card. Every sector starts with transport keys; an
/// authentication succeeds when the key matches key A or key B of the
/// sector trailer.
#[derive(Debug, Clone)]
pub struct MfcSim {
    pub geometry: MfcGeometry,
    pub mem: Vec<u8>,
    authed: Option<usize>,
    write_block: Option<usize>,
}

impl MfcSim {
    pub fn new(sak: u8) -> Result<Self> {
        let geometry = MfcGeometry::from_sak(sak)?;
        let mut mem = vec![0u8; geometry.num_blocks() * MFC_BLOCK_SIZE];
        let transport = mfc::trailer(&MFC_KEY_DEFAULT, &[0xFF, 0x07, 0x80, 0x69], &MFC_KEY_DEFAULT);
        for sector in 0..geometry.num_sectors() {
            load(&mut mem, geometry.trailer_block(sector) * MFC_BLOCK_SIZE, &transport);
        }
        Ok(Self {
            geometry,
            mem,
            authed: None,
            write_block: None,
        })
    }

    pub fn block(&self, block: usize) -> &[u8] {
        &self.mem[block * MFC_BLOCK_SIZE..(block + 1) * MFC_BLOCK_SIZE]
    }

    fn accessible(&self, block: usize) -> bool {
        block < self.geometry.num_blocks() && self.authed == Some(self.geometry.sector_of(block))
    }
}

impl TagSim for MfcSim {
    fn respond(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        let nack = Some(vec![MFC_XCHG_DATA, 0x04]);
        match frame {
            [MFC_AUTH, sector, _, key @ ..] if key.len() == 6 => {
                let sector = *sector as usize;
                if sector >= self.geometry.num_sectors() {
                    return Some(vec![MFC_AUTH, 0x03]);
                }
                let trailer = self.block(self.geometry.trailer_block(sector));
                if key == &trailer[..6] || key == &trailer[10..] {
                    self.authed = Some(sector);
                    Some(vec![MFC_AUTH, 0x00])
                } else {
                    self.authed = None;
                    Some(vec![MFC_AUTH, 0x03])
                }
            }
            [MFC_XCHG_DATA, MFC_CMD_READ, block] => {
                let block = *block as usize;
                if !self.accessible(block) {
                    return nack;
                }
                let mut rsp = vec![MFC_XCHG_DATA];
                rsp.extend_from_slice(self.block(block));
                Some(rsp)
            }
            [MFC_XCHG_DATA, MFC_CMD_WRITE, block] => {
                let block = *block as usize;
                if !self.accessible(block) {
                    return nack;
                }
                self.write_block = Some(block);
                Some(vec![MFC_XCHG_DATA, MFC_ACK])
            }
            [MFC_XCHG_DATA, data @ ..] if data.len() == MFC_BLOCK_SIZE => {
                let block = self.write_block.take()?;
                load(&mut self.mem, block * MFC_BLOCK_SIZE, data);
                Some(vec![MFC_XCHG_DATA, MFC_ACK])
            }
            _ => None,
        }
    }
}

// ---- loopbacks ----

/// A reader wired to a simulated tag.
pub struct Loopback<S> {
    pub rw: ReaderWriter,
    pub sim: S,
    transport: MockTransport,
    timer: MockTimer,
    exchanges: usize,
}

impl<S: TagSim> Loopback<S> {
    pub fn new(sim: S) -> Self {
        Self::with_config(sim, RwConfig::default())
    }

    pub fn with_config(sim: S, config: RwConfig) -> Self {
        let transport = MockTransport::new();
        let timer = MockTimer::new();
        let rw = ReaderWriter::new(Box::new(transport.clone()), Box::new(timer.clone()), config);
        Self {
            rw,
            sim,
            transport,
            timer,
            exchanges: 0,
        }
    }

    pub fn transport(&self) -> &MockTransport {
        &self.transport
    }

    pub fn timer(&self) -> &MockTimer {
        &self.timer
    }

    /// Frames handed to the simulator so far.
    pub fn exchanges(&self) -> usize {
        self.exchanges
    }

    /// Answer every frame the reader sends until it falls silent, firing
    /// the response timer whenever the tag does not answer.
    pub fn run(&mut self) -> Vec<RwEvent> {
        loop {
            let sent = self.transport.take_sent();
            if sent.is_empty() || self.exchanges > MAX_EXCHANGES {
                break;
            }
            for frame in sent {
                self.exchanges += 1;
                match self.sim.respond(&frame) {
                    Some(rsp) => self.rw.on_data(&rsp),
                    None if self.timer.running().is_some() => self.rw.on_timeout(),
                    None => {}
                }
            }
        }
        self.rw.take_events()
    }

    /// Start an operation and run it to completion.
    pub fn exec<F>(&mut self, op: F) -> Result<Vec<RwEvent>>
    where
        F: FnOnce(&mut ReaderWriter) -> Result<()>,
    {
        op(&mut self.rw)?;
        Ok(self.run())
    }
}

/// A reader wired to a card emulator.
pub struct CeLoopback {
    pub rw: ReaderWriter,
    pub ce: CardEmulator,
    rw_transport: MockTransport,
    rw_timer: MockTimer,
    ce_transport: MockTransport,
    ce_timer: MockTimer,
}

impl Default for CeLoopback {
    fn default() -> Self {
        Self::new(RwConfig::default(), CeConfig::default())
    }
}

impl CeLoopback {
    pub fn new(rw_config: RwConfig, ce_config: CeConfig) -> Self {
        let rw_transport = MockTransport::new();
        let rw_timer = MockTimer::new();
        let ce_transport = MockTransport::new();
        let ce_timer = MockTimer::new();
        Self {
            rw: ReaderWriter::new(
                Box::new(rw_transport.clone()),
                Box::new(rw_timer.clone()),
                rw_config,
            ),
            ce: CardEmulator::new(
                Box::new(ce_transport.clone()),
                Box::new(ce_timer.clone()),
                ce_config,
            ),
            rw_transport,
            rw_timer,
            ce_transport,
            ce_timer,
        }
    }

    /// Timer armed by the emulator while an update is in progress.
    pub fn ce_timer(&self) -> &MockTimer {
        &self.ce_timer
    }

    pub fn run(&mut self) -> Vec<RwEvent> {
        let mut exchanges = 0;
        loop {
            let sent = self.rw_transport.take_sent();
            if sent.is_empty() || exchanges > MAX_EXCHANGES {
                break;
            }
            for frame in sent {
                exchanges += 1;
                self.ce.on_data(&frame);
                match self.ce_transport.take_sent().pop() {
                    Some(rsp) => self.rw.on_data(&rsp),
                    None if self.rw_timer.running().is_some() => self.rw.on_timeout(),
                    None => {}
                }
            }
        }
        self.rw.take_events()
    }

    pub fn exec<F>(&mut self, op: F) -> Result<Vec<RwEvent>>
    where
        F: FnOnce(&mut ReaderWriter) -> Result<()>,
    {
        op(&mut self.rw)?;
        Ok(self.run())
    }
}
