// libnfctag/src/addressing.rs
//! Block/segment addressing helper.
//!
//! Offsets are logical byte addresses in the tag's memory. The map knows
//! the block size of the tag type, where the data area starts and ends, and
//! which regions inside it hold lock, reserved or OTP bytes. Those regions
//! are skipped when NDEF content is counted or placed, but they stay in the
//! block images written back to the tag.

use std::ops::Range;

/// Classification of a single byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteKind {
    Data,
    Lock,
    Reserved,
    Otp,
    /// Outside the data area.
    OutOfRange,
}

/// T1T segment size (16 blocks of 8 bytes).
pub const T1T_SEGMENT_SIZE: usize = 128;

/// T2T sector size (256 blocks of 4 bytes).
pub const T2T_SECTOR_SIZE: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMap {
    block_size: usize,
    data_start: usize,
    data_end: usize,
    excluded: Vec<(Range<usize>, ByteKind)>,
}

impl MemoryMap {
    pub fn new(block_size: usize, data_start: usize, data_end: usize) -> Self {
        Self {
            block_size,
            data_start,
            data_end,
            excluded: Vec::new(),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn data_start(&self) -> usize {
        self.data_start
    }

    pub fn data_end(&self) -> usize {
        self.data_end
    }

    pub fn set_data_end(&mut self, end: usize) {
        self.data_end = end;
    }

    /// Mark `range` as non-data. Overlapping registrations are allowed.
    pub fn exclude(&mut self, range: Range<usize>, kind: ByteKind) {
        if !range.is_empty() && !self.excluded.iter().any(|(r, k)| *r == range && *k == kind) {
            self.excluded.push((range, kind));
        }
    }

    /// Block number and index inside the block.
    pub fn block_of(&self, offset: usize) -> (usize, usize) {
        (offset / self.block_size, offset % self.block_size)
    }

    pub fn block_start(&self, block: usize) -> usize {
        block * self.block_size
    }

    /// T1T segment containing `offset`.
    pub fn segment_of(offset: usize) -> usize {
        offset / T1T_SEGMENT_SIZE
    }

    /// T2T sector containing `offset` and the block number inside it.
    pub fn sector_of(offset: usize) -> (usize, u8) {
        (offset / T2T_SECTOR_SIZE, ((offset % T2T_SECTOR_SIZE) / 4) as u8)
    }

    pub fn classify(&self, offset: usize) -> ByteKind {
        if offset < self.data_start || offset >= self.data_end {
            return ByteKind::OutOfRange;
        }
        self.excluded
            .iter()
            .find(|(r, _)| r.contains(&offset))
            .map(|(_, k)| *k)
            .unwrap_or(ByteKind::Data)
    }

    pub fn is_data(&self, offset: usize) -> bool {
        self.classify(offset) == ByteKind::Data
    }

    /// First data offset at or after `from`.
    pub fn next_data_offset(&self, from: usize) -> Option<usize> {
        (from.max(self.data_start)..self.data_end).find(|o| self.is_data(*o))
    }

    /// Data offsets in ascending order starting at `from`.
    pub fn data_offsets(&self, from: usize) -> impl Iterator<Item = usize> + '_ {
        (from.max(self.data_start)..self.data_end).filter(move |o| self.is_data(*o))
    }

    /// Number of data bytes in `[from, data_end)`.
    pub fn data_bytes_from(&self, from: usize) -> usize {
        self.data_offsets(from).count()
    }

    /// The `n`-th data offset at or after `from` (0-based).
    pub fn nth_data_offset(&self, from: usize, n: usize) -> Option<usize> {
        self.data_offsets(from).nth(n)
    }

    /// Whether `block` holds lock or OTP bytes.
    pub fn block_has_lock_bytes(&self, block: usize) -> bool {
        let start = self.block_start(block);
        (start..start + self.block_size).any(|o| matches!(self.classify(o), ByteKind::Lock | ByteKind::Otp))
    }
}
