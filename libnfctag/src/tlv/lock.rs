// libnfctag/src/tlv/lock.rs

use std::ops::Range;

use crate::addressing::ByteKind;
use crate::{Error, Result};

/// Parsed Lock Control TLV: where the dynamic lock bits live and how many
/// data bytes each bit protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockControlTlv {
    pub offset: usize,
    pub num_bits: u16,
    pub bytes_locked_per_bit: u16,
}

impl LockControlTlv {
    /// Decode the three value bytes of a Lock Control TLV.
    ///
    /// Byte 0 holds the major (page) offset in the high nibble and the minor
    /// (byte) offset in the low nibble. Byte 1 is the number of lock bits
    /// (0 means 256). Byte 2 holds log2(bytes locked per bit) in the high
    /// nibble and log2(page size) in the low nibble.
    pub fn from_value(value: &[u8]) -> Result<Self> {
        let [b0, b1, b2] = control_value(value)?;
        let page_size = 1usize << (b2 & 0x0F);
        Ok(Self {
            offset: (b0 >> 4) as usize * page_size + (b0 & 0x0F) as usize,
            num_bits: if b1 == 0 { 256 } else { b1 as u16 },
            bytes_locked_per_bit: 1u16 << (b2 >> 4),
        })
    }

    pub fn num_bytes(&self) -> usize {
        (self.num_bits as usize).div_ceil(8)
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.num_bytes()
    }
}

/// Parsed Memory Control TLV: a reserved area excluded from NDEF storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryControlTlv {
    pub offset: usize,
    pub num_bytes: u16,
}

impl MemoryControlTlv {
    pub fn from_value(value: &[u8]) -> Result<Self> {
        let [b0, b1, b2] = control_value(value)?;
        let page_size = 1usize << (b2 & 0x0F);
        Ok(Self {
            offset: (b0 >> 4) as usize * page_size + (b0 & 0x0F) as usize,
            num_bytes: if b1 == 0 { 256 } else { b1 as u16 },
        })
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.num_bytes as usize
    }
}

fn control_value(value: &[u8]) -> Result<[u8; 3]> {
    match value {
        [a, b, c] => Ok([*a, *b, *c]),
        _ => Err(Error::MalformedTlv(format!(
            "control tlv value must be 3 bytes, got {}",
            value.len()
        ))),
    }
}

/// One dynamic lock byte, owned by the Lock Control TLV at `tlv_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockByte {
    pub tlv_index: usize,
    pub byte_index: usize,
    pub lock_byte_value: u8,
    pub read: bool,
}

/// Lock and reserved byte bookkeeping built during NDEF detection.
#[derive(Debug, Clone, Default)]
pub struct LockTable {
    lock_ctrls: Vec<LockControlTlv>,
    mem_ctrls: Vec<MemoryControlTlv>,
    lock_bytes: Vec<LockByte>,
    /// First byte covered by dynamic lock bit 0.
    dynamic_area_start: usize,
}

impl LockTable {
    pub fn new(dynamic_area_start: usize) -> Self {
        Self {
            dynamic_area_start,
            ..Self::default()
        }
    }

    pub fn lock_controls(&self) -> &[LockControlTlv] {
        &self.lock_ctrls
    }

    pub fn memory_controls(&self) -> &[MemoryControlTlv] {
        &self.mem_ctrls
    }

    pub fn lock_bytes(&self) -> &[LockByte] {
        &self.lock_bytes
    }

    pub fn has_lock_controls(&self) -> bool {
        !self.lock_ctrls.is_empty()
    }

    pub fn add_lock_control(&mut self, tlv: LockControlTlv) {
        let tlv_index = self.lock_ctrls.len();
        for byte_index in 0..tlv.num_bytes() {
            self.lock_bytes.push(LockByte {
                tlv_index,
                byte_index,
                lock_byte_value: 0,
                read: false,
            });
        }
        self.lock_ctrls.push(tlv);
    }

    pub fn add_memory_control(&mut self, tlv: MemoryControlTlv) {
        self.mem_ctrls.push(tlv);
    }

    fn lock_byte_offset(&self, lb: &LockByte) -> usize {
        self.lock_ctrls[lb.tlv_index].offset + lb.byte_index
    }

    /// Classify an offset against the control TLVs only.
    pub fn classify(&self, offset: usize) -> ByteKind {
        if self.lock_ctrls.iter().any(|t| t.range().contains(&offset)) {
            ByteKind::Lock
        } else if self.mem_ctrls.iter().any(|t| t.range().contains(&offset)) {
            ByteKind::Reserved
        } else {
            ByteKind::Data
        }
    }

    /// Regions the memory map must exclude from NDEF storage.
    pub fn excluded_regions(&self) -> Vec<(Range<usize>, ByteKind)> {
        self.lock_ctrls
            .iter()
            .map(|t| (t.range(), ByteKind::Lock))
            .chain(self.mem_ctrls.iter().map(|t| (t.range(), ByteKind::Reserved)))
            .collect()
    }

    /// Offsets of lock bytes whose value has not been read yet.
    pub fn unread_offsets(&self) -> Vec<usize> {
        self.lock_bytes
            .iter()
            .filter(|lb| !lb.read)
            .map(|lb| self.lock_byte_offset(lb))
            .collect()
    }

    /// Store the value of the lock byte at `offset`, if it is one.
    pub fn record(&mut self, offset: usize, value: u8) {
        let ctrls = &self.lock_ctrls;
        for lb in self.lock_bytes.iter_mut() {
            if ctrls[lb.tlv_index].offset + lb.byte_index == offset {
                lb.lock_byte_value = value;
                lb.read = true;
            }
        }
    }

    pub fn all_read(&self) -> bool {
        self.lock_bytes.iter().all(|lb| lb.read)
    }

    /// Data ranges protected by lock bits that are set. Bits cover the
    /// dynamic area sequentially, TLV after TLV.
    pub fn locked_ranges(&self) -> Vec<Range<usize>> {
        let mut ranges = Vec::new();
        let mut cursor = self.dynamic_area_start;
        for (tlv_index, tlv) in self.lock_ctrls.iter().enumerate() {
            let per_bit = tlv.bytes_locked_per_bit as usize;
            for bit in 0..tlv.num_bits as usize {
                let set = self
                    .lock_bytes
                    .iter()
                    .find(|lb| lb.tlv_index == tlv_index && lb.byte_index == bit / 8)
                    .map(|lb| lb.read && lb.lock_byte_value & (1 << (bit % 8)) != 0)
                    .unwrap_or(false);
                if set {
                    ranges.push(cursor..cursor + per_bit);
                }
                cursor += per_bit;
            }
        }
        ranges
    }

    /// Lock byte values that set every dynamic lock bit, as
    /// `(offset, value)` pairs.
    pub fn hard_lock_values(&self) -> Vec<(usize, u8)> {
        self.lock_bytes
            .iter()
            .map(|lb| {
                let tlv = &self.lock_ctrls[lb.tlv_index];
                let bits_left = tlv.num_bits as usize - lb.byte_index * 8;
                let value = if bits_left >= 8 {
                    0xFF
                } else {
                    ((1u16 << bits_left) - 1) as u8
                };
                (self.lock_byte_offset(lb), value)
            })
            .collect()
    }
}
