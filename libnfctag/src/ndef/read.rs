// libnfctag/src/ndef/read.rs

use crate::addressing::MemoryMap;
use crate::{Error, Result};

/// Accumulates the NDEF message from successive block reads.
///
/// Only data bytes count toward the message: lock and reserved bytes in
/// the fetched blocks are skipped using the memory map.
#[derive(Debug, Clone)]
pub struct NdefCollector {
    next: Option<usize>,
    remaining: usize,
    data: Vec<u8>,
}

impl NdefCollector {
    /// Prepare to collect `len` bytes starting at data offset `msg_offset`.
    pub fn new(map: &MemoryMap, msg_offset: usize, len: usize) -> Result<Self> {
        let available = map.data_bytes_from(msg_offset);
        if available < len {
            return Err(Error::InvalidLength {
                expected: len,
                actual: available,
            });
        }
        Ok(Self {
            next: if len == 0 { None } else { map.next_data_offset(msg_offset) },
            remaining: len,
            data: Vec::with_capacity(len),
        })
    }

    /// Offset of the next byte still needed.
    pub fn next_offset(&self) -> Option<usize> {
        if self.remaining == 0 { None } else { self.next }
    }

    /// Bytes collected so far.
    pub fn work_offset(&self) -> usize {
        self.data.len()
    }

    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }

    /// Consume `bytes` read from the tag starting at offset `start`.
    pub fn feed(&mut self, map: &MemoryMap, start: usize, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            if self.remaining == 0 {
                return;
            }
            let offset = start + i;
            if Some(offset) == self.next {
                self.data.push(*b);
                self.remaining -= 1;
                self.next = map.next_data_offset(offset + 1);
            }
        }
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}
