// libnfctag/src/ndef/plan.rs

use std::collections::BTreeMap;

use crate::addressing::MemoryMap;
use crate::constants::{TLV_LONG_LENGTH_MARKER, TLV_NDEF, TLV_TERMINATOR};
use crate::tlv::{encode_length, length_field_size};
use crate::{Error, Result};

/// One byte the write touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedByte {
    /// Index inside the block.
    pub index: usize,
    pub value: u8,
    /// Value written while the message is invalidated (length zeroed).
    pub invalidated: u8,
    pub is_length: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedBlock {
    pub block: usize,
    pub bytes: Vec<PlannedByte>,
}

impl PlannedBlock {
    /// A block is partial when some of its bytes must be preserved, which
    /// requires reading it before writing.
    pub fn is_partial(&self, block_size: usize) -> bool {
        self.bytes.len() < block_size
    }

    pub fn has_length(&self) -> bool {
        self.bytes.iter().any(|b| b.is_length)
    }

    /// Overlay the planned bytes on `base` (the current block content).
    pub fn apply(&self, base: &[u8], invalidated: bool) -> Vec<u8> {
        let mut out = base.to_vec();
        for b in &self.bytes {
            out[b.index] = if invalidated { b.invalidated } else { b.value };
        }
        out
    }
}

/// Placement of a new NDEF TLV (type, length, value, optional terminator)
/// onto the data bytes of a tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritePlan {
    block_size: usize,
    blocks: BTreeMap<usize, PlannedBlock>,
    pub header_offset: usize,
    /// Offset of the first message byte once written.
    pub msg_offset: usize,
    pub msg_len: usize,
    pub length_field_size: usize,
    pub has_terminator: bool,
}

impl WritePlan {
    pub fn new(map: &MemoryMap, header_offset: usize, msg: &[u8]) -> Result<Self> {
        if !map.is_data(header_offset) {
            return Err(Error::Refused(format!(
                "ndef header offset {} is not a data byte",
                header_offset
            )));
        }

        let length = encode_length(msg.len())?;
        let zero_length: Vec<u8> = if length.len() == 1 {
            vec![0x00]
        } else {
            vec![TLV_LONG_LENGTH_MARKER, 0x00, 0x00]
        };

        let needed = 1 + length.len() + msg.len();
        let offsets: Vec<usize> = map.data_offsets(header_offset).take(needed + 1).collect();
        if offsets.len() < needed {
            return Err(Error::Refused(format!(
                "ndef message of {} bytes does not fit ({} bytes free)",
                msg.len(),
                offsets.len().saturating_sub(1 + length.len())
            )));
        }
        let has_terminator = offsets.len() > needed;

        let mut stream: Vec<(u8, u8, bool)> = Vec::with_capacity(needed + 1);
        stream.push((TLV_NDEF, TLV_NDEF, false));
        for (v, z) in length.iter().zip(zero_length.iter()) {
            stream.push((*v, *z, true));
        }
        stream.extend(msg.iter().map(|b| (*b, *b, false)));
        if has_terminator {
            stream.push((TLV_TERMINATOR, TLV_TERMINATOR, false));
        }

        let block_size = map.block_size();
        let mut blocks: BTreeMap<usize, PlannedBlock> = BTreeMap::new();
        for (offset, (value, invalidated, is_length)) in offsets.iter().zip(stream) {
            let (block, index) = map.block_of(*offset);
            blocks
                .entry(block)
                .or_insert_with(|| PlannedBlock {
                    block,
                    bytes: Vec::new(),
                })
                .bytes
                .push(PlannedByte {
                    index,
                    value,
                    invalidated,
                    is_length,
                });
        }

        Ok(Self {
            block_size,
            blocks,
            header_offset,
            msg_offset: offsets[1 + length.len()..]
                .first()
                .copied()
                .unwrap_or_else(|| offsets[length.len()] + 1),
            msg_len: msg.len(),
            length_field_size: length_field_size(msg.len()),
            has_terminator,
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Planned blocks in ascending order.
    pub fn blocks(&self) -> impl Iterator<Item = &PlannedBlock> {
        self.blocks.values()
    }

    pub fn block(&self, block: usize) -> Option<&PlannedBlock> {
        self.blocks.get(&block)
    }

    pub fn block_numbers(&self) -> Vec<usize> {
        self.blocks.keys().copied().collect()
    }

    /// Blocks that must be read before they are written.
    pub fn partial_blocks(&self) -> Vec<usize> {
        self.blocks
            .values()
            .filter(|b| b.is_partial(self.block_size))
            .map(|b| b.block)
            .collect()
    }

    /// Blocks holding length field bytes, rewritten last.
    pub fn length_blocks(&self) -> Vec<usize> {
        self.blocks
            .values()
            .filter(|b| b.has_length())
            .map(|b| b.block)
            .collect()
    }

    pub fn last_block(&self) -> Option<usize> {
        self.blocks.keys().next_back().copied()
    }
}
