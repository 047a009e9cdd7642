// libnfctag/src/protocol/mod.rs
//! Per-tag-type command encoders and response decoders.
//!
//! Every command is a value implementing [`WireCommand`]. The reader/writer
//! keeps the last command value for retransmission and serialises it again
//! when the response timer expires.

pub mod apdu;
pub mod checksum;
pub mod i93;
pub mod mfc;
pub mod parser;
pub mod t1t;
pub mod t2t;
pub mod t3t;

use std::fmt::Debug;

use crate::Result;

pub use apdu::{Apdu, ApduResponse, T4tCommand};
pub use checksum::{mad_crc8, t3t_attr_checksum};
pub use i93::I93Command;
pub use mfc::MfcCommand;
pub use t1t::T1tCommand;
pub use t2t::T2tCommand;
pub use t3t::{NdefAttributes, T3tCommand};

/// A request that can be serialised to the bytes sent over the RF
/// connection.
pub trait WireCommand: Debug {
    /// Command opcode, used in logs and to match responses.
    fn opcode(&self) -> u8;

    /// Encode the full payload handed to the transport. Fails when the
    /// request does not fit the frame format of its tag type.
    fn encode(&self) -> Result<Vec<u8>>;
}

/// An application supplied frame sent verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame(pub Vec<u8>);

impl WireCommand for RawFrame {
    fn opcode(&self) -> u8 {
        self.0.first().copied().unwrap_or(0)
    }

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(self.0.clone())
    }
}
