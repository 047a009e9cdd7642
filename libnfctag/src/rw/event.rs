// libnfctag/src/rw/event.rs

use crate::types::{NdefFlags, Status, TagProtocol};

/// Result of NDEF detection.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NdefInfo {
    pub status: Status,
    pub protocol: TagProtocol,
    /// Length of the stored NDEF message.
    pub cur_size: usize,
    /// Largest message the tag can hold.
    pub max_size: usize,
    pub flags: NdefFlags,
}

impl NdefInfo {
    pub fn failed(protocol: TagProtocol, status: Status, flags: NdefFlags) -> Self {
        Self {
            status,
            protocol,
            cur_size: 0,
            max_size: 0,
            flags,
        }
    }
}

/// Events delivered to the reader/writer client, exactly one per
/// operation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RwEvent {
    NdefDetect(NdefInfo),
    NdefReadComplete(Vec<u8>),
    NdefReadFailed(Status),
    NdefUpdateComplete,
    NdefUpdateFailed(Status),
    SetReadOnly(Status),
    Format(Status),
    PresenceCheck(Status),
    /// Response to a raw frame, or data received while idle.
    RawFrame { status: Status, data: Vec<u8> },
    BlockData {
        status: Status,
        block: u16,
        data: Vec<u8>,
    },
    BlockWritten { status: Status, block: u16 },
}

impl RwEvent {
    pub fn status(&self) -> Status {
        match self {
            RwEvent::NdefDetect(info) => info.status,
            RwEvent::NdefReadComplete(_) | RwEvent::NdefUpdateComplete => Status::Ok,
            RwEvent::NdefReadFailed(s)
            | RwEvent::NdefUpdateFailed(s)
            | RwEvent::SetReadOnly(s)
            | RwEvent::Format(s)
            | RwEvent::PresenceCheck(s) => *s,
            RwEvent::RawFrame { status, .. }
            | RwEvent::BlockData { status, .. }
            | RwEvent::BlockWritten { status, .. } => *status,
        }
    }
}
