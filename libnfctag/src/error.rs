// libnfctag/src/error.rs

use thiserror::Error;

/// Common error type.
///
/// Synchronous API rejections (`Busy`, `NotInitialized`, `Refused`,
/// `NotSupported`, `Transport`) are returned directly from the entry
/// points. The remaining variants describe protocol violations found while
/// decoding a response; the state machines turn them into failure events.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("operation already in progress")]
    Busy,

    #[error("no tag activated or ndef not detected")]
    NotInitialized,

    #[error("request refused: {0}")]
    Refused(String),

    #[error("unsupported operation: {0}")]
    NotSupported(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("unexpected response code: expected {expected:#04x}, got {actual:#04x}")]
    UnexpectedResponse { expected: u8, actual: u8 },

    #[error("checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    #[error("status word {0:#06x}")]
    StatusWord(u16),

    #[error("tag error: code={0:#04x}")]
    TagError(u8),

    #[error("felica error: status=({status1:#04x}, {status2:#04x})")]
    FelicaStatus { status1: u8, status2: u8 },

    #[error("malformed tlv: {0}")]
    MalformedTlv(String),

    #[error("invalid capability container: {0}")]
    InvalidCc(String),

    #[error("ndef not found")]
    NdefNotFound,
}

pub type Result<T> = std::result::Result<T, Error>;
