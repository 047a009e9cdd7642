// libnfctag/src/config.rs
//! Runtime configuration for the reader/writer and card emulation engines.

/// Default number of retransmissions after a response timeout.
pub const DEFAULT_MAX_RETRIES: u8 = 3;

/// How a T4T presence check polls the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum T4tPresenceCheck {
    /// READ BINARY of one byte of the selected file.
    #[default]
    ReadBinary,
    /// An empty I-block; any response proves presence.
    EmptyFrame,
}

/// Reader/writer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RwConfig {
    /// Retransmissions allowed per command before the operation fails.
    pub max_retries: u8,
    pub t1t_timeout_ms: u64,
    pub t2t_timeout_ms: u64,
    pub t3t_timeout_ms: u64,
    pub t4t_timeout_ms: u64,
    pub i93_timeout_ms: u64,
    pub mfc_timeout_ms: u64,
    /// Timeout applied to presence check exchanges of every tag type.
    pub presence_check_timeout_ms: u64,
    /// Largest READ/UPDATE BINARY payload the transport buffers can carry.
    pub t4t_max_transfer: usize,
    /// Set the ISO 15693 high data rate flag in every request.
    pub i93_high_data_rate: bool,
    pub t4t_presence_check: T4tPresenceCheck,
}

impl Default for RwConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            t1t_timeout_ms: 100,
            t2t_timeout_ms: 100,
            t3t_timeout_ms: 150,
            t4t_timeout_ms: 1000,
            i93_timeout_ms: 150,
            mfc_timeout_ms: 200,
            presence_check_timeout_ms: 250,
            t4t_max_transfer: 0xFF,
            i93_high_data_rate: true,
            t4t_presence_check: T4tPresenceCheck::ReadBinary,
        }
    }
}

/// Card emulation configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CeConfig {
    /// Blocks a reader may CHECK in one command.
    pub t3t_nbr: u8,
    /// Blocks a reader may UPDATE in one command.
    pub t3t_nbw: u8,
    /// MaxLe advertised in the emulated T4T capability container.
    pub t4t_max_le: u16,
    /// MaxLc advertised in the emulated T4T capability container.
    pub t4t_max_lc: u16,
    /// An UPDATE BINARY sequence left incomplete this long is aborted.
    pub t4t_update_timeout_ms: u64,
}

impl Default for CeConfig {
    fn default() -> Self {
        Self {
            t3t_nbr: 4,
            t3t_nbw: 1,
            t4t_max_le: 0x003B,
            t4t_max_lc: 0x0034,
            t4t_update_timeout_ms: 1000,
        }
    }
}
