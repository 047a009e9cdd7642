// libnfctag/src/prelude.rs

pub use crate::ce::{AidEvent, AidHandle, AidHandler, CardEmulator, CeEvent, LocalNdef};
pub use crate::config::{CeConfig, RwConfig, T4tPresenceCheck};
pub use crate::rw::{NdefInfo, ReaderWriter, RwEvent, RwState};
pub use crate::transport::{ConnEvent, QuickTimer, Transport};
pub use crate::{
    BlockElement, Error, Idm, NdefFlags, Pmm, Result, ServiceCode, Status, SystemCode, TagProtocol,
};

// Re-export small utilities for convenience
pub use crate::utils::{bytes_to_hex, bytes_to_hex_spaced};
