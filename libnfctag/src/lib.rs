// libnfctag/src/lib.rs

//! libnfctag
//!
//! NFC Forum tag reader/writer and card emulation engines. The crate
//! drives NFC Forum Type 1 to 4 tags, ISO 15693 (Type 5) and MIFARE
//! Classic tags over an abstract RF [`Transport`](transport::Transport),
//! and emulates Type 3 and Type 4 tags toward a remote reader.
//!
//! Nothing here blocks: every operation sends its first command and
//! returns, and the caller feeds received frames and timer expiries back
//! through `on_data` and `on_timeout`. Outcomes arrive as events.

pub mod addressing;
pub mod ce;
pub mod config;
pub mod constants;
pub mod error;
pub mod ndef;
pub mod prelude;
pub mod protocol;
pub mod rw;
pub mod test_support;
pub mod tlv;
pub mod transport;
pub mod types;
pub mod utils;

// Re-export common types at crate root so `crate::Error`, `crate::Result`,
// and the newtypes in `types` are available everywhere.
pub use crate::error::*;
pub use crate::types::*;

pub use prelude::*;
