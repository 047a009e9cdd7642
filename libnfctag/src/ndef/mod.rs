// libnfctag/src/ndef/mod.rs
//! NDEF read/write helpers shared by the TLV based tag types.
//!
//! The state machines own the exchange with the tag; these helpers decide
//! which bytes to read and what every written block must contain.

pub mod plan;
pub mod read;

pub use plan::{PlannedBlock, WritePlan};
pub use read::NdefCollector;
