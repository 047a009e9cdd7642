//! Small helpers shared across the crate: hex formatting for trace output.

pub mod hex;

pub use hex::*;
