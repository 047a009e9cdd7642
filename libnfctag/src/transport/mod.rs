// libnfctag/src/transport/mod.rs

pub mod link;
pub mod mock;
pub mod traits;

pub use link::Link;
pub use mock::{MockTimer, MockTransport};
pub use traits::{ConnEvent, QuickTimer, Transport};
