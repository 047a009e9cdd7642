// libnfctag/src/transport/traits.rs

use crate::Result;

/// Transport trait abstracts the NCI data path away from the protocol
/// engines. Payloads are already framed for the activated RF interface.
pub trait Transport {
    /// Send one payload on the static RF connection.
    fn send(&mut self, data: &[u8]) -> Result<()>;
}

/// One-shot timer used for response supervision. Expiry is reported back
/// by the owner of the engine through `on_timeout`.
pub trait QuickTimer {
    /// Arm (or re-arm) the timer.
    fn start(&mut self, timeout_ms: u64);

    /// Disarm the timer. Stopping an idle timer is a no-op.
    fn stop(&mut self);
}

/// Events delivered by the connection layer for the static RF connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnEvent {
    /// A response (RW) or command (CE) payload was received.
    Data(Vec<u8>),
    /// The RF link was lost or the tag was deactivated.
    Deactivated,
    /// The connection was created.
    Create,
    /// The connection was closed.
    Close,
    /// The connection layer reported an error for the pending exchange.
    Error,
}
