// libnfctag/src/rw/retry.rs

use log::{debug, warn};

use crate::Result;
use crate::protocol::WireCommand;

/// Retransmission supervisor.
///
/// Holds the last request value sent by the active state machine. When the
/// response timer expires the request is serialised again, up to
/// `max_retries` times per request.
#[derive(Debug)]
pub struct Supervisor {
    max_retries: u8,
    retries: u8,
    last: Option<(Box<dyn WireCommand>, u64)>,
}

impl Supervisor {
    pub fn new(max_retries: u8) -> Self {
        Self {
            max_retries,
            retries: 0,
            last: None,
        }
    }

    /// Remember a newly sent request. Resets the retry counter.
    pub fn record(&mut self, cmd: Box<dyn WireCommand>, timeout_ms: u64) {
        self.retries = 0;
        self.last = Some((cmd, timeout_ms));
    }

    /// Frame and timeout for the next retransmission, or `None` once the
    /// retry budget of the request is spent.
    pub fn retry(&mut self) -> Option<Result<(Vec<u8>, u64)>> {
        let (cmd, timeout) = self.last.as_ref()?;
        if self.retries >= self.max_retries {
            warn!(
                "no response to {:#04x} after {} retries",
                cmd.opcode(),
                self.retries
            );
            return None;
        }
        self.retries += 1;
        debug!(
            "retransmitting {:#04x} ({}/{})",
            cmd.opcode(),
            self.retries,
            self.max_retries
        );
        Some(cmd.encode().map(|frame| (frame, *timeout)))
    }

    pub fn retries(&self) -> u8 {
        self.retries
    }

    pub fn is_armed(&self) -> bool {
        self.last.is_some()
    }

    /// Release the retained request.
    pub fn clear(&mut self) {
        self.retries = 0;
        self.last = None;
    }
}
