// libnfctag/src/transport/link.rs

use log::trace;

use crate::Result;
use crate::transport::traits::{QuickTimer, Transport};
use crate::utils::bytes_to_hex_spaced;

/// Transport, timer and the pending application events of one engine.
///
/// State machines never call the application directly: they queue events
/// here and the owning context delivers them once the step has finished,
/// so a callback always observes the control block back in IDLE.
pub struct Link<E> {
    transport: Box<dyn Transport>,
    timer: Box<dyn QuickTimer>,
    events: Vec<E>,
}

impl<E> Link<E> {
    pub fn new(transport: Box<dyn Transport>, timer: Box<dyn QuickTimer>) -> Self {
        Self {
            transport,
            timer,
            events: Vec::new(),
        }
    }

    /// Send a frame and arm the response timer.
    pub fn transmit(&mut self, frame: &[u8], timeout_ms: u64) -> Result<()> {
        trace!("tx [{}]", bytes_to_hex_spaced(frame));
        self.transport.send(frame)?;
        self.timer.start(timeout_ms);
        Ok(())
    }

    /// Send a frame without response supervision.
    pub fn send(&mut self, frame: &[u8]) -> Result<()> {
        trace!("tx [{}]", bytes_to_hex_spaced(frame));
        self.transport.send(frame)
    }

    pub fn start_timer(&mut self, timeout_ms: u64) {
        self.timer.start(timeout_ms);
    }

    pub fn stop_timer(&mut self) {
        self.timer.stop();
    }

    pub fn notify(&mut self, event: E) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<E> {
        std::mem::take(&mut self.events)
    }
}
