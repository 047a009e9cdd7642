// libnfctag/src/transport/mock.rs

use std::cell::RefCell;
use std::rc::Rc;

use crate::transport::traits::{QuickTimer, Transport};
use crate::{Error, Result};

#[derive(Debug, Default)]
struct MockTransportState {
    sent: Vec<Vec<u8>>,
    send_failures: usize,
}

/// Mock transport for unit tests. It records sent payloads. Clones share
/// the same record so a test can keep a handle after boxing one copy.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Rc<RefCell<MockTransportState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` sends fail with a transport error.
    pub fn set_send_failures(&self, n: usize) {
        self.state.borrow_mut().send_failures = n;
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state.borrow().sent.clone()
    }

    pub fn sent_count(&self) -> usize {
        self.state.borrow().sent.len()
    }

    pub fn last_sent(&self) -> Option<Vec<u8>> {
        self.state.borrow().sent.last().cloned()
    }

    /// Drain the sent log.
    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.state.borrow_mut().sent)
    }
}

impl Transport for MockTransport {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.send_failures > 0 {
            state.send_failures -= 1;
            return Err(Error::Transport("mock send failure".into()));
        }
        state.sent.push(data.to_vec());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MockTimerState {
    running: Option<u64>,
    starts: usize,
}

/// Mock quick timer recording whether it is armed.
#[derive(Debug, Clone, Default)]
pub struct MockTimer {
    state: Rc<RefCell<MockTimerState>>,
}

impl MockTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timeout of the armed timer, `None` when stopped.
    pub fn running(&self) -> Option<u64> {
        self.state.borrow().running
    }

    pub fn starts(&self) -> usize {
        self.state.borrow().starts
    }
}

impl QuickTimer for MockTimer {
    fn start(&mut self, timeout_ms: u64) {
        let mut state = self.state.borrow_mut();
        state.running = Some(timeout_ms);
        state.starts += 1;
    }

    fn stop(&mut self) {
        self.state.borrow_mut().running = None;
    }
}
