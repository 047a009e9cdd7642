// libnfctag/src/ce/aid.rs
//! Application identifier routing for T4T card emulation.

use std::fmt;

use log::debug;

use crate::utils::bytes_to_hex;
use crate::{Error, Result};

/// Registrations allowed at the same time, wildcard included.
pub const CE_T4T_MAX_REG_AID: usize = 4;
pub const AID_MIN_LEN: usize = 5;
pub const AID_MAX_LEN: usize = 16;

/// Handle returned by a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AidHandle(u8);

impl AidHandle {
    pub fn value(&self) -> u8 {
        self.0
    }
}

/// What an [`AidHandler`] is being told.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AidEvent {
    /// The reader selected the AID; the frame is the SELECT APDU.
    Selected,
    /// An APDU sent while the AID is selected.
    Data,
    /// The link went down while the AID was selected.
    Deactivated,
}

/// Receives the APDUs routed to a registered AID. The returned bytes are
/// sent as the response APDU; `None` answers `90 00` to a SELECT and sends
/// nothing otherwise.
pub trait AidHandler {
    fn on_frame(&mut self, event: AidEvent, frame: &[u8]) -> Option<Vec<u8>>;
}

impl<F> AidHandler for F
where
    F: FnMut(AidEvent, &[u8]) -> Option<Vec<u8>>,
{
    fn on_frame(&mut self, event: AidEvent, frame: &[u8]) -> Option<Vec<u8>> {
        self(event, frame)
    }
}

struct AidEntry {
    handle: AidHandle,
    aid: Vec<u8>,
    handler: Box<dyn AidHandler>,
}

impl fmt::Debug for AidEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AidEntry")
            .field("handle", &self.handle)
            .field("aid", &bytes_to_hex(&self.aid))
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct AidRegistry {
    entries: Vec<AidEntry>,
    next_handle: u8,
}

impl AidRegistry {
    pub fn register(&mut self, aid: &[u8], handler: Box<dyn AidHandler>) -> Result<AidHandle> {
        if aid.is_empty() {
            if self.wildcard().is_some() {
                return Err(Error::Refused("a wildcard aid is already registered".into()));
            }
        } else if !(AID_MIN_LEN..=AID_MAX_LEN).contains(&aid.len()) {
            return Err(Error::InvalidLength {
                expected: AID_MIN_LEN,
                actual: aid.len(),
            });
        } else if self.find(aid).is_some() {
            return Err(Error::Refused(format!("aid {} already registered", bytes_to_hex(aid))));
        }
        if self.entries.len() >= CE_T4T_MAX_REG_AID {
            return Err(Error::Refused("aid table full".into()));
        }

        let handle = AidHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        debug!("aid {} registered as {:?}", bytes_to_hex(aid), handle);
        self.entries.push(AidEntry {
            handle,
            aid: aid.to_vec(),
            handler,
        });
        Ok(handle)
    }

    pub fn deregister(&mut self, handle: AidHandle) -> Result<()> {
        let before = self.entries.len();
        self.entries.retain(|e| e.handle != handle);
        if self.entries.len() == before {
            return Err(Error::Refused(format!("unknown aid handle {}", handle.0)));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn find(&self, aid: &[u8]) -> Option<AidHandle> {
        self.entries
            .iter()
            .find(|e| !e.aid.is_empty() && e.aid == aid)
            .map(|e| e.handle)
    }

    fn wildcard(&self) -> Option<AidHandle> {
        self.entries.iter().find(|e| e.aid.is_empty()).map(|e| e.handle)
    }

    /// Handler for a SELECT of `aid`: an exact match, else the wildcard.
    pub fn route(&self, aid: &[u8]) -> Option<AidHandle> {
        self.find(aid).or_else(|| self.wildcard())
    }

    /// Hand `frame` to the handler behind `handle`.
    pub fn dispatch(&mut self, handle: AidHandle, event: AidEvent, frame: &[u8]) -> Option<Vec<u8>> {
        self.entries
            .iter_mut()
            .find(|e| e.handle == handle)
            .and_then(|e| e.handler.on_frame(event, frame))
    }
}
