// libnfctag/src/ce/mod.rs
//! Card emulation engine.
//!
//! [`CardEmulator`] answers a remote reader from an NDEF message supplied
//! by the application. One technology is emulated at a time, chosen by
//! `activate_t3t` or `activate_t4t`. Updates written by the reader land in
//! a scratch copy and replace the local message only once complete.

pub mod aid;
pub mod t3t;
pub mod t4t;

pub use aid::{AidEvent, AidHandle, AidHandler};

use log::{debug, trace, warn};

use crate::config::CeConfig;
use crate::protocol::apdu::T4T_MAX_FILE_SIZE;
use crate::transport::{ConnEvent, Link, QuickTimer, Transport};
use crate::types::{Idm, Status, TagProtocol};
use crate::utils::bytes_to_hex_spaced;
use crate::{Error, Result};

use self::aid::AidRegistry;
use self::t3t::CeT3t;
use self::t4t::CeT4t;

/// Largest local NDEF message: the T4T NDEF file also holds NLEN.
pub const CE_MAX_NDEF_SIZE: usize = T4T_MAX_FILE_SIZE as usize - 2;

/// Notifications delivered to the card emulation client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CeEvent {
    Activated(TagProtocol),
    Deactivated,
    /// The reader started rewriting the NDEF message.
    NdefUpdateStart,
    /// The reader finished an update; `data` is the new message.
    NdefUpdateComplete { status: Status, data: Vec<u8> },
    /// An update was abandoned; the previous message is kept.
    NdefUpdateAbort,
    /// A command outside the NDEF mapping.
    RawFrame(Vec<u8>),
}

/// NDEF message served to the reader.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalNdef {
    data: Vec<u8>,
    max_size: usize,
    read_only: bool,
    /// Working copy while the reader updates it: the data area for T3T,
    /// NLEN followed by the data area for T4T.
    scratch: Option<Vec<u8>>,
}

impl LocalNdef {
    pub fn message(&self) -> &[u8] {
        &self.data
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_updating(&self) -> bool {
        self.scratch.is_some()
    }

    /// Data area padded with zeros to `max_size`.
    fn area(&self) -> Vec<u8> {
        let mut area = self.data.clone();
        area.resize(self.max_size, 0x00);
        area
    }

    fn begin_update(&mut self) -> &mut Vec<u8> {
        let area = self.area();
        self.scratch.get_or_insert(area)
    }

    /// Adopt the first `len` bytes of the scratch area as the message.
    fn commit(&mut self, len: usize) -> Result<Vec<u8>> {
        let area = self.scratch.take().unwrap_or_else(|| self.area());
        if len > self.max_size {
            return Err(Error::InvalidLength {
                expected: self.max_size,
                actual: len,
            });
        }
        self.data = area[..len].to_vec();
        Ok(self.data.clone())
    }

    fn abort(&mut self) -> bool {
        self.scratch.take().is_some()
    }
}

/// What a responder may touch while handling one frame.
pub(crate) struct CeCtx<'a> {
    link: &'a mut Link<CeEvent>,
    pub config: &'a CeConfig,
    pub ndef: &'a mut LocalNdef,
    pub aids: &'a mut AidRegistry,
}

impl CeCtx<'_> {
    /// Send a response frame to the reader.
    pub fn respond(&mut self, frame: &[u8]) {
        if let Err(e) = self.link.send(frame) {
            warn!("ce response not sent: {}", e);
        }
    }

    pub fn notify(&mut self, event: CeEvent) {
        self.link.notify(event);
    }

    pub fn start_timer(&mut self, timeout_ms: u64) {
        self.link.start_timer(timeout_ms);
    }

    pub fn stop_timer(&mut self) {
        self.link.stop_timer();
    }
}

enum Active {
    None,
    T3t(CeT3t),
    T4t(CeT4t),
}

type Client = Box<dyn FnMut(CeEvent)>;

/// Card emulation context.
pub struct CardEmulator {
    link: Link<CeEvent>,
    config: CeConfig,
    client: Option<Client>,
    undelivered: Vec<CeEvent>,
    ndef: LocalNdef,
    active: Active,
    aids: AidRegistry,
}

impl CardEmulator {
    pub fn new(transport: Box<dyn Transport>, timer: Box<dyn QuickTimer>, config: CeConfig) -> Self {
        Self {
            link: Link::new(transport, timer),
            config,
            client: None,
            undelivered: Vec::new(),
            ndef: LocalNdef::default(),
            active: Active::None,
            aids: AidRegistry::default(),
        }
    }

    pub fn set_client<F>(&mut self, client: F)
    where
        F: FnMut(CeEvent) + 'static,
    {
        self.client = Some(Box::new(client));
    }

    /// Events produced while no client was installed.
    pub fn take_events(&mut self) -> Vec<CeEvent> {
        std::mem::take(&mut self.undelivered)
    }

    pub fn config(&self) -> &CeConfig {
        &self.config
    }

    pub fn local_ndef(&self) -> &LocalNdef {
        &self.ndef
    }

    pub fn protocol(&self) -> Option<TagProtocol> {
        match self.active {
            Active::None => None,
            Active::T3t(_) => Some(TagProtocol::T3t),
            Active::T4t(_) => Some(TagProtocol::T4t),
        }
    }

    /// Install the message served to readers. `max_size` bounds what a
    /// reader may write back.
    pub fn set_local_ndef(&mut self, read_only: bool, max_size: usize, msg: &[u8]) -> Result<()> {
        if self.ndef.is_updating() {
            return Err(Error::Busy);
        }
        if max_size > CE_MAX_NDEF_SIZE {
            return Err(Error::Refused(format!(
                "local ndef size {} exceeds {}",
                max_size, CE_MAX_NDEF_SIZE
            )));
        }
        if msg.len() > max_size {
            return Err(Error::InvalidLength {
                expected: max_size,
                actual: msg.len(),
            });
        }
        debug!(
            "local ndef: {} of {} bytes{}",
            msg.len(),
            max_size,
            if read_only { ", read only" } else { "" }
        );
        self.ndef = LocalNdef {
            data: msg.to_vec(),
            max_size,
            read_only,
            scratch: None,
        };
        Ok(())
    }

    /// Register `aid` for T4T routing. An empty AID registers the wildcard
    /// handler receiving every SELECT no other entry matches.
    pub fn register_aid(&mut self, aid: &[u8], handler: Box<dyn AidHandler>) -> Result<AidHandle> {
        self.aids.register(aid, handler)
    }

    pub fn deregister_aid(&mut self, handle: AidHandle) -> Result<()> {
        self.aids.deregister(handle)?;
        if let Active::T4t(t4t) = &mut self.active {
            t4t.forget_aid(handle);
        }
        Ok(())
    }

    pub fn activate_t3t(&mut self, idm: Idm) -> Result<()> {
        self.activate(Active::T3t(CeT3t::new(idm)), TagProtocol::T3t)
    }

    pub fn activate_t4t(&mut self) -> Result<()> {
        self.activate(Active::T4t(CeT4t::new()), TagProtocol::T4t)
    }

    fn activate(&mut self, active: Active, protocol: TagProtocol) -> Result<()> {
        if !matches!(self.active, Active::None) {
            return Err(Error::Busy);
        }
        debug!("ce {} activated", protocol);
        self.active = active;
        self.link.notify(CeEvent::Activated(protocol));
        self.deliver();
        Ok(())
    }

    /// A command frame arrived from the reader.
    pub fn on_data(&mut self, frame: &[u8]) {
        trace!("ce rx [{}]", bytes_to_hex_spaced(frame));
        let mut ctx = CeCtx {
            link: &mut self.link,
            config: &self.config,
            ndef: &mut self.ndef,
            aids: &mut self.aids,
        };
        match &mut self.active {
            Active::None => warn!("ce frame received while not activated"),
            Active::T3t(t3t) => t3t.on_command(&mut ctx, frame),
            Active::T4t(t4t) => t4t.on_command(&mut ctx, frame),
        }
        self.deliver();
    }

    /// The update abort timer expired.
    pub fn on_timeout(&mut self) {
        if self.ndef.abort() {
            warn!("ce ndef update timed out");
            self.link.notify(CeEvent::NdefUpdateAbort);
        }
        self.deliver();
    }

    pub fn on_deactivated(&mut self) {
        self.link.stop_timer();
        if self.ndef.abort() {
            self.link.notify(CeEvent::NdefUpdateAbort);
        }
        if let Active::T4t(t4t) = &mut self.active {
            let mut ctx = CeCtx {
                link: &mut self.link,
                config: &self.config,
                ndef: &mut self.ndef,
                aids: &mut self.aids,
            };
            t4t.on_deactivated(&mut ctx);
        }
        if !matches!(self.active, Active::None) {
            self.active = Active::None;
            self.link.notify(CeEvent::Deactivated);
        }
        self.deliver();
    }

    pub fn handle_conn_event(&mut self, event: ConnEvent) {
        match event {
            ConnEvent::Data(data) => self.on_data(&data),
            ConnEvent::Deactivated | ConnEvent::Close => self.on_deactivated(),
            ConnEvent::Create => debug!("ce rf connection created"),
            ConnEvent::Error => warn!("ce rf connection error"),
        }
    }

    fn deliver(&mut self) {
        for ev in self.link.take_events() {
            debug!("ce event {:?}", ev);
            match self.client.as_mut() {
                Some(client) => client(ev),
                None => self.undelivered.push(ev),
            }
        }
    }
}
