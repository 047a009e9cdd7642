// libnfctag/src/rw/mod.rs
//! Reader/writer engine.
//!
//! [`ReaderWriter`] owns the control block of the activated tag. Exactly
//! one tag technology is live at a time: the control block is an enum
//! selected by the `select_*` entry points and dropped on deactivation.
//! Public operations only report whether they started; the outcome is
//! delivered later as an [`RwEvent`].

pub mod event;
pub mod i93;
pub mod mfc;
pub mod retry;
pub mod t1t;
pub mod t2t;
pub mod t3t;
pub mod t4t;

pub use event::{NdefInfo, RwEvent};
pub use retry::Supervisor;

use log::{debug, error, trace, warn};

use crate::config::RwConfig;
use crate::protocol::{RawFrame, WireCommand};
use crate::transport::{ConnEvent, Link, QuickTimer, Transport};
use crate::types::{Idm, NdefFlags, Pmm, Status, SystemCode, TagProtocol};
use crate::utils::bytes_to_hex_spaced;
use crate::{Error, Result};

use self::i93::I93;
use self::mfc::Mfc;
use self::t1t::T1t;
use self::t2t::T2t;
use self::t3t::T3t;
use self::t4t::T4t;

/// Top level state of a tag control block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RwState {
    NotActivated,
    Idle,
    DetectNdef,
    ReadNdef,
    WriteNdef,
    SetReadOnly,
    Format,
    PresenceCheck,
    ReadBlock(u16),
    WriteBlock(u16),
}

impl RwState {
    /// Event reporting the failure of the operation running in this state.
    pub fn failure_event(
        &self,
        protocol: TagProtocol,
        status: Status,
        flags: NdefFlags,
    ) -> Option<RwEvent> {
        let ev = match self {
            RwState::NotActivated | RwState::Idle => return None,
            RwState::DetectNdef => RwEvent::NdefDetect(NdefInfo::failed(protocol, status, flags)),
            RwState::ReadNdef => RwEvent::NdefReadFailed(status),
            RwState::WriteNdef => RwEvent::NdefUpdateFailed(status),
            RwState::SetReadOnly => RwEvent::SetReadOnly(status),
            RwState::Format => RwEvent::Format(status),
            RwState::PresenceCheck => RwEvent::PresenceCheck(status),
            RwState::ReadBlock(block) => RwEvent::BlockData {
                status,
                block: *block,
                data: Vec::new(),
            },
            RwState::WriteBlock(block) => RwEvent::BlockWritten {
                status,
                block: *block,
            },
        };
        Some(ev)
    }
}

/// What a state machine step may touch: the link, the retry supervisor
/// and the configuration.
pub struct RwCtx<'a> {
    link: &'a mut Link<RwEvent>,
    retry: &'a mut Supervisor,
    pub config: &'a RwConfig,
}

impl RwCtx<'_> {
    /// Send a supervised request: the timer is armed and the request is
    /// retained for retransmission.
    pub fn send<C: WireCommand + 'static>(&mut self, cmd: C, timeout_ms: u64) -> Result<()> {
        debug!("send {:?}", cmd);
        let frame = cmd.encode()?;
        self.link.transmit(&frame, timeout_ms)?;
        self.retry.record(Box::new(cmd), timeout_ms);
        Ok(())
    }

    /// Send a request whose expected outcome is the absence of a response.
    /// Its timeout is handled by the state machine and never retried.
    pub fn send_passive<C: WireCommand>(&mut self, cmd: C, timeout_ms: u64) -> Result<()> {
        debug!("send (passive ack) {:?}", cmd);
        self.retry.clear();
        let frame = cmd.encode()?;
        self.link.transmit(&frame, timeout_ms)
    }

    pub fn notify(&mut self, event: RwEvent) {
        self.link.notify(event);
    }
}

/// Per tag type state machine.
///
/// Operation entry points validate their preconditions and send the first
/// command. Any `Err` returned from `on_response` or `on_timeout` becomes
/// the failure event of the running operation.
pub(crate) trait TagHandler {
    fn protocol(&self) -> TagProtocol;

    fn state(&self) -> RwState;

    fn set_state(&mut self, state: RwState);

    fn detect_ndef(&mut self, ctx: &mut RwCtx<'_>) -> Result<()>;

    fn read_ndef(&mut self, ctx: &mut RwCtx<'_>, max_len: usize) -> Result<()>;

    fn write_ndef(&mut self, ctx: &mut RwCtx<'_>, msg: &[u8]) -> Result<()>;

    fn set_read_only(&mut self, _ctx: &mut RwCtx<'_>, _hard_lock: bool) -> Result<()> {
        Err(Error::NotSupported(format!(
            "set read only on {}",
            self.protocol()
        )))
    }

    fn format_ndef(&mut self, _ctx: &mut RwCtx<'_>) -> Result<()> {
        Err(Error::NotSupported(format!("format on {}", self.protocol())))
    }

    fn presence_check(&mut self, ctx: &mut RwCtx<'_>) -> Result<()>;

    fn on_response(&mut self, ctx: &mut RwCtx<'_>, data: &[u8]) -> Result<()>;

    /// Give the state machine a chance to treat a timeout as an answer.
    /// `Ok(false)` hands the timeout to the retry supervisor.
    fn on_timeout(&mut self, _ctx: &mut RwCtx<'_>) -> Result<bool> {
        Ok(false)
    }

    /// Drop the state of the running operation.
    fn reset_op(&mut self) {}

    /// Flags reported with a failed detection.
    fn failure_flags(&self) -> NdefFlags {
        NdefFlags::NONE
    }

    /// Terminate the running operation successfully.
    fn complete(&mut self, ctx: &mut RwCtx<'_>, event: RwEvent) {
        self.reset_op();
        self.set_state(RwState::Idle);
        ctx.notify(event);
    }

    /// Terminate the running operation with `status`.
    fn fail(&mut self, ctx: &mut RwCtx<'_>, status: Status) {
        let state = self.state();
        let flags = self.failure_flags();
        self.reset_op();
        self.set_state(RwState::Idle);
        if let Some(ev) = state.failure_event(self.protocol(), status, flags) {
            ctx.notify(ev);
        }
    }
}

/// Control block of the activated tag.
#[allow(clippy::large_enum_variant)]
pub(crate) enum TagCb {
    NotActivated,
    T1t(T1t),
    T2t(T2t),
    T3t(T3t),
    T4t(T4t),
    I93(I93),
    Mfc(Mfc),
}

impl TagCb {
    fn handler(&self) -> Option<&dyn TagHandler> {
        match self {
            TagCb::NotActivated => None,
            TagCb::T1t(t) => Some(t),
            TagCb::T2t(t) => Some(t),
            TagCb::T3t(t) => Some(t),
            TagCb::T4t(t) => Some(t),
            TagCb::I93(t) => Some(t),
            TagCb::Mfc(t) => Some(t),
        }
    }

    fn handler_mut(&mut self) -> Option<&mut dyn TagHandler> {
        match self {
            TagCb::NotActivated => None,
            TagCb::T1t(t) => Some(t),
            TagCb::T2t(t) => Some(t),
            TagCb::T3t(t) => Some(t),
            TagCb::T4t(t) => Some(t),
            TagCb::I93(t) => Some(t),
            TagCb::Mfc(t) => Some(t),
        }
    }
}

type Client = Box<dyn FnMut(RwEvent)>;

/// Reader/writer context.
pub struct ReaderWriter {
    link: Link<RwEvent>,
    retry: Supervisor,
    config: RwConfig,
    client: Option<Client>,
    /// Events produced while no client is installed.
    undelivered: Vec<RwEvent>,
    tcb: TagCb,
}

impl ReaderWriter {
    pub fn new(transport: Box<dyn Transport>, timer: Box<dyn QuickTimer>, config: RwConfig) -> Self {
        Self {
            link: Link::new(transport, timer),
            retry: Supervisor::new(config.max_retries),
            config,
            client: None,
            undelivered: Vec::new(),
            tcb: TagCb::NotActivated,
        }
    }

    /// Install the callback receiving every [`RwEvent`].
    pub fn set_client<F>(&mut self, client: F)
    where
        F: FnMut(RwEvent) + 'static,
    {
        self.client = Some(Box::new(client));
    }

    /// Events produced while no client was installed.
    pub fn take_events(&mut self) -> Vec<RwEvent> {
        std::mem::take(&mut self.undelivered)
    }

    pub fn config(&self) -> &RwConfig {
        &self.config
    }

    pub fn protocol(&self) -> Option<TagProtocol> {
        self.tcb.handler().map(|t| t.protocol())
    }

    pub fn state(&self) -> RwState {
        self.tcb
            .handler()
            .map(|t| t.state())
            .unwrap_or(RwState::NotActivated)
    }

    pub fn is_idle(&self) -> bool {
        self.state() == RwState::Idle
    }

    /// Retransmissions performed for the outstanding request.
    pub fn retries(&self) -> u8 {
        self.retry.retries()
    }

    fn activate(&mut self, tcb: TagCb) {
        self.link.stop_timer();
        self.retry.clear();
        self.tcb = tcb;
        if let Some(t) = self.tcb.handler() {
            debug!("{} activated", t.protocol());
        }
    }

    pub fn select_t1t(&mut self, hr: [u8; 2], uid: &[u8]) -> Result<()> {
        let tag = T1t::new(hr, uid)?;
        self.activate(TagCb::T1t(tag));
        Ok(())
    }

    pub fn select_t2t(&mut self, nfcid1: &[u8]) -> Result<()> {
        let tag = T2t::new(nfcid1)?;
        self.activate(TagCb::T2t(tag));
        Ok(())
    }

    pub fn select_t3t(&mut self, idm: Idm, pmm: Pmm, system_code: SystemCode) -> Result<()> {
        self.activate(TagCb::T3t(T3t::new(idm, pmm, system_code)));
        Ok(())
    }

    pub fn select_t4t(&mut self) -> Result<()> {
        self.activate(TagCb::T4t(T4t::new()));
        Ok(())
    }

    pub fn select_i93(&mut self, uid: &[u8]) -> Result<()> {
        let tag = I93::new(uid)?;
        self.activate(TagCb::I93(tag));
        Ok(())
    }

    pub fn select_mfc(&mut self, uid: &[u8], sak: u8) -> Result<()> {
        let tag = Mfc::new(uid, sak)?;
        self.activate(TagCb::Mfc(tag));
        Ok(())
    }

    /// Forget the activated tag without reporting anything.
    pub fn deselect(&mut self) {
        self.activate(TagCb::NotActivated);
    }

    /// Run the entry point `f` of an operation on an idle control block.
    fn start<F>(&mut self, op: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut TagCb, &mut RwCtx<'_>) -> Result<()>,
    {
        match self.tcb.handler() {
            None => return Err(Error::NotInitialized),
            Some(t) if t.state() != RwState::Idle => {
                debug!("{} rejected: {} busy in {:?}", op, t.protocol(), t.state());
                return Err(Error::Busy);
            }
            Some(_) => {}
        }

        let mut ctx = RwCtx {
            link: &mut self.link,
            retry: &mut self.retry,
            config: &self.config,
        };
        let result = f(&mut self.tcb, &mut ctx);
        if let Err(e) = &result {
            debug!("{} not started: {}", op, e);
            self.link.stop_timer();
            self.retry.clear();
            if let Some(t) = self.tcb.handler_mut() {
                t.reset_op();
                t.set_state(RwState::Idle);
            }
        }
        self.deliver();
        result
    }

    fn handler_op<F>(&mut self, op: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut dyn TagHandler, &mut RwCtx<'_>) -> Result<()>,
    {
        self.start(op, |tcb, ctx| {
            let tag = tcb.handler_mut().ok_or(Error::NotInitialized)?;
            f(tag, ctx)
        })
    }

    pub fn detect_ndef(&mut self) -> Result<()> {
        self.handler_op("detect ndef", |t, ctx| t.detect_ndef(ctx))
    }

    /// Read the detected NDEF message. `max_len` is the size of the
    /// caller's buffer; a longer message is refused.
    pub fn read_ndef(&mut self, max_len: usize) -> Result<()> {
        self.handler_op("read ndef", |t, ctx| t.read_ndef(ctx, max_len))
    }

    pub fn write_ndef(&mut self, msg: &[u8]) -> Result<()> {
        self.handler_op("write ndef", |t, ctx| t.write_ndef(ctx, msg))
    }

    pub fn set_tag_read_only(&mut self, hard_lock: bool) -> Result<()> {
        self.handler_op("set read only", |t, ctx| t.set_read_only(ctx, hard_lock))
    }

    pub fn format_ndef(&mut self) -> Result<()> {
        self.handler_op("format", |t, ctx| t.format_ndef(ctx))
    }

    pub fn presence_check(&mut self) -> Result<()> {
        self.handler_op("presence check", |t, ctx| t.presence_check(ctx))
    }

    /// Send `data` unchanged. The response is reported as
    /// [`RwEvent::RawFrame`].
    pub fn send_raw_frame(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(Error::Refused("empty raw frame".into()));
        }
        self.start("raw frame", |_, ctx| {
            let frame = RawFrame(data.to_vec());
            debug!("send raw frame ({} bytes)", data.len());
            ctx.link.send(&frame.encode()?)
        })
    }

    /// Read T1T byte `byte` of `block`.
    pub fn t1t_read(&mut self, block: u8, byte: u8) -> Result<()> {
        self.start("t1t read", |tcb, ctx| match tcb {
            TagCb::T1t(t) => t.read_byte(ctx, block, byte),
            _ => Err(Error::NotSupported("t1t read on another tag type".into())),
        })
    }

    /// Write T1T byte `byte` of `block`, with erase unless `erase` is false.
    pub fn t1t_write(&mut self, block: u8, byte: u8, value: u8, erase: bool) -> Result<()> {
        self.start("t1t write", |tcb, ctx| match tcb {
            TagCb::T1t(t) => t.write_byte(ctx, block, byte, value, erase),
            _ => Err(Error::NotSupported("t1t write on another tag type".into())),
        })
    }

    /// Read the four T2T blocks starting at `block`.
    pub fn t2t_read(&mut self, block: u16) -> Result<()> {
        self.start("t2t read", |tcb, ctx| match tcb {
            TagCb::T2t(t) => t.read_block(ctx, block),
            _ => Err(Error::NotSupported("t2t read on another tag type".into())),
        })
    }

    pub fn t2t_write(&mut self, block: u16, data: [u8; 4]) -> Result<()> {
        self.start("t2t write", |tcb, ctx| match tcb {
            TagCb::T2t(t) => t.write_block(ctx, block, data),
            _ => Err(Error::NotSupported("t2t write on another tag type".into())),
        })
    }

    pub fn i93_read_single_block(&mut self, block: u16) -> Result<()> {
        self.start("i93 read", |tcb, ctx| match tcb {
            TagCb::I93(t) => t.read_block(ctx, block),
            _ => Err(Error::NotSupported("i93 read on another tag type".into())),
        })
    }

    pub fn i93_write_single_block(&mut self, block: u16, data: &[u8]) -> Result<()> {
        self.start("i93 write", |tcb, ctx| match tcb {
            TagCb::I93(t) => t.write_block(ctx, block, data),
            _ => Err(Error::NotSupported("i93 write on another tag type".into())),
        })
    }

    /// A payload arrived on the RF connection.
    pub fn on_data(&mut self, data: &[u8]) {
        trace!("rx [{}]", bytes_to_hex_spaced(data));
        let mut ctx = RwCtx {
            link: &mut self.link,
            retry: &mut self.retry,
            config: &self.config,
        };
        let Some(tag) = self.tcb.handler_mut() else {
            warn!("data received without an activated tag");
            return;
        };

        if tag.state() == RwState::Idle {
            ctx.notify(RwEvent::RawFrame {
                status: Status::Ok,
                data: data.to_vec(),
            });
        } else {
            ctx.link.stop_timer();
            if let Err(e) = tag.on_response(&mut ctx, data) {
                warn!("{} {:?} failed: {}", tag.protocol(), tag.state(), e);
                tag.fail(&mut ctx, Status::Failed);
            }
            if tag.state() == RwState::Idle {
                ctx.link.stop_timer();
                ctx.retry.clear();
            }
        }
        self.deliver();
    }

    /// The response timer expired.
    pub fn on_timeout(&mut self) {
        let mut ctx = RwCtx {
            link: &mut self.link,
            retry: &mut self.retry,
            config: &self.config,
        };
        let Some(tag) = self.tcb.handler_mut() else {
            return;
        };
        if tag.state() == RwState::Idle {
            return;
        }

        match tag.on_timeout(&mut ctx) {
            Ok(true) => {}
            Ok(false) => match ctx.retry.retry() {
                Some(next) => {
                    warn!("{} timeout in {:?}, retransmitting", tag.protocol(), tag.state());
                    let sent = next.and_then(|(frame, timeout)| ctx.link.transmit(&frame, timeout));
                    if let Err(e) = sent {
                        warn!("retransmission failed: {}", e);
                        tag.fail(&mut ctx, Status::Failed);
                    }
                }
                None => {
                    error!("{} {:?}: retries exhausted", tag.protocol(), tag.state());
                    tag.fail(&mut ctx, Status::Timeout);
                }
            },
            Err(e) => {
                warn!("{} {:?} failed on timeout: {}", tag.protocol(), tag.state(), e);
                tag.fail(&mut ctx, Status::Failed);
            }
        }
        if tag.state() == RwState::Idle {
            ctx.link.stop_timer();
            ctx.retry.clear();
        }
        self.deliver();
    }

    /// The tag left the field. Any running operation fails and the control
    /// block returns to NOT_ACTIVATED.
    pub fn on_deactivated(&mut self) {
        let mut ctx = RwCtx {
            link: &mut self.link,
            retry: &mut self.retry,
            config: &self.config,
        };
        if let Some(tag) = self.tcb.handler_mut() {
            debug!("{} deactivated in {:?}", tag.protocol(), tag.state());
            if tag.state() != RwState::Idle {
                tag.fail(&mut ctx, Status::Failed);
            }
        }
        self.link.stop_timer();
        self.retry.clear();
        self.tcb = TagCb::NotActivated;
        self.deliver();
    }

    /// Dispatch an event of the connection layer.
    pub fn handle_conn_event(&mut self, event: ConnEvent) {
        match event {
            ConnEvent::Data(data) => self.on_data(&data),
            ConnEvent::Deactivated | ConnEvent::Close => self.on_deactivated(),
            ConnEvent::Create => debug!("rf connection created"),
            ConnEvent::Error => {
                let mut ctx = RwCtx {
                    link: &mut self.link,
                    retry: &mut self.retry,
                    config: &self.config,
                };
                if let Some(tag) = self.tcb.handler_mut() {
                    if tag.state() != RwState::Idle {
                        warn!("{} {:?}: connection error", tag.protocol(), tag.state());
                        tag.fail(&mut ctx, Status::Failed);
                    }
                }
                self.link.stop_timer();
                self.retry.clear();
                self.deliver();
            }
        }
    }

    fn deliver(&mut self) {
        for ev in self.link.take_events() {
            debug!("event {:?}", ev);
            match self.client.as_mut() {
                Some(client) => client(ev),
                None => self.undelivered.push(ev),
            }
        }
    }
}
