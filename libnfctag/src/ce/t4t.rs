// libnfctag/src/ce/t4t.rs
//! Type 4 Tag emulation.
//!
//! The NDEF application exposes the capability container (E103) and the
//! NDEF file (E104). Any other application selected by name is routed to
//! the registered AID handlers.

use log::{debug, info, warn};

use super::{AidEvent, AidHandle, CeCtx, CeEvent};
use crate::protocol::apdu::{
    T4T_AID_V1, T4T_AID_V2, T4T_CC_FILE_ID, T4T_CC_MIN_LEN, T4T_CLA, T4T_DEFAULT_NDEF_FILE_ID,
    T4T_INS_READ_BINARY, T4T_INS_SELECT, T4T_INS_UPDATE_BINARY, T4T_NLEN_SIZE,
    T4T_NO_WRITE_ACCESS, T4T_P1_SELECT_BY_FILE_ID, T4T_P1_SELECT_BY_NAME,
    T4T_READ_ACCESS_GRANTED, T4T_SW_CLA_NOT_SUPPORTED, T4T_SW_FILE_NOT_FOUND,
    T4T_SW_INS_NOT_SUPPORTED, T4T_SW_NOT_ALLOWED, T4T_SW_OK, T4T_SW_SECURITY,
    T4T_SW_WRONG_LENGTH, T4T_SW_WRONG_P1P2, T4T_WRITE_ACCESS_GRANTED, NdefFileControl, T4tCc,
    T4tVersion,
};
use crate::protocol::{Apdu, ApduResponse};
use crate::types::Status;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum App {
    None,
    Ndef(T4tVersion),
    Aid(AidHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum File {
    None,
    Cc,
    Ndef,
}

pub struct CeT4t {
    app: App,
    file: File,
}

impl Default for CeT4t {
    fn default() -> Self {
        Self::new()
    }
}

impl CeT4t {
    pub fn new() -> Self {
        Self {
            app: App::None,
            file: File::None,
        }
    }

    /// Drop the selection of a deregistered AID.
    pub(crate) fn forget_aid(&mut self, handle: AidHandle) {
        if self.app == App::Aid(handle) {
            self.app = App::None;
        }
    }

    pub(crate) fn on_deactivated(&mut self, ctx: &mut CeCtx<'_>) {
        if let App::Aid(handle) = self.app {
            ctx.aids.dispatch(handle, AidEvent::Deactivated, &[]);
        }
        self.app = App::None;
        self.file = File::None;
    }

    pub(crate) fn on_command(&mut self, ctx: &mut CeCtx<'_>, frame: &[u8]) {
        if frame.is_empty() {
            // empty I-block presence check
            ctx.respond(&[]);
            return;
        }
        let apdu = match Apdu::decode(frame) {
            Ok(apdu) => apdu,
            Err(e) => {
                warn!("ce t4t: malformed apdu: {}", e);
                return ctx.respond(&status(T4T_SW_WRONG_LENGTH));
            }
        };

        if apdu.ins == T4T_INS_SELECT && apdu.p1 == T4T_P1_SELECT_BY_NAME {
            return self.select_by_name(ctx, &apdu, frame);
        }
        if let App::Aid(handle) = self.app {
            if let Some(rsp) = ctx.aids.dispatch(handle, AidEvent::Data, frame) {
                ctx.respond(&rsp);
            }
            return;
        }

        let rsp = if apdu.cla != T4T_CLA {
            status(T4T_SW_CLA_NOT_SUPPORTED)
        } else {
            match apdu.ins {
                T4T_INS_SELECT => self.select_file(&apdu),
                T4T_INS_READ_BINARY => self.read_binary(ctx, &apdu),
                T4T_INS_UPDATE_BINARY => self.update_binary(ctx, &apdu),
                other => {
                    debug!("ce t4t: instruction {:#04x} not supported", other);
                    status(T4T_SW_INS_NOT_SUPPORTED)
                }
            }
        };
        ctx.respond(&rsp);
    }

    fn select_by_name(&mut self, ctx: &mut CeCtx<'_>, apdu: &Apdu, frame: &[u8]) {
        if let App::Aid(previous) = self.app {
            ctx.aids.dispatch(previous, AidEvent::Deactivated, &[]);
        }
        self.file = File::None;

        let version = if apdu.data == T4T_AID_V2 {
            Some(T4tVersion::V2)
        } else if apdu.data == T4T_AID_V1 {
            Some(T4tVersion::V1)
        } else {
            None
        };
        if let Some(version) = version {
            debug!("ce t4t: ndef application v{} selected", version.major());
            self.app = App::Ndef(version);
            return ctx.respond(&status(T4T_SW_OK));
        }

        match ctx.aids.route(&apdu.data) {
            Some(handle) => {
                debug!("ce t4t: aid routed to {:?}", handle);
                self.app = App::Aid(handle);
                let rsp = ctx
                    .aids
                    .dispatch(handle, AidEvent::Selected, frame)
                    .unwrap_or_else(|| status(T4T_SW_OK));
                ctx.respond(&rsp);
            }
            None => {
                self.app = App::None;
                ctx.respond(&status(T4T_SW_FILE_NOT_FOUND));
            }
        }
    }

    fn select_file(&mut self, apdu: &Apdu) -> Vec<u8> {
        if !matches!(self.app, App::Ndef(_)) || apdu.p1 != T4T_P1_SELECT_BY_FILE_ID {
            return status(T4T_SW_FILE_NOT_FOUND);
        }
        let file_id = match apdu.data.as_slice() {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            _ => return status(T4T_SW_WRONG_LENGTH),
        };
        self.file = match file_id {
            T4T_CC_FILE_ID => File::Cc,
            T4T_DEFAULT_NDEF_FILE_ID => File::Ndef,
            other => {
                debug!("ce t4t: file {:#06x} not found", other);
                File::None
            }
        };
        if self.file == File::None {
            return status(T4T_SW_FILE_NOT_FOUND);
        }
        status(T4T_SW_OK)
    }

    fn cc(&self, ctx: &CeCtx<'_>) -> T4tCc {
        let version = match self.app {
            App::Ndef(T4tVersion::V1) => 0x10,
            _ => 0x20,
        };
        T4tCc {
            cc_len: T4T_CC_MIN_LEN,
            version,
            max_le: ctx.config.t4t_max_le,
            max_lc: ctx.config.t4t_max_lc,
            ndef_fc: NdefFileControl {
                file_id: T4T_DEFAULT_NDEF_FILE_ID,
                max_file_size: (ctx.ndef.max_size() + T4T_NLEN_SIZE) as u16,
                read_access: T4T_READ_ACCESS_GRANTED,
                write_access: if ctx.ndef.is_read_only() {
                    T4T_NO_WRITE_ACCESS
                } else {
                    T4T_WRITE_ACCESS_GRANTED
                },
            },
        }
    }

    /// NDEF file as the reader sees it: NLEN then the data area.
    fn ndef_file(ctx: &CeCtx<'_>) -> Vec<u8> {
        let ndef = &*ctx.ndef;
        match &ndef.scratch {
            Some(scratch) => scratch.clone(),
            None => {
                let mut file = (ndef.message().len() as u16).to_be_bytes().to_vec();
                file.extend_from_slice(ndef.message());
                file
            }
        }
    }

    fn read_binary(&mut self, ctx: &mut CeCtx<'_>, apdu: &Apdu) -> Vec<u8> {
        let image = match self.file {
            File::None => return status(T4T_SW_NOT_ALLOWED),
            File::Cc => self.cc(ctx).encode(),
            File::Ndef => Self::ndef_file(ctx),
        };
        let offset = apdu.offset();
        if offset > image.len() || (offset == image.len() && offset != 0) {
            return status(T4T_SW_WRONG_P1P2);
        }
        let le = match apdu.le {
            Some(0) | None => 256,
            Some(le) => le as usize,
        }
        .min(ctx.config.t4t_max_le as usize);
        let end = (offset + le).min(image.len());
        ApduResponse::encode(&image[offset..end], T4T_SW_OK)
    }

    fn update_binary(&mut self, ctx: &mut CeCtx<'_>, apdu: &Apdu) -> Vec<u8> {
        match self.file {
            File::None => return status(T4T_SW_NOT_ALLOWED),
            File::Cc => return status(T4T_SW_SECURITY),
            File::Ndef if ctx.ndef.is_read_only() => return status(T4T_SW_SECURITY),
            File::Ndef => {}
        }
        let file_size = ctx.ndef.max_size() + T4T_NLEN_SIZE;
        let offset = apdu.offset();
        if offset >= file_size {
            return status(T4T_SW_WRONG_P1P2);
        }
        if apdu.data.is_empty() || offset + apdu.data.len() > file_size {
            return status(T4T_SW_WRONG_LENGTH);
        }

        let starting = !ctx.ndef.is_updating();
        if starting {
            let current = Self::ndef_file(ctx);
            let file = ctx.ndef.begin_update();
            file.clear();
            file.extend_from_slice(&current);
            file.resize(file_size, 0x00);
        }
        let Some(file) = ctx.ndef.scratch.as_mut() else {
            return status(T4T_SW_NOT_ALLOWED);
        };
        file[offset..offset + apdu.data.len()].copy_from_slice(&apdu.data);
        let nlen = u16::from_be_bytes([file[0], file[1]]) as usize;
        let touches_nlen = offset < T4T_NLEN_SIZE;

        if touches_nlen && nlen != 0 {
            return self.finish_update(ctx, nlen);
        }
        if starting {
            ctx.notify(CeEvent::NdefUpdateStart);
        }
        let timeout = ctx.config.t4t_update_timeout_ms;
        ctx.start_timer(timeout);
        status(T4T_SW_OK)
    }

    fn finish_update(&mut self, ctx: &mut CeCtx<'_>, nlen: usize) -> Vec<u8> {
        ctx.stop_timer();
        let file = ctx.ndef.scratch.take().unwrap_or_default();
        if nlen > ctx.ndef.max_size() || file.len() < T4T_NLEN_SIZE + nlen {
            warn!("ce t4t: NLEN {} exceeds the ndef file", nlen);
            ctx.notify(CeEvent::NdefUpdateAbort);
            return status(T4T_SW_WRONG_LENGTH);
        }
        let data = file[T4T_NLEN_SIZE..T4T_NLEN_SIZE + nlen].to_vec();
        ctx.ndef.data = data.clone();
        info!("ce t4t: ndef updated, {} bytes", nlen);
        ctx.notify(CeEvent::NdefUpdateComplete {
            status: Status::Ok,
            data,
        });
        status(T4T_SW_OK)
    }
}

fn status(sw: u16) -> Vec<u8> {
    sw.to_be_bytes().to_vec()
}
