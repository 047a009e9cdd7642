// libnfctag/src/ce/t3t.rs
//! Type 3 Tag emulation: CHECK and UPDATE against the NDEF service.
//!
//! Block 0 of the service is the attribute information block, synthesised
//! from the local message. A reader starts an update by writing it with
//! WriteF = 0x0F and commits by writing it again with WriteF = 0x00 and
//! the new Ln. In between, CHECK serves the data being written.

use log::{debug, info, warn};

use super::{CeCtx, CeEvent};
use crate::protocol::parser::Reader;
use crate::protocol::t3t::{
    self, T3T_BLOCK_SIZE, T3T_CMD_CHECK, T3T_CMD_UPDATE, T3T_MAX_CHECK_BLOCKS, T3T_NDEF_VERSION,
    T3T_RSP_CHECK,
    T3T_RSP_UPDATE, T3T_RWFLAG_RO, T3T_RWFLAG_RW, T3T_STATUS1_ERROR, T3T_STATUS1_GENERAL,
    T3T_STATUS1_OK, T3T_STATUS2_ILLEGAL_BLOCK, T3T_STATUS2_ILLEGAL_NBLK, T3T_STATUS2_ILLEGAL_NSVC,
    T3T_STATUS2_MEMORY, T3T_WRITEF_OFF, T3T_WRITEF_ON,
};
use crate::protocol::NdefAttributes;
use crate::types::{BlockElement, Idm, ServiceCode, Status};
use crate::Result;

/// Services a single CHECK or UPDATE may name.
const T3T_MAX_SERVICES: usize = 16;

/// FeliCa status flag pair carried in an error response.
type StatusFlags = (u8, u8);

const ILLEGAL_NSVC: StatusFlags = (T3T_STATUS1_GENERAL, T3T_STATUS2_ILLEGAL_NSVC);
const ILLEGAL_NBLK: StatusFlags = (T3T_STATUS1_GENERAL, T3T_STATUS2_ILLEGAL_NBLK);
const ILLEGAL_BLOCK: StatusFlags = (T3T_STATUS1_ERROR, T3T_STATUS2_ILLEGAL_BLOCK);
const MEMORY_ERROR: StatusFlags = (T3T_STATUS1_ERROR, T3T_STATUS2_MEMORY);

/// One validated block of an UPDATE, applied once the whole request checks
/// out.
enum BlockWrite<'a> {
    Attributes(NdefAttributes),
    Data { start: usize, data: &'a [u8] },
}

/// Parsed CHECK or UPDATE body.
#[derive(Debug)]
struct Request<'a> {
    services: Vec<ServiceCode>,
    blocks: Vec<BlockElement>,
    data: &'a [u8],
}

pub struct CeT3t {
    idm: Idm,
}

impl CeT3t {
    pub fn new(idm: Idm) -> Self {
        Self { idm }
    }

    pub fn idm(&self) -> &Idm {
        &self.idm
    }

    pub(crate) fn on_command(&mut self, ctx: &mut CeCtx<'_>, frame: &[u8]) {
        if frame.len() < 2 || frame[0] as usize != frame.len() {
            warn!("ce t3t: bad length byte in {} byte frame", frame.len());
            return;
        }
        let code = frame[1];
        if code != T3T_CMD_CHECK && code != T3T_CMD_UPDATE {
            debug!("ce t3t: command {:#04x} forwarded", code);
            ctx.notify(CeEvent::RawFrame(frame.to_vec()));
            return;
        }
        if frame.len() < 10 || &frame[2..10] != self.idm.as_bytes() {
            debug!("ce t3t: frame for another idm ignored");
            return;
        }

        let rsp_code = if code == T3T_CMD_CHECK {
            T3T_RSP_CHECK
        } else {
            T3T_RSP_UPDATE
        };
        let result = match parse_request(&frame[10..]) {
            Ok(Ok(req)) if code == T3T_CMD_CHECK => self.check(ctx, &req),
            Ok(Ok(req)) => self.update(ctx, &req),
            Ok(Err(flags)) => Err(flags),
            Err(e) => {
                warn!("ce t3t: malformed request: {}", e);
                return;
            }
        };
        let rsp = match result {
            Ok(payload) => t3t::encode_response(rsp_code, &self.idm, T3T_STATUS1_OK, 0x00, &payload),
            Err((status1, status2)) => {
                debug!("ce t3t: status {:#04x}/{:#04x}", status1, status2);
                t3t::encode_response(rsp_code, &self.idm, status1, status2, &[])
            }
        };
        match rsp {
            Ok(rsp) => ctx.respond(&rsp),
            Err(e) => warn!("ce t3t: response dropped: {}", e),
        }
    }

    fn attributes(ctx: &CeCtx<'_>) -> NdefAttributes {
        let ndef = &*ctx.ndef;
        NdefAttributes {
            version: T3T_NDEF_VERSION,
            nbr: ctx.config.t3t_nbr,
            nbw: ctx.config.t3t_nbw,
            nmaxb: ndef.max_size().div_ceil(T3T_BLOCK_SIZE) as u16,
            writef: if ndef.is_updating() {
                T3T_WRITEF_ON
            } else {
                T3T_WRITEF_OFF
            },
            rwflag: if ndef.is_read_only() {
                T3T_RWFLAG_RO
            } else {
                T3T_RWFLAG_RW
            },
            ln: ndef.message().len() as u32,
        }
    }

    /// Validate service indexes and block numbers of a request.
    fn check_blocks(req: &Request<'_>, nmaxb: u16) -> std::result::Result<(), StatusFlags> {
        for blk in &req.blocks {
            let svc = req
                .services
                .get(blk.service_index as usize)
                .ok_or(ILLEGAL_BLOCK)?;
            if *svc != ServiceCode::NDEF_RW && *svc != ServiceCode::NDEF_RO {
                return Err(ILLEGAL_BLOCK);
            }
            if blk.block_number > nmaxb {
                return Err(ILLEGAL_BLOCK);
            }
        }
        Ok(())
    }

    fn check(&mut self, ctx: &mut CeCtx<'_>, req: &Request<'_>) -> std::result::Result<Vec<u8>, StatusFlags> {
        let attr = Self::attributes(ctx);
        if req.blocks.len() > (attr.nbr as usize).min(T3T_MAX_CHECK_BLOCKS) {
            return Err(ILLEGAL_NBLK);
        }
        Self::check_blocks(req, attr.nmaxb)?;

        let area = match &ctx.ndef.scratch {
            Some(scratch) => scratch.clone(),
            None => ctx.ndef.area(),
        };
        let mut payload = Vec::with_capacity(1 + req.blocks.len() * T3T_BLOCK_SIZE);
        payload.push(req.blocks.len() as u8);
        for blk in &req.blocks {
            if blk.block_number == 0 {
                payload.extend_from_slice(&attr.encode());
                continue;
            }
            let start = (blk.block_number as usize - 1) * T3T_BLOCK_SIZE;
            let mut block = [0u8; T3T_BLOCK_SIZE];
            if start < area.len() {
                let end = (start + T3T_BLOCK_SIZE).min(area.len());
                block[..end - start].copy_from_slice(&area[start..end]);
            }
            payload.extend_from_slice(&block);
        }
        Ok(payload)
    }

    fn update(&mut self, ctx: &mut CeCtx<'_>, req: &Request<'_>) -> std::result::Result<Vec<u8>, StatusFlags> {
        let attr = Self::attributes(ctx);
        if req.blocks.len() > attr.nbw as usize {
            return Err(ILLEGAL_NBLK);
        }
        if req.data.len() != req.blocks.len() * T3T_BLOCK_SIZE {
            return Err(ILLEGAL_NBLK);
        }
        Self::check_blocks(req, attr.nmaxb)?;
        if ctx.ndef.is_read_only() || req.services.contains(&ServiceCode::NDEF_RO) {
            return Err(MEMORY_ERROR);
        }

        let mut writes = Vec::with_capacity(req.blocks.len());
        for (blk, data) in req.blocks.iter().zip(req.data.chunks(T3T_BLOCK_SIZE)) {
            if blk.block_number == 0 {
                writes.push(BlockWrite::Attributes(Self::validate_attributes(ctx, data)?));
                continue;
            }
            let start = (blk.block_number as usize - 1) * T3T_BLOCK_SIZE;
            if start >= ctx.ndef.max_size() {
                return Err(ILLEGAL_BLOCK);
            }
            writes.push(BlockWrite::Data { start, data });
        }

        for write in writes {
            match write {
                BlockWrite::Attributes(attr) => self.update_attributes(ctx, attr)?,
                BlockWrite::Data { start, data } => {
                    let area = ctx.ndef.begin_update();
                    let end = (start + T3T_BLOCK_SIZE).min(area.len());
                    area[start..end].copy_from_slice(&data[..end - start]);
                }
            }
        }
        Ok(Vec::new())
    }

    /// Decode an attribute block written by the reader. A commit whose Ln
    /// exceeds the data area abandons the pending update.
    fn validate_attributes(
        ctx: &mut CeCtx<'_>,
        block: &[u8],
    ) -> std::result::Result<NdefAttributes, StatusFlags> {
        let attr = NdefAttributes::decode(block).map_err(|e| {
            warn!("ce t3t: attribute block rejected: {}", e);
            MEMORY_ERROR
        })?;
        match attr.writef {
            T3T_WRITEF_ON => Ok(attr),
            T3T_WRITEF_OFF if attr.ln as usize > ctx.ndef.max_size() => {
                warn!(
                    "ce t3t: Ln {} exceeds the {} byte data area",
                    attr.ln,
                    ctx.ndef.max_size()
                );
                if ctx.ndef.abort() {
                    ctx.notify(CeEvent::NdefUpdateAbort);
                }
                Err(MEMORY_ERROR)
            }
            T3T_WRITEF_OFF => Ok(attr),
            other => {
                warn!("ce t3t: WriteF {:#04x}", other);
                Err(MEMORY_ERROR)
            }
        }
    }

    fn update_attributes(
        &mut self,
        ctx: &mut CeCtx<'_>,
        attr: NdefAttributes,
    ) -> std::result::Result<(), StatusFlags> {
        match attr.writef {
            T3T_WRITEF_ON => {
                if !ctx.ndef.is_updating() {
                    ctx.ndef.begin_update();
                    ctx.notify(CeEvent::NdefUpdateStart);
                }
                Ok(())
            }
            T3T_WRITEF_OFF => {
                let was_updating = ctx.ndef.is_updating();
                let data = match ctx.ndef.commit(attr.ln as usize) {
                    Ok(data) => data,
                    Err(e) => {
                        warn!("ce t3t: update rejected: {}", e);
                        if was_updating {
                            ctx.notify(CeEvent::NdefUpdateAbort);
                        }
                        return Err(MEMORY_ERROR);
                    }
                };
                if attr.rwflag == T3T_RWFLAG_RO {
                    ctx.ndef.read_only = true;
                }
                info!("ce t3t: ndef updated, {} bytes", data.len());
                ctx.notify(CeEvent::NdefUpdateComplete {
                    status: Status::Ok,
                    data,
                });
                Ok(())
            }
            _ => Err(MEMORY_ERROR),
        }
    }
}

/// Parse the service and block lists following the IDm. The inner error
/// is the FeliCa status to answer with; the outer one marks a frame too
/// malformed to answer.
fn parse_request(body: &[u8]) -> Result<std::result::Result<Request<'_>, StatusFlags>> {
    let mut r = Reader::new(body);
    let nsvc = r.u8()? as usize;
    if nsvc == 0 || nsvc > T3T_MAX_SERVICES {
        return Ok(Err(ILLEGAL_NSVC));
    }
    let mut services = Vec::with_capacity(nsvc);
    for _ in 0..nsvc {
        let raw = r.bytes(2)?;
        services.push(ServiceCode::from_le_bytes([raw[0], raw[1]]));
    }
    let nblk = r.u8()? as usize;
    if nblk == 0 {
        return Ok(Err(ILLEGAL_NBLK));
    }
    let mut blocks = Vec::with_capacity(nblk);
    for _ in 0..nblk {
        let head = r.u8()?;
        let service_index = head & 0x0F;
        let block_number = if head & 0x80 != 0 {
            r.u8()? as u16
        } else {
            r.le_u16()?
        };
        blocks.push(BlockElement::new(service_index, block_number));
    }
    Ok(Ok(Request {
        services,
        blocks,
        data: r.rest(),
    }))
}
