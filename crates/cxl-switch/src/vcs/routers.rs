//! The four class routers of a virtual switch.
//!
//! Each router runs one host→target task fed by the upstream port and one
//! target→host task per downstream slot. The tasks end when their fifo
//! yields a sentinel; the VCS restarts the per-slot tasks when a slot is
//! rewired.

use std::sync::{Arc, RwLock};

use cxl_proto::io::{cfg_wr_value, CplStatus, CxlIoPacket, IoBody};
use cxl_proto::mem::MemBody;
use cxl_proto::cache::CacheBody;
use cxl_proto::{Bdf, Packet};
use cxl_transport::Connection;
use tracing::{debug, error, warn};

use crate::registers::UpstreamRegisters;
use crate::vcs::routing::RoutingTable;
use crate::vcs::vppb::Vppb;

pub(crate) struct RouterContext {
    pub vcs_id: u8,
    pub upstream_conn: Arc<Connection>,
    pub upstream_regs: Arc<RwLock<UpstreamRegisters>>,
    pub vppbs: Vec<Arc<Vppb>>,
    pub routing: RoutingTable,
    /// Test seam: substitutes every slot's `(bi_enable, bi_forward)`.
    pub bi_override: Option<(bool, bool)>,
}

impl RouterContext {
    async fn send_upstream_cfg_completion(&self, packet: CxlIoPacket) -> bool {
        self.upstream_conn
            .cfg
            .target_to_host
            .send(Packet::Io(packet))
            .await
            .is_ok()
    }

    async fn forward_downstream(&self, slot: usize, class: Class, packet: Packet) -> bool {
        let conn = self.vppbs[slot].connection();
        let fifo = match class {
            Class::Cfg => &conn.cfg,
            Class::Mmio => &conn.mmio,
            Class::Mem => &conn.cxl_mem,
            Class::Cache => &conn.cxl_cache,
        };
        fifo.host_to_target.send(packet).await.is_ok()
    }
}

#[derive(Clone, Copy)]
enum Class {
    Cfg,
    Mmio,
    Mem,
    Cache,
}

// ---------------------------------------------------------------------------
// Config space
// ---------------------------------------------------------------------------

pub(crate) async fn config_host_to_target(ctx: Arc<RouterContext>) {
    while let Some(packet) = ctx.upstream_conn.cfg.host_to_target.recv().await {
        let Packet::Io(mut io) = packet else {
            warn!(vcs = ctx.vcs_id, "non-CXL.io frame on the config path");
            continue;
        };
        let (bdf, tag) = match &mut io.body {
            IoBody::CfgRd(cfg) => {
                cfg.set_req_id(ctx.vcs_id as u16);
                (cfg.bdf(), cfg.tag)
            }
            IoBody::CfgWr(cfg, _) => {
                cfg.set_req_id(ctx.vcs_id as u16);
                (cfg.bdf(), cfg.tag)
            }
            _ => {
                warn!(vcs = ctx.vcs_id, "unexpected CXL.io frame on the config path");
                continue;
            }
        };

        if let Some(reply) = serve_local_config(&ctx, &io, bdf) {
            if !ctx.send_upstream_cfg_completion(reply).await {
                break;
            }
            continue;
        }

        match ctx.routing.config_target(bdf.bus()) {
            Some(slot) => {
                debug!(vcs = ctx.vcs_id, %bdf, slot, "config request routed");
                if !ctx.forward_downstream(slot, Class::Cfg, Packet::Io(io)).await {
                    break;
                }
            }
            None => {
                debug!(vcs = ctx.vcs_id, %bdf, tag, "config request not routable");
                let ur = CxlIoPacket::completion(0, tag, CplStatus::UnsupportedRequest, 0);
                if !ctx.send_upstream_cfg_completion(ur).await {
                    break;
                }
            }
        }
    }
}

/// Serves configuration requests addressed to the switch's own bridges: the
/// USP at 00:00.0 and, once the internal bus is programmed, the vPPB bridges
/// on that bus (device number = vPPB number).
fn serve_local_config(ctx: &RouterContext, io: &CxlIoPacket, bdf: Bdf) -> Option<CxlIoPacket> {
    let internal_bus = ctx
        .upstream_regs
        .read()
        .expect("registers poisoned")
        .bridge
        .secondary_bus_number();

    if bdf.bus() == 0 {
        if bdf.device() == 0 && bdf.function() == 0 {
            return Some(access_registers(io, |offset| {
                ctx.upstream_regs
                    .read()
                    .expect("registers poisoned")
                    .cfg_read(offset)
            }, |offset, size, value| {
                ctx.upstream_regs
                    .write()
                    .expect("registers poisoned")
                    .cfg_write(offset, size, value);
            }));
        }
        return Some(unsupported_request(io));
    }

    if internal_bus != 0 && bdf.bus() == internal_bus {
        let device = bdf.device() as usize;
        if bdf.function() == 0 && (1..=ctx.vppbs.len()).contains(&device) {
            let registers = ctx.vppbs[device - 1].registers();
            return Some(access_registers(io, |offset| {
                registers.read().expect("registers poisoned").cfg_read(offset)
            }, |offset, size, value| {
                registers
                    .write()
                    .expect("registers poisoned")
                    .cfg_write(offset, size, value);
            }));
        }
        return Some(unsupported_request(io));
    }

    None
}

fn access_registers(
    io: &CxlIoPacket,
    read: impl Fn(u32) -> u32,
    write: impl Fn(u32, usize, u32),
) -> CxlIoPacket {
    match &io.body {
        IoBody::CfgRd(cfg) => {
            let (offset, _) = cfg.read_info();
            let value = read(offset);
            CxlIoPacket::completion_with_data(
                0,
                cfg.tag,
                value.to_le_bytes().to_vec(),
                CplStatus::SuccessfulCompletion,
                0,
            )
        }
        IoBody::CfgWr(cfg, raw) => {
            let (offset, size) = cfg.write_info();
            write(offset, size, cfg_wr_value(cfg, *raw));
            CxlIoPacket::completion(0, cfg.tag, CplStatus::SuccessfulCompletion, 0)
        }
        _ => unsupported_request(io),
    }
}

fn unsupported_request(io: &CxlIoPacket) -> CxlIoPacket {
    let tag = match &io.body {
        IoBody::CfgRd(cfg) => cfg.tag,
        IoBody::CfgWr(cfg, _) => cfg.tag,
        _ => 0,
    };
    CxlIoPacket::completion(0, tag, CplStatus::UnsupportedRequest, 0)
}

pub(crate) async fn config_target_to_host(ctx: Arc<RouterContext>, slot: usize) {
    let conn = ctx.vppbs[slot].connection();
    while let Some(packet) = conn.cfg.target_to_host.recv().await {
        let packet = scrub_completion_req_id(packet);
        if ctx
            .upstream_conn
            .cfg
            .target_to_host
            .send(packet)
            .await
            .is_err()
        {
            break;
        }
    }
}

/// Completions leave the VCS with the requester identity reset.
fn scrub_completion_req_id(packet: Packet) -> Packet {
    match packet {
        Packet::Io(mut io) => {
            match &mut io.body {
                IoBody::Cpl(cpl) | IoBody::CplD(cpl, _) => cpl.set_req_id(0),
                _ => {}
            }
            Packet::Io(io)
        }
        other => other,
    }
}

// ---------------------------------------------------------------------------
// MMIO
// ---------------------------------------------------------------------------

pub(crate) async fn mmio_host_to_target(ctx: Arc<RouterContext>) {
    while let Some(packet) = ctx.upstream_conn.mmio.host_to_target.recv().await {
        let Packet::Io(mut io) = packet else {
            warn!(vcs = ctx.vcs_id, "non-CXL.io frame on the MMIO path");
            continue;
        };
        let (addr, tag, is_read) = match &mut io.body {
            IoBody::MemRd(mreq) => {
                mreq.set_req_id(ctx.vcs_id as u16);
                (mreq.address(), mreq.tag, true)
            }
            IoBody::MemWr(mreq, _) => {
                mreq.set_req_id(ctx.vcs_id as u16);
                (mreq.address(), mreq.tag, false)
            }
            _ => {
                warn!(vcs = ctx.vcs_id, "unexpected CXL.io frame on the MMIO path");
                continue;
            }
        };
        let size = io.data_size();

        match ctx.routing.mmio_target(addr) {
            Some(slot) => {
                if !ctx.forward_downstream(slot, Class::Mmio, Packet::Io(io)).await {
                    break;
                }
            }
            None if is_read => {
                debug!(vcs = ctx.vcs_id, addr, size, "MMIO read out of range");
                let zero = CxlIoPacket::completion_with_data(
                    0,
                    tag,
                    vec![0; size],
                    CplStatus::SuccessfulCompletion,
                    0,
                );
                if ctx
                    .upstream_conn
                    .mmio
                    .target_to_host
                    .send(Packet::Io(zero))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            None => {
                debug!(vcs = ctx.vcs_id, addr, size, "MMIO write out of range, dropped");
            }
        }
    }
}

pub(crate) async fn mmio_target_to_host(ctx: Arc<RouterContext>, slot: usize) {
    let conn = ctx.vppbs[slot].connection();
    while let Some(packet) = conn.mmio.target_to_host.recv().await {
        let packet = scrub_completion_req_id(packet);
        if ctx
            .upstream_conn
            .mmio
            .target_to_host
            .send(packet)
            .await
            .is_err()
        {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// CXL.mem
// ---------------------------------------------------------------------------

pub(crate) async fn mem_host_to_target(ctx: Arc<RouterContext>) {
    while let Some(packet) = ctx.upstream_conn.cxl_mem.host_to_target.recv().await {
        let Packet::Mem(mem) = packet else {
            warn!(vcs = ctx.vcs_id, "non-CXL.mem frame on the CXL.mem path");
            continue;
        };

        let target = match &mem.body {
            MemBody::M2sReq(_) | MemBody::M2sRwd(_) => {
                let addr = mem.m2s_address().expect("m2s request carries an address");
                let target = ctx.routing.mem_target(addr);
                if target.is_none() {
                    warn!(vcs = ctx.vcs_id, addr, "unroutable CXL.mem request, dropped");
                }
                target
            }
            MemBody::M2sBirsp(birsp) => {
                let target = ctx.routing.birsp_target(birsp.bi_id);
                if target.is_none() {
                    warn!(
                        vcs = ctx.vcs_id,
                        bi_id = birsp.bi_id,
                        "BIRsp matches no bound vPPB, dropped"
                    );
                }
                target
            }
            _ => {
                warn!(vcs = ctx.vcs_id, "unexpected S2M frame on the host path");
                None
            }
        };

        if let Some(slot) = target {
            if !ctx.forward_downstream(slot, Class::Mem, Packet::Mem(mem)).await {
                break;
            }
        }
    }
}

pub(crate) async fn mem_target_to_host(ctx: Arc<RouterContext>, slot: usize) {
    let conn = ctx.vppbs[slot].connection();
    while let Some(packet) = conn.cxl_mem.target_to_host.recv().await {
        let Packet::Mem(mut mem) = packet else {
            warn!(vcs = ctx.vcs_id, slot, "non-CXL.mem frame on the device path");
            continue;
        };

        if matches!(mem.body, MemBody::S2mBisnp(_)) {
            let (bi_enable, bi_forward) = ctx.bi_override.unwrap_or_else(|| {
                let registers = ctx.vppbs[slot].registers();
                let registers = registers.read().expect("registers poisoned");
                (registers.bi_decoder.bi_enable, registers.bi_decoder.bi_forward)
            });
            match (bi_enable, bi_forward) {
                (false, false) | (true, true) => {
                    debug!(vcs = ctx.vcs_id, slot, bi_enable, bi_forward, "BISnp dropped");
                    continue;
                }
                (false, true) => {}
                (true, false) => {
                    let bi_capable = ctx
                        .upstream_regs
                        .read()
                        .expect("registers poisoned")
                        .hdm
                        .is_bi_capable();
                    if !bi_capable {
                        debug!(vcs = ctx.vcs_id, slot, "upstream decoder not BI-capable, BISnp dropped");
                        continue;
                    }
                    mem.set_bisnp_bi_id(ctx.vppbs[slot].secondary_bus_number() as u16);
                }
            }
        }

        if ctx
            .upstream_conn
            .cxl_mem
            .target_to_host
            .send(Packet::Mem(mem))
            .await
            .is_err()
        {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// CXL.cache
// ---------------------------------------------------------------------------

pub(crate) async fn cache_host_to_target(ctx: Arc<RouterContext>) {
    while let Some(packet) = ctx.upstream_conn.cxl_cache.host_to_target.recv().await {
        let Packet::Cache(cache) = packet else {
            warn!(vcs = ctx.vcs_id, "non-CXL.cache frame on the CXL.cache path");
            continue;
        };
        let Some(cache_id) = cache.host_to_device_cache_id() else {
            warn!(vcs = ctx.vcs_id, "unexpected D2H frame on the host path");
            continue;
        };

        match ctx.routing.cache_target(cache_id) {
            Some(slot) => {
                if !ctx
                    .forward_downstream(slot, Class::Cache, Packet::Cache(cache))
                    .await
                {
                    break;
                }
            }
            None => {
                warn!(vcs = ctx.vcs_id, cache_id, "unroutable CXL.cache packet, dropped");
            }
        }
    }
}

pub(crate) async fn cache_target_to_host(ctx: Arc<RouterContext>, slot: usize) {
    let conn = ctx.vppbs[slot].connection();
    while let Some(packet) = conn.cxl_cache.target_to_host.recv().await {
        let Packet::Cache(mut cache) = packet else {
            warn!(vcs = ctx.vcs_id, slot, "non-CXL.cache frame on the device path");
            continue;
        };

        if matches!(cache.body, CacheBody::D2hReq(_)) {
            let (assign, forward, local_cache_id) = {
                let registers = ctx.vppbs[slot].registers();
                let registers = registers.read().expect("registers poisoned");
                (
                    registers.cache_id.assign_cache_id,
                    registers.cache_id.forward_cache_id,
                    registers.cache_id.local_cache_id,
                )
            };
            match (assign, forward) {
                (false, false) => {
                    debug!(vcs = ctx.vcs_id, slot, "cache id decoder disabled, D2H request dropped");
                    continue;
                }
                (true, true) => {
                    error!(vcs = ctx.vcs_id, slot, "invalid cache id decoder setting: assign and forward");
                    continue;
                }
                (false, true) => {}
                (true, false) => cache.set_d2h_req_cache_id(local_cache_id),
            }
        }

        if ctx
            .upstream_conn
            .cxl_cache
            .target_to_host
            .send(Packet::Cache(cache))
            .await
            .is_err()
        {
            break;
        }
    }
}
