//! One Virtual CXL Switch: an upstream port, N downstream vPPBs, the four
//! class routers, and the bind/unbind state machine.

pub mod binder;
pub mod routers;
pub mod routing;
pub mod vppb;

use std::sync::{Arc, RwLock};

use cxl_transport::{ComponentState, Connection, Lifecycle};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::VirtualSwitchConfig;
use crate::events::{BindingStatus, SwitchUpdateEvent};
use crate::port::PhysicalPortManager;
use crate::registers::UpstreamRegisters;
use crate::SwitchError;

use binder::PortBinder;
use routers::RouterContext;
use routing::RoutingTable;
use vppb::Vppb;

struct RouterTasks {
    host_to_target: Vec<JoinHandle<()>>,
    per_slot: Vec<Vec<JoinHandle<()>>>,
}

pub struct CxlVirtualSwitch {
    vcs_id: u8,
    upstream_port_index: u8,
    ctx: Arc<RouterContext>,
    binder: Arc<PortBinder>,
    ppm: Arc<PhysicalPortManager>,
    events: broadcast::Sender<SwitchUpdateEvent>,
    initial_bounds: Vec<Option<u8>>,
    tasks: tokio::sync::Mutex<RouterTasks>,
    lifecycle: Lifecycle,
}

impl CxlVirtualSwitch {
    pub fn new(
        vcs_id: u8,
        config: &VirtualSwitchConfig,
        ppm: Arc<PhysicalPortManager>,
        events: broadcast::Sender<SwitchUpdateEvent>,
    ) -> Result<Arc<Self>, SwitchError> {
        Self::build(vcs_id, config, ppm, events, None)
    }

    /// Test seam: forces `(bi_enable, bi_forward)` for every slot so BI
    /// routing can be exercised without programming decoders. Not a
    /// production setting.
    #[doc(hidden)]
    pub fn new_with_bi_override(
        vcs_id: u8,
        config: &VirtualSwitchConfig,
        ppm: Arc<PhysicalPortManager>,
        events: broadcast::Sender<SwitchUpdateEvent>,
        bi_override: (bool, bool),
    ) -> Result<Arc<Self>, SwitchError> {
        Self::build(vcs_id, config, ppm, events, Some(bi_override))
    }

    fn build(
        vcs_id: u8,
        config: &VirtualSwitchConfig,
        ppm: Arc<PhysicalPortManager>,
        events: broadcast::Sender<SwitchUpdateEvent>,
        bi_override: Option<(bool, bool)>,
    ) -> Result<Arc<Self>, SwitchError> {
        let upstream_port = ppm.port(config.upstream_port_index)?;
        let upstream_conn: Arc<Connection> = upstream_port.connection();
        let upstream_regs = Arc::new(RwLock::new(UpstreamRegisters::new()));

        let vppbs: Vec<Arc<Vppb>> = (1..=config.vppb_count)
            .map(|number| Vppb::new(vcs_id, number))
            .collect();
        let binder = PortBinder::new(vcs_id, vppbs.len());
        let routing = RoutingTable::new(vppbs.clone(), binder.clone(), upstream_regs.clone());

        let ctx = Arc::new(RouterContext {
            vcs_id,
            upstream_conn,
            upstream_regs,
            vppbs,
            routing,
            bi_override,
        });

        Ok(Arc::new(CxlVirtualSwitch {
            vcs_id,
            upstream_port_index: config.upstream_port_index,
            ctx,
            binder,
            ppm,
            events,
            initial_bounds: config.initial_bounds.clone(),
            tasks: tokio::sync::Mutex::new(RouterTasks {
                host_to_target: Vec::new(),
                per_slot: Vec::new(),
            }),
            lifecycle: Lifecycle::new(),
        }))
    }

    pub fn vcs_id(&self) -> u8 {
        self.vcs_id
    }

    pub fn upstream_port_index(&self) -> u8 {
        self.upstream_port_index
    }

    pub fn vppb_count(&self) -> u8 {
        self.ctx.vppbs.len() as u8
    }

    pub fn vppb(&self, vppb_number: u8) -> Result<Arc<Vppb>, SwitchError> {
        let slot = self.slot_of(vppb_number)?;
        Ok(self.ctx.vppbs[slot].clone())
    }

    pub fn upstream_registers(&self) -> Arc<RwLock<UpstreamRegisters>> {
        self.ctx.upstream_regs.clone()
    }

    pub fn binding_status(&self, vppb_number: u8) -> Result<BindingStatus, SwitchError> {
        Ok(self.binder.status(self.slot_of(vppb_number)?))
    }

    pub fn bound_port(&self, vppb_number: u8) -> Result<Option<u8>, SwitchError> {
        Ok(self.binder.bound_port(self.slot_of(vppb_number)?))
    }

    pub fn bound_vppb_count(&self) -> usize {
        self.binder.bound_count()
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub async fn wait_for_ready(&self) {
        self.lifecycle.wait_for(ComponentState::Running).await;
    }

    fn slot_of(&self, vppb_number: u8) -> Result<usize, SwitchError> {
        if vppb_number == 0 || vppb_number as usize > self.ctx.vppbs.len() {
            return Err(SwitchError::VppbOutOfRange(vppb_number));
        }
        Ok(vppb_number as usize - 1)
    }

    /// Starts the routers, applies the configured initial binds, and serves
    /// until stopped.
    pub async fn run(&self) -> Result<(), SwitchError> {
        self.lifecycle.begin_start().map_err(SwitchError::from)?;

        {
            let mut tasks = self.tasks.lock().await;
            tasks.host_to_target = vec![
                tokio::spawn(routers::config_host_to_target(self.ctx.clone())),
                tokio::spawn(routers::mmio_host_to_target(self.ctx.clone())),
                tokio::spawn(routers::mem_host_to_target(self.ctx.clone())),
                tokio::spawn(routers::cache_host_to_target(self.ctx.clone())),
            ];
            tasks.per_slot = (0..self.ctx.vppbs.len())
                .map(|slot| self.spawn_slot_tasks(slot))
                .collect();
        }

        for (slot, bound) in self.initial_bounds.clone().into_iter().enumerate() {
            if let Some(port) = bound {
                if let Err(e) = self.bind_vppb(slot as u8 + 1, port).await {
                    self.lifecycle.set_stopped();
                    return Err(e);
                }
            }
        }

        info!(vcs = self.vcs_id, vppbs = self.ctx.vppbs.len(), "virtual switch running");
        self.lifecycle.set_running();
        self.lifecycle.stopping().await;

        // Wind down: stop the host→target routers, then the per-slot
        // forwarders, then the splices.
        self.ctx.upstream_conn.cfg.host_to_target.send_sentinel().await;
        self.ctx.upstream_conn.mmio.host_to_target.send_sentinel().await;
        self.ctx.upstream_conn.cxl_mem.host_to_target.send_sentinel().await;
        self.ctx.upstream_conn.cxl_cache.host_to_target.send_sentinel().await;
        for vppb in &self.ctx.vppbs {
            let conn = vppb.connection();
            conn.cfg.target_to_host.send_sentinel().await;
            conn.mmio.target_to_host.send_sentinel().await;
            conn.cxl_mem.target_to_host.send_sentinel().await;
            conn.cxl_cache.target_to_host.send_sentinel().await;
        }
        {
            let mut tasks = self.tasks.lock().await;
            for handle in tasks.host_to_target.drain(..) {
                let _ = handle.await;
            }
            for slot_tasks in tasks.per_slot.iter_mut() {
                for handle in slot_tasks.drain(..) {
                    let _ = handle.await;
                }
            }
        }
        self.binder.detach_all().await;

        self.lifecycle.set_stopped();
        Ok(())
    }

    pub async fn stop(&self) {
        if !self.lifecycle.begin_stop() {
            return;
        }
        self.lifecycle.wait_for(ComponentState::Stopped).await;
    }

    fn spawn_slot_tasks(&self, slot: usize) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(routers::config_target_to_host(self.ctx.clone(), slot)),
            tokio::spawn(routers::mmio_target_to_host(self.ctx.clone(), slot)),
            tokio::spawn(routers::mem_target_to_host(self.ctx.clone(), slot)),
            tokio::spawn(routers::cache_target_to_host(self.ctx.clone(), slot)),
        ]
    }

    /// Restarts the four target→host forwarders of one slot. The sentinels
    /// queue behind in-flight traffic, so rewiring never reorders or drops
    /// packets, and repeating it is harmless.
    async fn restart_slot_routers(&self, slot: usize) {
        let conn = self.ctx.vppbs[slot].connection();
        conn.cfg.target_to_host.send_sentinel().await;
        conn.mmio.target_to_host.send_sentinel().await;
        conn.cxl_mem.target_to_host.send_sentinel().await;
        conn.cxl_cache.target_to_host.send_sentinel().await;

        let mut tasks = self.tasks.lock().await;
        for handle in tasks.per_slot[slot].drain(..) {
            let _ = handle.await;
        }
        tasks.per_slot[slot] = self.spawn_slot_tasks(slot);
    }

    /// Binds a vPPB to a physical downstream port.
    pub async fn bind_vppb(&self, vppb_number: u8, physical_port: u8) -> Result<(), SwitchError> {
        let slot = self.slot_of(vppb_number)?;
        if self.binder.is_bound(slot) {
            return Err(SwitchError::VppbAlreadyBound(vppb_number));
        }
        let dsp = self.ppm.claim_dsp(physical_port, self.vcs_id, vppb_number)?;

        self.binder.attach(slot, &self.ctx.vppbs[slot], &dsp).await;
        self.restart_slot_routers(slot).await;

        info!(vcs = self.vcs_id, vppb = vppb_number, physical_port, "vPPB bound");
        let _ = self.events.send(SwitchUpdateEvent {
            vcs_id: self.vcs_id,
            vppb_index: vppb_number,
            binding_status: BindingStatus::Bound,
        });
        Ok(())
    }

    /// Unbinds a vPPB, letting in-flight packets complete first.
    pub async fn unbind_vppb(&self, vppb_number: u8) -> Result<(), SwitchError> {
        let slot = self.slot_of(vppb_number)?;
        if !self.binder.is_bound(slot) {
            return Err(SwitchError::VppbNotBound(vppb_number));
        }
        let port = self.binder.bound_port(slot);

        self.binder.detach(slot).await;
        if let Some(port) = port {
            self.ppm.release_dsp(port);
        }
        self.restart_slot_routers(slot).await;

        info!(vcs = self.vcs_id, vppb = vppb_number, "vPPB unbound");
        let _ = self.events.send(SwitchUpdateEvent {
            vcs_id: self.vcs_id,
            vppb_index: vppb_number,
            binding_status: BindingStatus::Unbound,
        });
        Ok(())
    }
}
