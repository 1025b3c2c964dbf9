//! Lifecycle of every virtual switch instance.

use std::sync::Arc;

use cxl_transport::{ComponentState, Lifecycle};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::warn;

use crate::config::VirtualSwitchConfig;
use crate::events::SwitchUpdateEvent;
use crate::port::PhysicalPortManager;
use crate::vcs::CxlVirtualSwitch;
use crate::SwitchError;

const EVENT_CHANNEL_CAPACITY: usize = 64;

pub struct VirtualSwitchManager {
    switches: Vec<Arc<CxlVirtualSwitch>>,
    events: broadcast::Sender<SwitchUpdateEvent>,
    lifecycle: Lifecycle,
}

impl VirtualSwitchManager {
    pub fn new(
        configs: &[VirtualSwitchConfig],
        ppm: Arc<PhysicalPortManager>,
    ) -> Result<Arc<Self>, SwitchError> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let switches = configs
            .iter()
            .enumerate()
            .map(|(vcs_id, config)| {
                CxlVirtualSwitch::new(vcs_id as u8, config, ppm.clone(), events.clone())
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Arc::new(VirtualSwitchManager {
            switches,
            events,
            lifecycle: Lifecycle::new(),
        }))
    }

    pub fn vcs_count(&self) -> usize {
        self.switches.len()
    }

    pub fn vcs(&self, vcs_id: u8) -> Result<Arc<CxlVirtualSwitch>, SwitchError> {
        self.switches
            .get(vcs_id as usize)
            .cloned()
            .ok_or(SwitchError::UnknownVcs(vcs_id))
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SwitchUpdateEvent> {
        self.events.subscribe()
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub async fn wait_for_ready(&self) {
        self.lifecycle.wait_for(ComponentState::Running).await;
    }

    pub async fn bind_vppb(
        &self,
        vcs_id: u8,
        vppb_number: u8,
        physical_port: u8,
    ) -> Result<(), SwitchError> {
        self.vcs(vcs_id)?.bind_vppb(vppb_number, physical_port).await
    }

    pub async fn unbind_vppb(&self, vcs_id: u8, vppb_number: u8) -> Result<(), SwitchError> {
        self.vcs(vcs_id)?.unbind_vppb(vppb_number).await
    }

    /// Starts every VCS, waits for their readiness, then runs until stopped.
    pub async fn run(&self) -> Result<(), SwitchError> {
        self.lifecycle.begin_start().map_err(SwitchError::from)?;

        let mut vcs_tasks = JoinSet::new();
        for vcs in &self.switches {
            let vcs = vcs.clone();
            vcs_tasks.spawn(async move {
                if let Err(e) = vcs.run().await {
                    warn!(vcs = vcs.vcs_id(), error = %e, "virtual switch failed");
                }
            });
        }
        for vcs in &self.switches {
            vcs.wait_for_ready().await;
        }
        self.lifecycle.set_running();

        self.lifecycle.stopping().await;
        for vcs in &self.switches {
            vcs.stop().await;
        }
        while vcs_tasks.join_next().await.is_some() {}

        self.lifecycle.set_stopped();
        Ok(())
    }

    pub async fn stop(&self) {
        if !self.lifecycle.begin_stop() {
            return;
        }
        self.lifecycle.wait_for(ComponentState::Stopped).await;
    }
}
