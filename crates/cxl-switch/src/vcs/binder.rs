//! The vPPB↔DSP bind slots.
//!
//! Each downstream slot tracks its binding status and, when bound, the
//! splice forwarding traffic between the vPPB's fifo bundle and the physical
//! port's fifo bundle.

use std::sync::{Arc, RwLock};

use cxl_transport::Splice;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::events::BindingStatus;
use crate::port::PortDevice;
use crate::vcs::vppb::Vppb;

struct BindSlot {
    status: BindingStatus,
    physical_port: Option<u8>,
    splice: Option<Arc<Splice>>,
    splice_task: Option<JoinHandle<()>>,
}

/// Bind state for every downstream slot of one VCS. Mutations run on the
/// owning VCS task; routers read the status mirror without suspending.
pub struct PortBinder {
    vcs_id: u8,
    slots: tokio::sync::Mutex<Vec<BindSlot>>,
    statuses: RwLock<Vec<(BindingStatus, Option<u8>)>>,
}

impl PortBinder {
    pub fn new(vcs_id: u8, slot_count: usize) -> Arc<Self> {
        let slots = (0..slot_count)
            .map(|_| BindSlot {
                status: BindingStatus::Init,
                physical_port: None,
                splice: None,
                splice_task: None,
            })
            .collect();
        Arc::new(PortBinder {
            vcs_id,
            slots: tokio::sync::Mutex::new(slots),
            statuses: RwLock::new(vec![(BindingStatus::Init, None); slot_count]),
        })
    }

    /// Splices `vppb` to `dsp` and marks the slot bound. An existing splice
    /// is drained first, so rewiring is safe to repeat.
    pub async fn attach(&self, slot_index: usize, vppb: &Vppb, dsp: &PortDevice) {
        let mut slots = self.slots.lock().await;
        let slot = &mut slots[slot_index];
        Self::teardown(slot).await;

        let splice = Splice::new(
            vppb.connection(),
            dsp.connection(),
            format!(
                "VCS{}:vPPB{}->Port{}",
                self.vcs_id,
                vppb.number(),
                dsp.port_index()
            ),
        );
        let task = {
            let splice = splice.clone();
            tokio::spawn(async move {
                if let Err(e) = splice.run().await {
                    warn!(error = %e, "bind splice failed");
                }
            })
        };
        slot.splice = Some(splice);
        slot.splice_task = Some(task);
        slot.physical_port = Some(dsp.port_index());
        slot.status = BindingStatus::Bound;
        self.mirror(slot_index, slot);
    }

    /// Drains and removes the slot's splice and marks it unbound. In-flight
    /// packets ahead of the teardown sentinels still cross over.
    pub async fn detach(&self, slot_index: usize) {
        let mut slots = self.slots.lock().await;
        let slot = &mut slots[slot_index];
        Self::teardown(slot).await;
        slot.physical_port = None;
        slot.status = BindingStatus::Unbound;
        self.mirror(slot_index, slot);
    }

    pub async fn detach_all(&self) {
        let count = self.slots.lock().await.len();
        for index in 0..count {
            self.detach(index).await;
        }
    }

    async fn teardown(slot: &mut BindSlot) {
        if let Some(splice) = slot.splice.take() {
            splice.stop().await;
        }
        if let Some(task) = slot.splice_task.take() {
            let _ = task.await;
        }
    }

    fn mirror(&self, slot_index: usize, slot: &BindSlot) {
        self.statuses.write().expect("statuses poisoned")[slot_index] =
            (slot.status, slot.physical_port);
    }

    pub fn status(&self, slot_index: usize) -> BindingStatus {
        self.statuses.read().expect("statuses poisoned")[slot_index].0
    }

    pub fn is_bound(&self, slot_index: usize) -> bool {
        self.status(slot_index) == BindingStatus::Bound
    }

    pub fn bound_port(&self, slot_index: usize) -> Option<u8> {
        self.statuses.read().expect("statuses poisoned")[slot_index].1
    }

    pub fn bound_count(&self) -> usize {
        self.statuses
            .read()
            .expect("statuses poisoned")
            .iter()
            .filter(|(status, _)| *status == BindingStatus::Bound)
            .count()
    }
}
