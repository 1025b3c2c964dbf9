//! Target resolution for the four transaction classes.
//!
//! All lookups read live register state; only slots whose vPPB is currently
//! bound can be a target.

use std::sync::{Arc, RwLock};

use crate::registers::UpstreamRegisters;
use crate::vcs::binder::PortBinder;
use crate::vcs::vppb::Vppb;

pub struct RoutingTable {
    vppbs: Vec<Arc<Vppb>>,
    binder: Arc<PortBinder>,
    upstream: Arc<RwLock<UpstreamRegisters>>,
}

impl RoutingTable {
    pub fn new(
        vppbs: Vec<Arc<Vppb>>,
        binder: Arc<PortBinder>,
        upstream: Arc<RwLock<UpstreamRegisters>>,
    ) -> Self {
        RoutingTable {
            vppbs,
            binder,
            upstream,
        }
    }

    fn bound_slots(&self) -> impl Iterator<Item = (usize, &Arc<Vppb>)> + '_ {
        self.vppbs
            .iter()
            .enumerate()
            .filter(|(slot, _)| self.binder.is_bound(*slot))
    }

    /// Slot whose bus-number window covers `bus`.
    pub fn config_target(&self, bus: u8) -> Option<usize> {
        self.bound_slots()
            .find(|(_, vppb)| {
                vppb.registers()
                    .read()
                    .expect("registers poisoned")
                    .bridge
                    .covers_bus(bus)
            })
            .map(|(slot, _)| slot)
    }

    /// Slot whose bridge memory window covers `addr`.
    pub fn mmio_target(&self, addr: u64) -> Option<usize> {
        self.bound_slots()
            .find(|(_, vppb)| {
                vppb.registers()
                    .read()
                    .expect("registers poisoned")
                    .bridge
                    .mmio_window()
                    .is_some_and(|(base, limit)| addr >= base && addr <= limit)
            })
            .map(|(slot, _)| slot)
    }

    /// Slot whose committed HDM decoder claims `addr`.
    pub fn mem_target(&self, addr: u64) -> Option<usize> {
        self.bound_slots()
            .find(|(_, vppb)| {
                vppb.registers()
                    .read()
                    .expect("registers poisoned")
                    .hdm
                    .claims(addr)
            })
            .map(|(slot, _)| slot)
    }

    /// Slot whose bound vPPB advertises `bi_id` as its secondary bus number.
    pub fn birsp_target(&self, bi_id: u16) -> Option<usize> {
        self.bound_slots()
            .find(|(_, vppb)| vppb.secondary_bus_number() as u16 == bi_id)
            .map(|(slot, _)| slot)
    }

    /// Slot the upstream cache route table names for `cache_id`.
    pub fn cache_target(&self, cache_id: u8) -> Option<usize> {
        let number = self
            .upstream
            .read()
            .expect("registers poisoned")
            .cache_route_table
            .target(cache_id)?;
        let slot = (number as usize).checked_sub(1)?;
        (slot < self.vppbs.len() && self.binder.is_bound(slot)).then_some(slot)
    }

    /// Ranges other vPPBs have committed; used to validate a decoder commit
    /// so no two vPPBs claim the same address.
    pub fn foreign_hdm_ranges(&self, excluding_slot: usize) -> Vec<(u64, u64)> {
        self.vppbs
            .iter()
            .enumerate()
            .filter(|(slot, _)| *slot != excluding_slot)
            .flat_map(|(_, vppb)| {
                vppb.registers()
                    .read()
                    .expect("registers poisoned")
                    .hdm
                    .committed_ranges()
            })
            .collect()
    }
}
