//! Logical-device allocation bookkeeping for the LD command family.

use std::collections::HashMap;
use std::sync::Mutex;

/// Allocation multipliers per LD: range 1 and range 2.
pub type LdAllocation = [u64; 2];

#[derive(Debug, Clone)]
pub struct LdState {
    pub memory_size: u64,
    pub memory_granularity: u8,
    pub allocations: Vec<LdAllocation>,
}

impl LdState {
    pub fn ld_count(&self) -> usize {
        self.allocations.len()
    }
}

/// Per-port LD state the LD command family reads and writes.
#[derive(Debug, Default)]
pub struct LdStore {
    ports: Mutex<HashMap<u8, LdState>>,
}

impl LdStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a port with `ld_count` logical devices over `memory_size`
    /// bytes.
    pub fn seed_port(&self, port_index: u8, memory_size: u64, ld_count: usize) {
        let allocation = if ld_count == 0 {
            0
        } else {
            memory_size / ld_count as u64
        };
        self.ports.lock().expect("ld store poisoned").insert(
            port_index,
            LdState {
                memory_size,
                // Granularity code 0 = 256 MiB.
                memory_granularity: 0,
                allocations: vec![[allocation, 0]; ld_count],
            },
        );
    }

    pub fn get(&self, port_index: u8) -> Option<LdState> {
        self.ports
            .lock()
            .expect("ld store poisoned")
            .get(&port_index)
            .cloned()
    }

    /// Overwrites allocations starting at `start_ld_id`; returns the count
    /// actually applied, or `None` when the port has no LD state.
    pub fn set_allocations(
        &self,
        port_index: u8,
        start_ld_id: usize,
        allocations: &[LdAllocation],
    ) -> Option<usize> {
        let mut ports = self.ports.lock().expect("ld store poisoned");
        let state = ports.get_mut(&port_index)?;
        if start_ld_id >= state.allocations.len() {
            return Some(0);
        }
        let applicable = (state.allocations.len() - start_ld_id).min(allocations.len());
        state.allocations[start_ld_id..start_ld_id + applicable]
            .copy_from_slice(&allocations[..applicable]);
        Some(applicable)
    }
}
