//! Downstream virtual PCI-to-PCI bridges.

use std::sync::{Arc, RwLock};

use cxl_transport::Connection;

use crate::registers::VppbRegisters;

/// A downstream vPPB. It owns its downstream fifo bundle and its register
/// image; routers borrow both, and a bind splices the bundle to a physical
/// DSP.
#[derive(Debug)]
pub struct Vppb {
    vcs_id: u8,
    /// External vPPB number (1..=N; #0 is the upstream side).
    number: u8,
    connection: Arc<Connection>,
    registers: Arc<RwLock<VppbRegisters>>,
}

impl Vppb {
    pub fn new(vcs_id: u8, number: u8) -> Arc<Self> {
        Arc::new(Vppb {
            vcs_id,
            number,
            connection: Connection::new(),
            registers: Arc::new(RwLock::new(VppbRegisters::new())),
        })
    }

    pub fn vcs_id(&self) -> u8 {
        self.vcs_id
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    pub fn connection(&self) -> Arc<Connection> {
        self.connection.clone()
    }

    pub fn registers(&self) -> Arc<RwLock<VppbRegisters>> {
        self.registers.clone()
    }

    pub fn secondary_bus_number(&self) -> u8 {
        self.registers
            .read()
            .expect("registers poisoned")
            .bridge
            .secondary_bus_number()
    }
}
