//! Physical port devices and their manager.
//!
//! A port device pairs the per-port fifo bundle with the port's identity.
//! The configuration images and decoders sit on the virtual-switch side
//! (upstream registers and vPPBs); physically, a port is transport plus
//! type. Downstream ports are additionally claimable by a virtual switch;
//! a DSP belongs to at most one vPPB at a time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use cxl_transport::Connection;

use crate::config::{PortConfig, PortType};
use crate::manager::SwitchConnectionManager;
use crate::SwitchError;

#[derive(Debug)]
pub struct PortDevice {
    port_index: u8,
    port_type: PortType,
    connection: Arc<Connection>,
}

impl PortDevice {
    fn new(port_index: u8, port_type: PortType, connection: Arc<Connection>) -> Arc<Self> {
        Arc::new(PortDevice {
            port_index,
            port_type,
            connection,
        })
    }

    pub fn port_index(&self) -> u8 {
        self.port_index
    }

    pub fn port_type(&self) -> PortType {
        self.port_type
    }

    pub fn connection(&self) -> Arc<Connection> {
        self.connection.clone()
    }
}

/// Owns one [`PortDevice`] per configured port and tracks DSP claims.
#[derive(Debug)]
pub struct PhysicalPortManager {
    ports: Vec<Arc<PortDevice>>,
    claims: Mutex<HashMap<u8, (u8, u8)>>,
}

impl PhysicalPortManager {
    pub fn new(manager: &SwitchConnectionManager, configs: &[PortConfig]) -> Arc<Self> {
        let ports = configs
            .iter()
            .enumerate()
            .map(|(index, config)| {
                PortDevice::new(
                    index as u8,
                    config.port_type,
                    manager.port_connection(index as u8).expect("port exists"),
                )
            })
            .collect();
        Arc::new(PhysicalPortManager {
            ports,
            claims: Mutex::new(HashMap::new()),
        })
    }

    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    pub fn port(&self, port_index: u8) -> Result<Arc<PortDevice>, SwitchError> {
        self.ports
            .get(port_index as usize)
            .cloned()
            .ok_or(SwitchError::PortOutOfRange(port_index))
    }

    /// Claims a DSP for a vPPB. Fails when the port is not a DSP or already
    /// belongs to another vPPB.
    pub fn claim_dsp(&self, port_index: u8, vcs_id: u8, vppb_index: u8) -> Result<Arc<PortDevice>, SwitchError> {
        let port = self.port(port_index)?;
        if port.port_type() != PortType::Dsp {
            return Err(SwitchError::PortNotDownstream(port_index));
        }
        let mut claims = self.claims.lock().expect("claims poisoned");
        if claims.contains_key(&port_index) {
            return Err(SwitchError::PortAlreadyBound(port_index));
        }
        claims.insert(port_index, (vcs_id, vppb_index));
        Ok(port)
    }

    pub fn release_dsp(&self, port_index: u8) {
        self.claims.lock().expect("claims poisoned").remove(&port_index);
    }

    pub fn dsp_claim(&self, port_index: u8) -> Option<(u8, u8)> {
        self.claims
            .lock()
            .expect("claims poisoned")
            .get(&port_index)
            .copied()
    }
}
