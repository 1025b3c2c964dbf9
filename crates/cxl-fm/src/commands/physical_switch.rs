//! FM API commands describing the physical switch.

use std::sync::Arc;

use async_trait::async_trait;
use cxl_switch::PortType;

use crate::cci::{opcode, CciCommand, CciRequest, CciResponse, ReturnCode};
use crate::commands::CommandContext;

const HDM_DECODERS_PER_USP: u8 = 4;

/// Identify Switch Device (0x5100).
pub struct IdentifySwitchDeviceCommand {
    ctx: Arc<CommandContext>,
}

impl IdentifySwitchDeviceCommand {
    pub fn new(ctx: Arc<CommandContext>) -> Self {
        IdentifySwitchDeviceCommand { ctx }
    }
}

#[async_trait]
impl CciCommand for IdentifySwitchDeviceCommand {
    fn opcode(&self) -> u16 {
        opcode::IDENTIFY_SWITCH_DEVICE
    }

    async fn execute(&self, _request: &CciRequest) -> CciResponse {
        let ports = self.ctx.connection_manager.port_states();
        let vcs_count = self.ctx.switch_manager.vcs_count();

        let mut active_port_mask = [0u8; 32];
        for port in &ports {
            active_port_mask[(port.port_index / 8) as usize] |= 1 << (port.port_index % 8);
        }
        let mut active_vcs_mask = [0u8; 32];
        for vcs_id in 0..vcs_count {
            active_vcs_mask[vcs_id / 8] |= 1 << (vcs_id % 8);
        }

        let mut total_vppbs = 0u16;
        let mut bound_vppbs = 0u16;
        for vcs_id in 0..vcs_count {
            if let Ok(vcs) = self.ctx.switch_manager.vcs(vcs_id as u8) {
                total_vppbs += vcs.vppb_count() as u16;
                bound_vppbs += vcs.bound_vppb_count() as u16;
            }
        }

        let mut payload = Vec::with_capacity(0x49);
        payload.push(0); // ingress port id
        payload.push(0); // reserved
        payload.push(ports.len() as u8);
        payload.push(vcs_count as u8);
        payload.extend_from_slice(&active_port_mask);
        payload.extend_from_slice(&active_vcs_mask);
        payload.extend_from_slice(&total_vppbs.to_le_bytes());
        payload.extend_from_slice(&bound_vppbs.to_le_bytes());
        payload.push(HDM_DECODERS_PER_USP);
        CciResponse::success(payload)
    }
}

/// Get Physical Port State (0x5101): request is a port id list, response one
/// 16-byte block per requested port.
pub struct GetPhysicalPortStateCommand {
    ctx: Arc<CommandContext>,
}

impl GetPhysicalPortStateCommand {
    pub fn new(ctx: Arc<CommandContext>) -> Self {
        GetPhysicalPortStateCommand { ctx }
    }
}

#[async_trait]
impl CciCommand for GetPhysicalPortStateCommand {
    fn opcode(&self) -> u16 {
        opcode::GET_PHYSICAL_PORT_STATE
    }

    async fn execute(&self, request: &CciRequest) -> CciResponse {
        let Some((&count, ids)) = request.payload.split_first() else {
            return CciResponse::error(ReturnCode::InvalidPayloadLength);
        };
        if ids.len() < count as usize {
            return CciResponse::error(ReturnCode::InvalidPayloadLength);
        }
        let states = self.ctx.connection_manager.port_states();

        let mut payload = Vec::with_capacity(4 + 16 * count as usize);
        payload.push(count);
        payload.extend_from_slice(&[0u8; 3]);
        for &port_id in &ids[..count as usize] {
            let Some(state) = states.get(port_id as usize) else {
                return CciResponse::error(ReturnCode::InvalidInput);
            };
            let mut block = [0u8; 16];
            block[0] = port_id;
            // Port configuration state: 0 = disabled, 1 = bind in progress,
            // 2 = bound (we report USPs as bound to their host), 3 = DSP.
            block[1] = match state.port_type {
                PortType::Usp => 2,
                PortType::Dsp => 3,
            };
            block[2] = state.connected as u8;
            block[3] = match state.port_type {
                PortType::Usp => 0,
                PortType::Dsp => 1,
            };
            block[4] = self
                .ctx
                .ld_store
                .get(port_id)
                .map(|ld| ld.ld_count() as u8)
                .unwrap_or(0);
            payload.extend_from_slice(&block);
        }
        CciResponse::success(payload)
    }
}
