//! Vendor-specific queries and the notification payloads the switch pushes.

use std::sync::Arc;

use async_trait::async_trait;
use cxl_switch::{BindingStatus, PortType, PortUpdateEvent, SwitchUpdateEvent};

use crate::cci::{opcode, CciCommand, CciRequest, CciResponse};
use crate::commands::CommandContext;

/// Get Connected Devices (0xC003): the DSP ports with a live device.
pub struct GetConnectedDevicesCommand {
    ctx: Arc<CommandContext>,
}

impl GetConnectedDevicesCommand {
    pub fn new(ctx: Arc<CommandContext>) -> Self {
        GetConnectedDevicesCommand { ctx }
    }
}

#[async_trait]
impl CciCommand for GetConnectedDevicesCommand {
    fn opcode(&self) -> u16 {
        opcode::GET_CONNECTED_DEVICES
    }

    async fn execute(&self, _request: &CciRequest) -> CciResponse {
        let connected: Vec<u8> = self
            .ctx
            .connection_manager
            .port_states()
            .iter()
            .filter(|state| state.port_type == PortType::Dsp && state.connected)
            .map(|state| state.port_index)
            .collect();

        let mut payload = Vec::with_capacity(1 + connected.len());
        payload.push(connected.len() as u8);
        payload.extend_from_slice(&connected);
        CciResponse::success(payload)
    }
}

/// Notify Port Update (0xC000) request payload.
pub fn port_update_payload(event: &PortUpdateEvent) -> Vec<u8> {
    vec![event.port_id, event.connected as u8]
}

/// Notify Switch Update (0xC001) request payload.
pub fn switch_update_payload(event: &SwitchUpdateEvent) -> Vec<u8> {
    vec![
        event.vcs_id,
        event.vppb_index,
        match event.binding_status {
            BindingStatus::Init => 0,
            BindingStatus::Bound => 1,
            BindingStatus::Unbound => 2,
        },
    ]
}

/// Notify Device Update (0xC002) request payload.
pub fn device_update_payload() -> Vec<u8> {
    Vec::new()
}
