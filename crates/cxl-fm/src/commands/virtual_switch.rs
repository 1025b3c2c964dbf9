//! FM API commands driving the virtual switches.

use std::sync::Arc;

use async_trait::async_trait;
use cxl_switch::BindingStatus;
use tracing::info;

use crate::cci::{opcode, CciCommand, CciRequest, CciResponse, ReturnCode};
use crate::commands::CommandContext;

/// Get Virtual CXL Switch Info (0x5200): request is a VCS id list; response
/// carries one block per VCS with the per-vPPB binding state.
pub struct GetVirtualCxlSwitchInfoCommand {
    ctx: Arc<CommandContext>,
}

impl GetVirtualCxlSwitchInfoCommand {
    pub fn new(ctx: Arc<CommandContext>) -> Self {
        GetVirtualCxlSwitchInfoCommand { ctx }
    }
}

#[async_trait]
impl CciCommand for GetVirtualCxlSwitchInfoCommand {
    fn opcode(&self) -> u16 {
        opcode::GET_VIRTUAL_CXL_SWITCH_INFO
    }

    async fn execute(&self, request: &CciRequest) -> CciResponse {
        let Some((&count, ids)) = request.payload.split_first() else {
            return CciResponse::error(ReturnCode::InvalidPayloadLength);
        };
        if ids.len() < count as usize {
            return CciResponse::error(ReturnCode::InvalidPayloadLength);
        }

        let mut payload = vec![count, 0, 0, 0];
        for &vcs_id in &ids[..count as usize] {
            let Ok(vcs) = self.ctx.switch_manager.vcs(vcs_id) else {
                return CciResponse::error(ReturnCode::InvalidInput);
            };
            payload.push(vcs_id);
            payload.push(1); // VCS state: enabled
            payload.push(vcs.upstream_port_index());
            payload.push(vcs.vppb_count());
            for vppb_number in 1..=vcs.vppb_count() {
                let status = vcs
                    .binding_status(vppb_number)
                    .expect("vppb number in range");
                let bound_port = vcs.bound_port(vppb_number).expect("vppb number in range");
                payload.push(match status {
                    BindingStatus::Init => 0,
                    BindingStatus::Unbound => 0,
                    BindingStatus::Bound => 0x80,
                });
                payload.push(bound_port.unwrap_or(0xFF));
                payload.push(0); // bound LD id
                payload.push(0); // reserved
            }
        }
        CciResponse::success(payload)
    }
}

/// Bind vPPB (0x5201): background command.
pub struct BindVppbCommand {
    ctx: Arc<CommandContext>,
}

impl BindVppbCommand {
    pub fn new(ctx: Arc<CommandContext>) -> Self {
        BindVppbCommand { ctx }
    }
}

#[async_trait]
impl CciCommand for BindVppbCommand {
    fn opcode(&self) -> u16 {
        opcode::BIND_VPPB
    }

    fn is_background(&self) -> bool {
        true
    }

    async fn execute(&self, request: &CciRequest) -> CciResponse {
        if request.payload.len() < 5 {
            return CciResponse::error(ReturnCode::InvalidPayloadLength);
        }
        let vcs_id = request.payload[0];
        let vppb_number = request.payload[1];
        let physical_port = request.payload[2];
        let ld_id = u16::from_le_bytes([request.payload[3], request.payload[4]]);

        info!(vcs_id, vppb_number, physical_port, ld_id, "FM bind request");
        match self
            .ctx
            .switch_manager
            .bind_vppb(vcs_id, vppb_number, physical_port)
            .await
        {
            Ok(()) => CciResponse::success(Vec::new()),
            Err(e) => CciResponse::error(ReturnCode::from_switch_error(&e)),
        }
    }
}

/// Unbind vPPB (0x5202): background command.
pub struct UnbindVppbCommand {
    ctx: Arc<CommandContext>,
}

impl UnbindVppbCommand {
    pub fn new(ctx: Arc<CommandContext>) -> Self {
        UnbindVppbCommand { ctx }
    }
}

#[async_trait]
impl CciCommand for UnbindVppbCommand {
    fn opcode(&self) -> u16 {
        opcode::UNBIND_VPPB
    }

    fn is_background(&self) -> bool {
        true
    }

    async fn execute(&self, request: &CciRequest) -> CciResponse {
        if request.payload.len() < 2 {
            return CciResponse::error(ReturnCode::InvalidPayloadLength);
        }
        let vcs_id = request.payload[0];
        let vppb_number = request.payload[1];

        info!(vcs_id, vppb_number, "FM unbind request");
        match self.ctx.switch_manager.unbind_vppb(vcs_id, vppb_number).await {
            Ok(()) => CciResponse::success(Vec::new()),
            Err(e) => CciResponse::error(ReturnCode::from_switch_error(&e)),
        }
    }
}
