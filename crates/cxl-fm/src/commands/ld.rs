//! Logical-device commands. Each request names the DSP whose multi-logical
//! device it concerns in its first byte.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cci::{opcode, CciCommand, CciRequest, CciResponse, ReturnCode};
use crate::commands::CommandContext;
use crate::ld::LdAllocation;

/// Get LD Info (0x5400).
pub struct GetLdInfoCommand {
    ctx: Arc<CommandContext>,
}

impl GetLdInfoCommand {
    pub fn new(ctx: Arc<CommandContext>) -> Self {
        GetLdInfoCommand { ctx }
    }
}

#[async_trait]
impl CciCommand for GetLdInfoCommand {
    fn opcode(&self) -> u16 {
        opcode::GET_LD_INFO
    }

    async fn execute(&self, request: &CciRequest) -> CciResponse {
        let Some(&port_id) = request.payload.first() else {
            return CciResponse::error(ReturnCode::InvalidPayloadLength);
        };
        let Some(state) = self.ctx.ld_store.get(port_id) else {
            return CciResponse::error(ReturnCode::InvalidInput);
        };

        let mut payload = Vec::with_capacity(11);
        payload.extend_from_slice(&state.memory_size.to_le_bytes());
        payload.extend_from_slice(&(state.ld_count() as u16).to_le_bytes());
        payload.push(0); // QoS telemetry capability
        CciResponse::success(payload)
    }
}

/// Get LD Allocations (0x5401).
pub struct GetLdAllocationsCommand {
    ctx: Arc<CommandContext>,
}

impl GetLdAllocationsCommand {
    pub fn new(ctx: Arc<CommandContext>) -> Self {
        GetLdAllocationsCommand { ctx }
    }
}

#[async_trait]
impl CciCommand for GetLdAllocationsCommand {
    fn opcode(&self) -> u16 {
        opcode::GET_LD_ALLOCATIONS
    }

    async fn execute(&self, request: &CciRequest) -> CciResponse {
        if request.payload.len() < 3 {
            return CciResponse::error(ReturnCode::InvalidPayloadLength);
        }
        let port_id = request.payload[0];
        let start_ld_id = request.payload[1] as usize;
        let limit = request.payload[2] as usize;

        let Some(state) = self.ctx.ld_store.get(port_id) else {
            return CciResponse::error(ReturnCode::InvalidInput);
        };
        if start_ld_id >= state.ld_count() {
            return CciResponse::error(ReturnCode::InvalidInput);
        }
        let returned = (state.ld_count() - start_ld_id).min(limit);

        let mut payload = Vec::with_capacity(4 + returned * 16);
        payload.push(state.ld_count() as u8);
        payload.push(state.memory_granularity);
        payload.push(start_ld_id as u8);
        payload.push(returned as u8);
        for allocation in &state.allocations[start_ld_id..start_ld_id + returned] {
            payload.extend_from_slice(&allocation[0].to_le_bytes());
            payload.extend_from_slice(&allocation[1].to_le_bytes());
        }
        CciResponse::success(payload)
    }
}

/// Set LD Allocations (0x5402).
pub struct SetLdAllocationsCommand {
    ctx: Arc<CommandContext>,
}

impl SetLdAllocationsCommand {
    pub fn new(ctx: Arc<CommandContext>) -> Self {
        SetLdAllocationsCommand { ctx }
    }
}

#[async_trait]
impl CciCommand for SetLdAllocationsCommand {
    fn opcode(&self) -> u16 {
        opcode::SET_LD_ALLOCATIONS
    }

    async fn execute(&self, request: &CciRequest) -> CciResponse {
        if request.payload.len() < 4 {
            return CciResponse::error(ReturnCode::InvalidPayloadLength);
        }
        let port_id = request.payload[0];
        let number_of_lds = request.payload[1] as usize;
        let start_ld_id = request.payload[2] as usize;
        let list = &request.payload[4..];
        if number_of_lds == 0 || list.len() < number_of_lds * 16 {
            return CciResponse::error(ReturnCode::InvalidPayloadLength);
        }

        let allocations: Vec<LdAllocation> = list
            .chunks_exact(16)
            .take(number_of_lds)
            .map(|chunk| {
                [
                    u64::from_le_bytes(chunk[..8].try_into().expect("8 bytes")),
                    u64::from_le_bytes(chunk[8..].try_into().expect("8 bytes")),
                ]
            })
            .collect();

        match self
            .ctx
            .ld_store
            .set_allocations(port_id, start_ld_id, &allocations)
        {
            None => CciResponse::error(ReturnCode::InvalidInput),
            Some(applied) => {
                let mut payload = Vec::with_capacity(4 + applied * 16);
                payload.push(applied as u8);
                payload.push(start_ld_id as u8);
                payload.extend_from_slice(&[0, 0]);
                for allocation in &allocations[..applied] {
                    payload.extend_from_slice(&allocation[0].to_le_bytes());
                    payload.extend_from_slice(&allocation[1].to_le_bytes());
                }
                CciResponse::success(payload)
            }
        }
    }
}
