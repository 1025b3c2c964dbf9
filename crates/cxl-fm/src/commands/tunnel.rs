//! Tunnel Management Command: relays an encapsulated CCI message to the
//! component behind a port and wraps its reply.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cxl_proto::cci::{CciMessage, CciMessageHeader, CciPacket};
use cxl_proto::Packet;
use tracing::warn;

use crate::cci::{opcode, CciCommand, CciRequest, CciResponse, ReturnCode};
use crate::commands::CommandContext;

const MESSAGE_HEADER_LEN: usize = 12;
const TUNNEL_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TunnelManagementCommand {
    ctx: Arc<CommandContext>,
}

impl TunnelManagementCommand {
    pub fn new(ctx: Arc<CommandContext>) -> Self {
        TunnelManagementCommand { ctx }
    }
}

#[async_trait]
impl CciCommand for TunnelManagementCommand {
    fn opcode(&self) -> u16 {
        opcode::TUNNEL_MANAGEMENT_COMMAND
    }

    async fn execute(&self, request: &CciRequest) -> CciResponse {
        // Request payload: port_or_ld_id, target_type, command_size (u16),
        // then the encapsulated CCI message.
        if request.payload.len() < 4 {
            return CciResponse::error(ReturnCode::InvalidPayloadLength);
        }
        let port_id = request.payload[0];
        let command_size =
            u16::from_le_bytes([request.payload[2], request.payload[3]]) as usize;
        let inner = &request.payload[4..];
        if inner.len() != command_size || command_size < MESSAGE_HEADER_LEN {
            return CciResponse::error(ReturnCode::InvalidPayloadLength);
        }

        let header = CciMessageHeader::decode(&inner[..MESSAGE_HEADER_LEN]);
        let inner_payload = inner[MESSAGE_HEADER_LEN..].to_vec();
        if header.payload_length() != inner_payload.len() {
            return CciResponse::error(ReturnCode::InvalidPayloadLength);
        }

        let connected = self
            .ctx
            .connection_manager
            .port_states()
            .get(port_id as usize)
            .map(|state| state.connected);
        match connected {
            Some(true) => {}
            _ => return CciResponse::error(ReturnCode::InvalidInput),
        }
        let Ok(connection) = self.ctx.connection_manager.port_connection(port_id) else {
            return CciResponse::error(ReturnCode::InvalidInput);
        };

        let message = CciMessage {
            header,
            payload: inner_payload,
        };
        if connection
            .cci
            .host_to_target
            .send(Packet::Cci(CciPacket::request(port_id, message)))
            .await
            .is_err()
        {
            return CciResponse::error(ReturnCode::InternalError);
        }

        let reply = tokio::time::timeout(
            TUNNEL_RESPONSE_TIMEOUT,
            connection.cci.target_to_host.recv(),
        )
        .await;
        let reply = match reply {
            Ok(Some(Packet::Cci(packet))) => packet,
            Ok(_) => return CciResponse::error(ReturnCode::InternalError),
            Err(_) => {
                warn!(port_id, "tunneled command timed out");
                return CciResponse::error(ReturnCode::RetryRequired);
            }
        };

        // Response payload: response_size (u16), reserved (u16), then the
        // encapsulated response with its exact byte count.
        let mut bytes = Vec::with_capacity(MESSAGE_HEADER_LEN + reply.message.payload.len());
        bytes.extend_from_slice(&reply.message.header.encode());
        bytes.extend_from_slice(&reply.message.payload);

        let mut payload = Vec::with_capacity(4 + bytes.len());
        payload.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
        payload.extend_from_slice(&[0, 0]);
        payload.extend_from_slice(&bytes);
        CciResponse::success(payload)
    }
}
