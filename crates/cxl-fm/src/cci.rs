//! CCI command model: opcodes, return codes, and the command trait.

use async_trait::async_trait;

use cxl_switch::SwitchError;

/// Command opcodes served (or emitted) by the switch.
pub mod opcode {
    // Generic component commands.
    pub const IDENTIFY: u16 = 0x0001;
    pub const BACKGROUND_OPERATION_STATUS: u16 = 0x0002;

    // FM API commands.
    pub const IDENTIFY_SWITCH_DEVICE: u16 = 0x5100;
    pub const GET_PHYSICAL_PORT_STATE: u16 = 0x5101;
    pub const GET_VIRTUAL_CXL_SWITCH_INFO: u16 = 0x5200;
    pub const BIND_VPPB: u16 = 0x5201;
    pub const UNBIND_VPPB: u16 = 0x5202;
    pub const TUNNEL_MANAGEMENT_COMMAND: u16 = 0x5300;
    pub const GET_LD_INFO: u16 = 0x5400;
    pub const GET_LD_ALLOCATIONS: u16 = 0x5401;
    pub const SET_LD_ALLOCATIONS: u16 = 0x5402;

    // Vendor-specific notifications and queries.
    pub const NOTIFY_PORT_UPDATE: u16 = 0xC000;
    pub const NOTIFY_SWITCH_UPDATE: u16 = 0xC001;
    pub const NOTIFY_DEVICE_UPDATE: u16 = 0xC002;
    pub const GET_CONNECTED_DEVICES: u16 = 0xC003;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ReturnCode {
    Success = 0x0000,
    BackgroundCommandStarted = 0x0001,
    InvalidInput = 0x0002,
    Unsupported = 0x0003,
    InternalError = 0x0004,
    RetryRequired = 0x0005,
    Busy = 0x0006,
    Aborted = 0x0012,
    InvalidPayloadLength = 0x0016,
}

impl From<ReturnCode> for u16 {
    fn from(code: ReturnCode) -> u16 {
        code as u16
    }
}

impl ReturnCode {
    /// CCI code an FM sees for a failed switch operation.
    pub fn from_switch_error(error: &SwitchError) -> ReturnCode {
        match error {
            SwitchError::UnknownVcs(_)
            | SwitchError::VppbOutOfRange(_)
            | SwitchError::PortOutOfRange(_)
            | SwitchError::PortNotDownstream(_)
            | SwitchError::PortAlreadyBound(_)
            | SwitchError::VppbAlreadyBound(_)
            | SwitchError::VppbNotBound(_) => ReturnCode::InvalidInput,
            _ => ReturnCode::InternalError,
        }
    }
}

/// One inbound command invocation.
#[derive(Debug, Clone)]
pub struct CciRequest {
    pub opcode: u16,
    pub message_tag: u8,
    pub payload: Vec<u8>,
}

/// The outcome handed back to the FM.
#[derive(Debug, Clone)]
pub struct CciResponse {
    pub return_code: ReturnCode,
    pub payload: Vec<u8>,
}

impl CciResponse {
    pub fn success(payload: Vec<u8>) -> Self {
        CciResponse {
            return_code: ReturnCode::Success,
            payload,
        }
    }

    pub fn error(return_code: ReturnCode) -> Self {
        CciResponse {
            return_code,
            payload: Vec::new(),
        }
    }
}

/// A command in the executor's registry.
#[async_trait]
pub trait CciCommand: Send + Sync {
    fn opcode(&self) -> u16;

    /// Background commands acknowledge with BACKGROUND_COMMAND_STARTED and
    /// report completion through BACKGROUND_OPERATION_STATUS.
    fn is_background(&self) -> bool {
        false
    }

    async fn execute(&self, request: &CciRequest) -> CciResponse;
}

/// Progress of the single in-flight background operation.
#[derive(Debug, Clone, Copy)]
pub struct BackgroundStatus {
    pub opcode: u16,
    pub percent_complete: u8,
    pub in_progress: bool,
    pub return_code: ReturnCode,
}

impl Default for BackgroundStatus {
    fn default() -> Self {
        BackgroundStatus {
            opcode: 0,
            percent_complete: 0,
            in_progress: false,
            return_code: ReturnCode::Success,
        }
    }
}
