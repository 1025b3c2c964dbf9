//! Generic component commands.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::cci::{opcode, BackgroundStatus, CciCommand, CciRequest, CciResponse};

const VENDOR_ID: u16 = 0x1DC5;
const DEVICE_ID_SWITCH: u16 = 0x0050;
const COMPONENT_TYPE_SWITCH: u8 = 0x00;

/// Identify (0x0001): who this component is.
pub struct IdentifyCommand;

impl IdentifyCommand {
    pub fn new() -> Self {
        IdentifyCommand
    }
}

impl Default for IdentifyCommand {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CciCommand for IdentifyCommand {
    fn opcode(&self) -> u16 {
        opcode::IDENTIFY
    }

    async fn execute(&self, _request: &CciRequest) -> CciResponse {
        let mut payload = Vec::with_capacity(18);
        payload.extend_from_slice(&VENDOR_ID.to_le_bytes());
        payload.extend_from_slice(&DEVICE_ID_SWITCH.to_le_bytes());
        payload.extend_from_slice(&VENDOR_ID.to_le_bytes()); // subsystem vendor
        payload.extend_from_slice(&DEVICE_ID_SWITCH.to_le_bytes()); // subsystem id
        payload.extend_from_slice(&0u64.to_le_bytes()); // serial number
        payload.push(0x20); // max supported message size (2^5 * 16 B)
        payload.push(COMPONENT_TYPE_SWITCH);
        CciResponse::success(payload)
    }
}

/// Background Operation Status (0x0002).
pub struct BackgroundOperationStatusCommand {
    status: Arc<Mutex<BackgroundStatus>>,
}

impl BackgroundOperationStatusCommand {
    pub fn new(status: Arc<Mutex<BackgroundStatus>>) -> Self {
        BackgroundOperationStatusCommand { status }
    }
}

#[async_trait]
impl CciCommand for BackgroundOperationStatusCommand {
    fn opcode(&self) -> u16 {
        opcode::BACKGROUND_OPERATION_STATUS
    }

    async fn execute(&self, _request: &CciRequest) -> CciResponse {
        let status = *self.status.lock().expect("status poisoned");
        let mut payload = Vec::with_capacity(8);
        payload.push((status.percent_complete << 1) | status.in_progress as u8);
        payload.push(0); // reserved
        payload.extend_from_slice(&status.opcode.to_le_bytes());
        payload.extend_from_slice(&u16::from(status.return_code).to_le_bytes());
        payload.extend_from_slice(&0u16.to_le_bytes()); // vendor specific status
        CciResponse::success(payload)
    }
}
