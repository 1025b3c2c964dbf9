//! The command registry served by the MCTP executor.

pub mod generic;
pub mod ld;
pub mod physical_switch;
pub mod tunnel;
pub mod vendor;
pub mod virtual_switch;

use std::sync::{Arc, Mutex};

use cxl_switch::{PhysicalPortManager, SwitchConnectionManager, VirtualSwitchManager};

use crate::cci::{BackgroundStatus, CciCommand};
use crate::ld::LdStore;

/// Everything the commands read or drive.
pub struct CommandContext {
    pub connection_manager: Arc<SwitchConnectionManager>,
    pub port_manager: Arc<PhysicalPortManager>,
    pub switch_manager: Arc<VirtualSwitchManager>,
    pub ld_store: Arc<LdStore>,
    pub background: Arc<Mutex<BackgroundStatus>>,
}

/// Builds the full command set.
pub fn registry(ctx: &Arc<CommandContext>) -> Vec<Arc<dyn CciCommand>> {
    vec![
        Arc::new(generic::IdentifyCommand::new()),
        Arc::new(generic::BackgroundOperationStatusCommand::new(
            ctx.background.clone(),
        )),
        Arc::new(physical_switch::IdentifySwitchDeviceCommand::new(ctx.clone())),
        Arc::new(physical_switch::GetPhysicalPortStateCommand::new(ctx.clone())),
        Arc::new(virtual_switch::GetVirtualCxlSwitchInfoCommand::new(ctx.clone())),
        Arc::new(virtual_switch::BindVppbCommand::new(ctx.clone())),
        Arc::new(virtual_switch::UnbindVppbCommand::new(ctx.clone())),
        Arc::new(tunnel::TunnelManagementCommand::new(ctx.clone())),
        Arc::new(ld::GetLdInfoCommand::new(ctx.clone())),
        Arc::new(ld::GetLdAllocationsCommand::new(ctx.clone())),
        Arc::new(ld::SetLdAllocationsCommand::new(ctx.clone())),
        Arc::new(vendor::GetConnectedDevicesCommand::new(ctx.clone())),
    ]
}
