//! The switch: physical ports, the TCP connection manager and client, and
//! the virtual switches with their class routers.

pub mod client;
pub mod config;
pub mod events;
pub mod manager;
pub mod port;
pub mod registers;
pub mod vcs;
pub mod vsm;

mod error;

pub use client::SwitchConnectionClient;
pub use config::{PortConfig, PortType, SwitchConfig, VirtualSwitchConfig};
pub use error::SwitchError;
pub use events::{BindingStatus, PortUpdateEvent, SwitchUpdateEvent};
pub use manager::SwitchConnectionManager;
pub use port::{PhysicalPortManager, PortDevice};
pub use vcs::CxlVirtualSwitch;
pub use vsm::VirtualSwitchManager;
