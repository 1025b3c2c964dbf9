//! The Fabric Manager command channel: CCI commands served over
//! MCTP-over-TCP, plus the event notifications pushed to the FM.

pub mod cci;
pub mod commands;
pub mod executor;
pub mod ld;

pub use cci::{CciCommand, CciRequest, CciResponse, ReturnCode};
pub use executor::MctpCciExecutor;
pub use ld::LdStore;
