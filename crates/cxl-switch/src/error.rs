use std::time::Duration;

use cxl_transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SwitchError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("connection rejected by the switch")]
    ConnectionRejected,

    #[error("unexpected handshake response")]
    UnexpectedHandshakeResponse,

    #[error("timed out connecting to the switch after {0:?}")]
    ConnectTimeout(Duration),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("vcs {0} does not exist")]
    UnknownVcs(u8),

    #[error("vPPB {0} is out of range")]
    VppbOutOfRange(u8),

    #[error("physical port {0} is out of range")]
    PortOutOfRange(u8),

    #[error("physical port {0} is not a downstream port")]
    PortNotDownstream(u8),

    #[error("physical port {0} is already bound")]
    PortAlreadyBound(u8),

    #[error("vPPB {0} is already bound")]
    VppbAlreadyBound(u8),

    #[error("vPPB {0} is not bound")]
    VppbNotBound(u8),
}
