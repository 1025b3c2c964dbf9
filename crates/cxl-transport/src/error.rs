use cxl_proto::PacketError;
use thiserror::Error;

use crate::runnable::ComponentState;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The stream closed in the middle of a frame.
    #[error("short read: stream closed mid-frame")]
    ShortRead,

    #[error("malformed packet: {0}")]
    Malformed(#[from] PacketError),

    #[error("frame of {0} bytes exceeds the frame size limit")]
    FrameTooLarge(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The fifo's consumer is gone; the component is shutting down.
    #[error("fifo closed")]
    FifoClosed,

    #[error("cannot run a component in state {0:?}")]
    NotStartable(ComponentState),
}
