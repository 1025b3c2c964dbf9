//! Stream transport for the emulated fabric: frame-exact packet reader and
//! writer, the per-port fifo bundle, the packet processor that binds a
//! transport to a fifo bundle, and the lifecycle contract shared by every
//! long-lived component.

pub mod fifo;
pub mod processor;
pub mod reader;
pub mod runnable;
pub mod splice;
pub mod writer;

mod error;

pub use error::TransportError;
pub use fifo::{Connection, Fifo, FifoPair, FIFO_CAPACITY};
pub use processor::{PacketProcessor, PeerRole};
pub use reader::PacketReader;
pub use runnable::{ComponentState, Lifecycle};
pub use splice::Splice;
pub use writer::PacketWriter;
