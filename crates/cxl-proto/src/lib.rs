//! Wire codec for the emulated CXL fabric.
//!
//! Every transaction travels as a length-prefixed frame: a 3-byte system
//! header (payload type + total frame length) followed by a family-specific
//! class header, a bit-packed typed header, and an optional data block. The
//! typed headers reproduce the CXL bit layouts exactly; [`bits`] provides the
//! little-endian bit-span accessors they are built from.
//!
//! [`Packet`] is the sum of all decodable frames. `Packet::decode` consumes a
//! complete frame (exactly `payload_length` bytes) and `Packet::encode` is
//! its inverse; `decode(encode(p)) == p` holds for every constructible
//! packet.

pub mod bdf;
pub mod bits;
pub mod cache;
pub mod cci;
pub mod envelope;
pub mod io;
pub mod mem;
pub mod packet;
pub mod sideband;

mod error;

pub use bdf::Bdf;
pub use envelope::{PayloadType, ENVELOPE_LEN};
pub use error::PacketError;
pub use packet::Packet;

/// Size of the data block carried by cache-line transfers.
pub const CACHE_LINE_SIZE: usize = 64;
