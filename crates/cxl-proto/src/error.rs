use thiserror::Error;

/// Decode and construction failures for wire frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("frame length mismatch: envelope says {expected} bytes, buffer has {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("frame too short: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },

    #[error("unknown payload type {0:#04x}")]
    UnknownPayloadType(u8),

    #[error("unknown {family} message class {value:#04x}")]
    UnknownMsgClass { family: &'static str, value: u8 },

    #[error("reserved {family} opcode {value:#x}")]
    ReservedOpcode { family: &'static str, value: u8 },

    #[error("valid bit clear in {0} header")]
    HeaderNotValid(&'static str),

    #[error("address {0:#x} is not cache-line aligned")]
    MisalignedAddress(u64),

    #[error("config address {0:#x} exceeds the 4 KB configuration space")]
    InvalidConfigAddress(u32),

    #[error("config access of {size} bytes at offset {offset:#x} crosses a dword boundary")]
    InvalidConfigAccess { offset: u32, size: usize },

    #[error("data block is {actual} bytes, expected {expected}")]
    BadDataLength { expected: usize, actual: usize },
}
