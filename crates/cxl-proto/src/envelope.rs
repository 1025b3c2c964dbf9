//! The 3-byte system header carried by every frame.

use crate::PacketError;

/// Bytes occupied by the system header.
pub const ENVELOPE_LEN: usize = 3;

/// Largest frame a reader will accept. Generous bound: the biggest fixed
/// frame is an RwD (82 bytes); CCI payloads are the only open-ended family
/// and stay far below this.
pub const MAX_FRAME_LEN: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadType {
    CxlIo = 0,
    CxlMem = 1,
    CxlCache = 2,
    CciMctp = 3,
    Sideband = 4,
}

impl TryFrom<u8> for PayloadType {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, PacketError> {
        match value {
            0 => Ok(PayloadType::CxlIo),
            1 => Ok(PayloadType::CxlMem),
            2 => Ok(PayloadType::CxlCache),
            3 => Ok(PayloadType::CciMctp),
            4 => Ok(PayloadType::Sideband),
            other => Err(PacketError::UnknownPayloadType(other)),
        }
    }
}

/// Parsed system header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    pub payload_type: PayloadType,
    /// Total frame length in bytes, envelope included.
    pub payload_length: u16,
}

impl Envelope {
    pub fn new(payload_type: PayloadType, payload_length: usize) -> Self {
        debug_assert!(payload_length >= ENVELOPE_LEN && payload_length <= u16::MAX as usize);
        Self {
            payload_type,
            payload_length: payload_length as u16,
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < ENVELOPE_LEN {
            return Err(PacketError::Truncated {
                needed: ENVELOPE_LEN,
                have: buf.len(),
            });
        }
        let payload_type = PayloadType::try_from(buf[0])?;
        let payload_length = u16::from_le_bytes([buf[1], buf[2]]);
        if (payload_length as usize) < ENVELOPE_LEN {
            return Err(PacketError::LengthMismatch {
                expected: payload_length as usize,
                actual: ENVELOPE_LEN,
            });
        }
        Ok(Self {
            payload_type,
            payload_length,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.push(self.payload_type as u8);
        out.extend_from_slice(&self.payload_length.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sideband_envelope() {
        let env = Envelope::parse(&[0x04, 0x05, 0x00]).unwrap();
        assert_eq!(env.payload_type, PayloadType::Sideband);
        assert_eq!(env.payload_length, 5);
    }

    #[test]
    fn rejects_unknown_type() {
        assert_eq!(
            Envelope::parse(&[0x09, 0x05, 0x00]),
            Err(PacketError::UnknownPayloadType(9))
        );
    }

    #[test]
    fn rejects_undersized_length() {
        assert!(matches!(
            Envelope::parse(&[0x00, 0x02, 0x00]),
            Err(PacketError::LengthMismatch { .. })
        ));
    }
}
