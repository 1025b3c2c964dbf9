//! The tagged union of every frame the fabric carries.

use crate::cache::CxlCachePacket;
use crate::cci::CciPacket;
use crate::envelope::{Envelope, PayloadType, ENVELOPE_LEN};
use crate::io::CxlIoPacket;
use crate::mem::CxlMemPacket;
use crate::sideband::SidebandPacket;
use crate::PacketError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Sideband(SidebandPacket),
    Io(CxlIoPacket),
    Cache(CxlCachePacket),
    Mem(CxlMemPacket),
    Cci(CciPacket),
}

impl Packet {
    pub fn payload_type(&self) -> PayloadType {
        match self {
            Packet::Sideband(_) => PayloadType::Sideband,
            Packet::Io(_) => PayloadType::CxlIo,
            Packet::Cache(_) => PayloadType::CxlCache,
            Packet::Mem(_) => PayloadType::CxlMem,
            Packet::Cci(_) => PayloadType::CciMctp,
        }
    }

    /// Total frame length in bytes, envelope included.
    pub fn frame_len(&self) -> usize {
        match self {
            Packet::Sideband(p) => p.frame_len(),
            Packet::Io(p) => p.frame_len(),
            Packet::Cache(p) => p.frame_len(),
            Packet::Mem(p) => p.frame_len(),
            Packet::Cci(p) => p.frame_len(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.frame_len());
        match self {
            Packet::Sideband(p) => p.encode_into(&mut out),
            Packet::Io(p) => p.encode_into(&mut out),
            Packet::Cache(p) => p.encode_into(&mut out),
            Packet::Mem(p) => p.encode_into(&mut out),
            Packet::Cci(p) => p.encode_into(&mut out),
        }
        debug_assert_eq!(out.len(), self.frame_len());
        out
    }

    /// Decodes one complete frame. `buf` must hold exactly the
    /// `payload_length` bytes announced by the envelope.
    pub fn decode(buf: &[u8]) -> Result<Packet, PacketError> {
        let envelope = Envelope::parse(buf)?;
        if envelope.payload_length as usize != buf.len() {
            return Err(PacketError::LengthMismatch {
                expected: envelope.payload_length as usize,
                actual: buf.len(),
            });
        }
        let body = &buf[ENVELOPE_LEN..];
        match envelope.payload_type {
            PayloadType::Sideband => SidebandPacket::decode_body(body).map(Packet::Sideband),
            PayloadType::CxlIo => CxlIoPacket::decode_body(body).map(Packet::Io),
            PayloadType::CxlCache => CxlCachePacket::decode_body(body).map(Packet::Cache),
            PayloadType::CxlMem => CxlMemPacket::decode_body(body).map(Packet::Mem),
            PayloadType::CciMctp => CciPacket::decode_body(body).map(Packet::Cci),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_mismatch_is_rejected() {
        let mut encoded = Packet::Sideband(SidebandPacket::ConnectionAccept).encode();
        encoded.push(0);
        assert_eq!(
            Packet::decode(&encoded),
            Err(PacketError::LengthMismatch {
                expected: 4,
                actual: 5
            })
        );
    }

    #[test]
    fn unknown_payload_type_is_rejected() {
        assert_eq!(
            Packet::decode(&[0x07, 0x03, 0x00]),
            Err(PacketError::UnknownPayloadType(7))
        );
    }
}
