//! CCI frames: the MCTP-encapsulated component command interface.
//!
//! Frame shape: envelope, 2-byte class header (`port_index`, request or
//! response), the 12-byte bit-exact CCI message header, then the variable
//! command payload. The message header's own 20-bit payload length always
//! matches the byte count carried behind it.

use crate::bits;
use crate::envelope::{Envelope, PayloadType, ENVELOPE_LEN};
use crate::PacketError;

const CLASS_LEN: usize = 2;
const MESSAGE_HEADER_LEN: usize = 12;
const BASE_LEN: usize = ENVELOPE_LEN + CLASS_LEN + MESSAGE_HEADER_LEN;

/// Message category field values.
pub const CATEGORY_REQUEST: u8 = 0;
pub const CATEGORY_RESPONSE: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CciMsgClass {
    Req = 1,
    Rsp = 2,
}

impl TryFrom<u8> for CciMsgClass {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, PacketError> {
        match value {
            1 => Ok(CciMsgClass::Req),
            2 => Ok(CciMsgClass::Rsp),
            other => Err(PacketError::UnknownMsgClass {
                family: "cci",
                value: other,
            }),
        }
    }
}

/// The 12-byte CCI message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CciMessageHeader {
    pub message_category: u8,
    pub message_tag: u8,
    pub command_opcode: u16,
    pub background_operation: u8,
    pub return_code: u16,
    pub vendor_specific_extended_status: u16,
    payload_length: u32,
}

impl CciMessageHeader {
    pub fn payload_length(&self) -> usize {
        self.payload_length as usize
    }

    fn set_payload_length(&mut self, length: usize) {
        debug_assert!(length < (1 << 21));
        self.payload_length = length as u32;
    }

    pub fn encode(&self) -> [u8; MESSAGE_HEADER_LEN] {
        let mut buf = [0u8; MESSAGE_HEADER_LEN];
        bits::set(&mut buf, 0, 3, self.message_category as u64);
        bits::set(&mut buf, 8, 15, self.message_tag as u64);
        bits::set(&mut buf, 24, 39, self.command_opcode as u64);
        bits::set(&mut buf, 40, 55, (self.payload_length & 0xFFFF) as u64);
        bits::set(&mut buf, 56, 60, (self.payload_length >> 16) as u64);
        bits::set(&mut buf, 63, 63, self.background_operation as u64);
        bits::set(&mut buf, 64, 79, self.return_code as u64);
        bits::set(&mut buf, 80, 95, self.vendor_specific_extended_status as u64);
        buf
    }

    pub fn decode(buf: &[u8]) -> Self {
        let low = bits::get(buf, 40, 55) as u32;
        let high = bits::get(buf, 56, 60) as u32;
        CciMessageHeader {
            message_category: bits::get(buf, 0, 3) as u8,
            message_tag: bits::get(buf, 8, 15) as u8,
            command_opcode: bits::get(buf, 24, 39) as u16,
            background_operation: bits::get(buf, 63, 63) as u8,
            return_code: bits::get(buf, 64, 79) as u16,
            vendor_specific_extended_status: bits::get(buf, 80, 95) as u16,
            payload_length: (high << 16) | low,
        }
    }
}

/// Header plus payload, independent of the outer frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CciMessage {
    pub header: CciMessageHeader,
    pub payload: Vec<u8>,
}

impl CciMessage {
    pub fn request(opcode: u16, message_tag: u8, payload: Vec<u8>) -> Self {
        let mut header = CciMessageHeader {
            message_category: CATEGORY_REQUEST,
            message_tag,
            command_opcode: opcode,
            ..Default::default()
        };
        header.set_payload_length(payload.len());
        CciMessage { header, payload }
    }

    pub fn response(
        opcode: u16,
        message_tag: u8,
        return_code: u16,
        background_operation: bool,
        payload: Vec<u8>,
    ) -> Self {
        let mut header = CciMessageHeader {
            message_category: CATEGORY_RESPONSE,
            message_tag,
            command_opcode: opcode,
            background_operation: background_operation as u8,
            return_code,
            ..Default::default()
        };
        header.set_payload_length(payload.len());
        CciMessage { header, payload }
    }
}

/// A complete CCI frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CciPacket {
    pub port_index: u8,
    pub msg_class: CciMsgClass,
    pub message: CciMessage,
}

impl CciPacket {
    pub fn request(port_index: u8, message: CciMessage) -> Self {
        CciPacket {
            port_index,
            msg_class: CciMsgClass::Req,
            message,
        }
    }

    pub fn response(port_index: u8, message: CciMessage) -> Self {
        CciPacket {
            port_index,
            msg_class: CciMsgClass::Rsp,
            message,
        }
    }

    pub fn opcode(&self) -> u16 {
        self.message.header.command_opcode
    }

    pub(crate) fn frame_len(&self) -> usize {
        BASE_LEN + self.message.payload.len()
    }

    pub(crate) fn encode_into(&self, out: &mut Vec<u8>) {
        Envelope::new(PayloadType::CciMctp, self.frame_len()).write(out);
        out.push(self.port_index);
        out.push(self.msg_class as u8);
        out.extend_from_slice(&self.message.header.encode());
        out.extend_from_slice(&self.message.payload);
    }

    /// Decodes the bytes following the envelope.
    pub(crate) fn decode_body(body: &[u8]) -> Result<Self, PacketError> {
        let fixed = CLASS_LEN + MESSAGE_HEADER_LEN;
        if body.len() < fixed {
            return Err(PacketError::Truncated {
                needed: fixed,
                have: body.len(),
            });
        }
        let port_index = body[0];
        let msg_class = CciMsgClass::try_from(body[1])?;
        let header = CciMessageHeader::decode(&body[CLASS_LEN..fixed]);
        let payload = body[fixed..].to_vec();
        if header.payload_length() != payload.len() {
            return Err(PacketError::LengthMismatch {
                expected: header.payload_length(),
                actual: payload.len(),
            });
        }
        Ok(CciPacket {
            port_index,
            msg_class,
            message: CciMessage { header, payload },
        })
    }
}
