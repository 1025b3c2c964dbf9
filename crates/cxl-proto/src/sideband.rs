//! Sideband frames: the connection handshake between a component and the
//! switch.

use crate::envelope::{Envelope, PayloadType, ENVELOPE_LEN};
use crate::PacketError;

const TYPE_CONNECTION_REQUEST: u8 = 0;
const TYPE_CONNECTION_ACCEPT: u8 = 1;
const TYPE_CONNECTION_REJECT: u8 = 2;
const TYPE_CONNECTION_DISCONNECTED: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidebandPacket {
    /// Sent by a connecting component, declaring the physical port it wants.
    ConnectionRequest { port_index: u8 },
    ConnectionAccept,
    ConnectionReject,
    ConnectionDisconnected,
}

impl SidebandPacket {
    pub fn is_connection_request(&self) -> bool {
        matches!(self, SidebandPacket::ConnectionRequest { .. })
    }

    pub(crate) fn frame_len(&self) -> usize {
        match self {
            SidebandPacket::ConnectionRequest { .. } => ENVELOPE_LEN + 2,
            _ => ENVELOPE_LEN + 1,
        }
    }

    pub(crate) fn encode_into(&self, out: &mut Vec<u8>) {
        Envelope::new(PayloadType::Sideband, self.frame_len()).write(out);
        match self {
            SidebandPacket::ConnectionRequest { port_index } => {
                out.push(TYPE_CONNECTION_REQUEST);
                out.push(*port_index);
            }
            SidebandPacket::ConnectionAccept => out.push(TYPE_CONNECTION_ACCEPT),
            SidebandPacket::ConnectionReject => out.push(TYPE_CONNECTION_REJECT),
            SidebandPacket::ConnectionDisconnected => out.push(TYPE_CONNECTION_DISCONNECTED),
        }
    }

    /// Decodes the bytes following the envelope.
    pub(crate) fn decode_body(body: &[u8]) -> Result<Self, PacketError> {
        if body.is_empty() {
            return Err(PacketError::Truncated { needed: 1, have: 0 });
        }
        match body[0] {
            TYPE_CONNECTION_REQUEST => {
                if body.len() < 2 {
                    return Err(PacketError::Truncated {
                        needed: 2,
                        have: body.len(),
                    });
                }
                Ok(SidebandPacket::ConnectionRequest {
                    port_index: body[1],
                })
            }
            TYPE_CONNECTION_ACCEPT => Ok(SidebandPacket::ConnectionAccept),
            TYPE_CONNECTION_REJECT => Ok(SidebandPacket::ConnectionReject),
            TYPE_CONNECTION_DISCONNECTED => Ok(SidebandPacket::ConnectionDisconnected),
            other => Err(PacketError::UnknownMsgClass {
                family: "sideband",
                value: other,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Packet;

    #[test]
    fn connection_request_wire_bytes() {
        let packet = Packet::Sideband(SidebandPacket::ConnectionRequest { port_index: 0 });
        assert_eq!(packet.encode(), vec![0x04, 0x05, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn connection_accept_wire_bytes() {
        let packet = Packet::Sideband(SidebandPacket::ConnectionAccept);
        assert_eq!(packet.encode(), vec![0x04, 0x04, 0x00, 0x01]);
    }

    #[test]
    fn round_trips() {
        for packet in [
            SidebandPacket::ConnectionRequest { port_index: 7 },
            SidebandPacket::ConnectionAccept,
            SidebandPacket::ConnectionReject,
            SidebandPacket::ConnectionDisconnected,
        ] {
            let encoded = Packet::Sideband(packet).encode();
            assert_eq!(Packet::decode(&encoded).unwrap(), Packet::Sideband(packet));
        }
    }
}
