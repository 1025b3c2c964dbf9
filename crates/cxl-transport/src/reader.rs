//! Frames a byte stream into whole packets.

use cxl_proto::envelope::MAX_FRAME_LEN;
use cxl_proto::{Packet, ENVELOPE_LEN};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::TransportError;

/// Reads exactly one envelope, then exactly the remaining frame bytes, and
/// hands the whole frame to the codec.
#[derive(Debug)]
pub struct PacketReader<R> {
    stream: R,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    pub fn new(stream: R) -> Self {
        PacketReader { stream }
    }

    /// Hands the underlying stream back, e.g. to a packet processor once the
    /// handshake is done.
    pub fn into_inner(self) -> R {
        self.stream
    }

    /// Next frame, or `None` on a clean end of stream. Closing mid-frame is
    /// a [`TransportError::ShortRead`].
    pub async fn next_packet(&mut self) -> Result<Option<Packet>, TransportError> {
        let mut envelope = [0u8; ENVELOPE_LEN];
        let mut filled = 0;
        while filled < ENVELOPE_LEN {
            let n = self.stream.read(&mut envelope[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(TransportError::ShortRead);
            }
            filled += n;
        }

        let frame_len = u16::from_le_bytes([envelope[1], envelope[2]]) as usize;
        if frame_len < ENVELOPE_LEN {
            return Err(TransportError::Malformed(
                cxl_proto::PacketError::LengthMismatch {
                    expected: frame_len,
                    actual: ENVELOPE_LEN,
                },
            ));
        }
        if frame_len > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge(frame_len));
        }

        let mut frame = vec![0u8; frame_len];
        frame[..ENVELOPE_LEN].copy_from_slice(&envelope);
        if frame_len > ENVELOPE_LEN {
            self.stream
                .read_exact(&mut frame[ENVELOPE_LEN..])
                .await
                .map_err(|e| {
                    if e.kind() == std::io::ErrorKind::UnexpectedEof {
                        TransportError::ShortRead
                    } else {
                        TransportError::Io(e)
                    }
                })?;
        }

        Ok(Some(Packet::decode(&frame)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cxl_proto::sideband::SidebandPacket;

    #[tokio::test]
    async fn reads_back_to_back_frames_across_chunks() {
        let mut wire = Vec::new();
        let expected = vec![
            Packet::Sideband(SidebandPacket::ConnectionRequest { port_index: 2 }),
            Packet::Sideband(SidebandPacket::ConnectionAccept),
            Packet::Io(cxl_proto::io::CxlIoPacket::mem_rd(0x1000, 4, 0, 1, 0)),
        ];
        for packet in &expected {
            wire.extend_from_slice(&packet.encode());
        }

        // Dribble the stream through a small duplex buffer so reads span
        // frame boundaries.
        let (client, server) = tokio::io::duplex(7);
        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let mut client = client;
            for chunk in wire.chunks(5) {
                client.write_all(chunk).await.unwrap();
            }
        });

        let mut reader = PacketReader::new(server);
        for packet in &expected {
            assert_eq!(reader.next_packet().await.unwrap().as_ref(), Some(packet));
        }
        assert!(reader.next_packet().await.unwrap().is_none());
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn eof_mid_frame_is_a_short_read() {
        let encoded = Packet::Sideband(SidebandPacket::ConnectionRequest { port_index: 0 }).encode();
        let mut reader = PacketReader::new(&encoded[..4]);
        assert!(matches!(
            reader.next_packet().await,
            Err(TransportError::ShortRead)
        ));
    }

    #[tokio::test]
    async fn decode_failure_is_malformed() {
        // Envelope says sideband, length 4, but carries an unknown type.
        let mut reader = PacketReader::new(&[0x04u8, 0x04, 0x00, 0x77][..]);
        assert!(matches!(
            reader.next_packet().await,
            Err(TransportError::Malformed(_))
        ));
    }
}
