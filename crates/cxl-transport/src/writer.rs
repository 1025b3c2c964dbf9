//! Serializes packets onto a byte stream.

use cxl_proto::Packet;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::TransportError;

#[derive(Debug)]
pub struct PacketWriter<W> {
    stream: W,
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    pub fn new(stream: W) -> Self {
        PacketWriter { stream }
    }

    pub fn into_inner(self) -> W {
        self.stream
    }

    pub async fn send(&mut self, packet: &Packet) -> Result<(), TransportError> {
        self.stream.write_all(&packet.encode()).await?;
        self.stream.flush().await?;
        Ok(())
    }
}
