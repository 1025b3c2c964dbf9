//! Binds one stream transport to one fifo bundle.
//!
//! The inbound task classifies each frame onto the matching inbound fifo;
//! the outbound task drains the five outbound fifos onto the stream. Which
//! direction of each pair counts as "inbound" depends on who sits on the
//! other end of the transport: a host peer produces host→target traffic, a
//! target peer produces target→host traffic.

use std::sync::Arc;

use cxl_proto::io::CxlIoPacket;
use cxl_proto::Packet;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::fifo::{Connection, Fifo};
use crate::reader::PacketReader;
use crate::runnable::Lifecycle;
use crate::writer::PacketWriter;
use crate::TransportError;

/// Who is on the far side of the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// The peer originates host→target traffic (a host connected to a USP,
    /// or the switch as seen from a device client).
    Host,
    /// The peer originates target→host traffic (a device connected to a DSP,
    /// or the switch as seen from a host client).
    Target,
}

#[derive(Debug)]
pub struct PacketProcessor {
    connection: Arc<Connection>,
    peer_role: PeerRole,
    /// When set (switch side), frames whose class header names a different
    /// port are logged and dropped.
    enforce_port_index: Option<u8>,
    lifecycle: Lifecycle,
    label: String,
}

impl PacketProcessor {
    pub fn new(
        connection: Arc<Connection>,
        peer_role: PeerRole,
        enforce_port_index: Option<u8>,
        label: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(PacketProcessor {
            connection,
            peer_role,
            enforce_port_index,
            lifecycle: Lifecycle::new(),
            label: label.into(),
        })
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Runs both directions until the transport closes or `stop` is called.
    pub async fn run<R, W>(&self, reader: R, writer: W) -> Result<(), TransportError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        self.lifecycle.begin_start()?;
        self.lifecycle.set_running();

        let mut inbound = std::pin::pin!(self.run_inbound(reader));
        let mut outbound = std::pin::pin!(self.run_outbound(writer));
        let result = tokio::select! {
            r = &mut inbound => {
                if self.lifecycle.is_stopping() {
                    // Let the outbound side drain up to its sentinels before
                    // tearing down; nothing queued is lost on a clean stop.
                    outbound.await.and(r)
                } else {
                    r
                }
            }
            r = &mut outbound => r,
        };

        self.lifecycle.set_stopped();
        debug!(label = %self.label, "packet processor exited");
        result
    }

    /// Queues sentinels on every outbound fifo and waits for `run` to exit.
    pub async fn stop(&self) {
        if !self.lifecycle.begin_stop() {
            return;
        }
        for pair in self.connection.pairs() {
            self.outbound_of(pair).send_sentinel().await;
        }
        self.lifecycle
            .wait_for(crate::runnable::ComponentState::Stopped)
            .await;
    }

    fn inbound_of<'a>(&self, pair: &'a crate::fifo::FifoPair) -> &'a Fifo {
        match self.peer_role {
            PeerRole::Host => &pair.host_to_target,
            PeerRole::Target => &pair.target_to_host,
        }
    }

    fn outbound_of<'a>(&self, pair: &'a crate::fifo::FifoPair) -> &'a Fifo {
        match self.peer_role {
            PeerRole::Host => &pair.target_to_host,
            PeerRole::Target => &pair.host_to_target,
        }
    }

    async fn run_inbound<R>(&self, reader: R) -> Result<(), TransportError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut reader = PacketReader::new(reader);
        loop {
            let packet = tokio::select! {
                _ = self.lifecycle.stopping() => return Ok(()),
                frame = reader.next_packet() => match frame? {
                    Some(packet) => packet,
                    None => {
                        debug!(label = %self.label, "transport closed");
                        return Ok(());
                    }
                },
            };
            self.dispatch_inbound(packet).await?;
        }
    }

    async fn dispatch_inbound(&self, packet: Packet) -> Result<(), TransportError> {
        let conn = &self.connection;
        match &packet {
            Packet::Io(io) => {
                let pair = if io_is_cfg_class(io) { &conn.cfg } else { &conn.mmio };
                self.inbound_of(pair).send(packet).await
            }
            Packet::Mem(mem) => {
                if self.port_index_mismatch(mem.port_index) {
                    return Ok(());
                }
                self.inbound_of(&conn.cxl_mem).send(packet).await
            }
            Packet::Cache(cache) => {
                if self.port_index_mismatch(cache.port_index) {
                    return Ok(());
                }
                self.inbound_of(&conn.cxl_cache).send(packet).await
            }
            Packet::Cci(cci) => {
                if self.port_index_mismatch(cci.port_index) {
                    return Ok(());
                }
                self.inbound_of(&conn.cci).send(packet).await
            }
            Packet::Sideband(sideband) => {
                // The handshake completed before this processor started.
                warn!(label = %self.label, ?sideband, "ignoring sideband frame after handshake");
                Ok(())
            }
        }
    }

    fn port_index_mismatch(&self, packet_port: u8) -> bool {
        match self.enforce_port_index {
            Some(expected) if packet_port != expected => {
                warn!(
                    label = %self.label,
                    packet_port,
                    expected,
                    "dropping frame addressed to the wrong port"
                );
                true
            }
            _ => false,
        }
    }

    async fn run_outbound<W>(&self, writer: W) -> Result<(), TransportError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut writer = PacketWriter::new(writer);
        let conn = &self.connection;
        // Each queue drains in order; a queue retires once it yields its
        // sentinel, and the task ends when every queue has retired.
        let mut open = [true; 5];
        while open.iter().any(|&o| o) {
            let (slot, packet) = tokio::select! {
                p = self.outbound_of(&conn.cfg).recv(), if open[0] => (0, p),
                p = self.outbound_of(&conn.mmio).recv(), if open[1] => (1, p),
                p = self.outbound_of(&conn.cxl_mem).recv(), if open[2] => (2, p),
                p = self.outbound_of(&conn.cxl_cache).recv(), if open[3] => (3, p),
                p = self.outbound_of(&conn.cci).recv(), if open[4] => (4, p),
            };
            match packet {
                Some(packet) => writer.send(&packet).await?,
                None => open[slot] = false,
            }
        }
        Ok(())
    }
}

/// CXL.io demux rule: configuration requests and every completion ride the
/// cfg fifo; only MRd/MWr ride the mmio fifo.
fn io_is_cfg_class(io: &CxlIoPacket) -> bool {
    io.is_cfg() || io.is_completion()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cxl_proto::mem::CxlMemPacket;
    use cxl_proto::sideband::SidebandPacket;

    #[tokio::test]
    async fn demuxes_and_drains() {
        let conn = Connection::new();
        let processor = PacketProcessor::new(conn.clone(), PeerRole::Host, Some(0), "test");

        let (near, far) = tokio::io::duplex(1024);
        let (far_read, far_write) = tokio::io::split(far);
        let task = {
            let processor = processor.clone();
            tokio::spawn(async move { processor.run(far_read, far_write).await })
        };

        // Host sends a CfgRd and a CXL.mem read over the transport.
        let (mut near_read, mut near_write) = tokio::io::split(near);
        let mut wire_writer = PacketWriter::new(&mut near_write);
        let cfg = Packet::Io(
            cxl_proto::io::CxlIoPacket::cfg_rd(cxl_proto::Bdf::new(1, 0, 0), 0, 4, true, 0, 1, 0)
                .unwrap(),
        );
        let mem = Packet::Mem(CxlMemPacket::mem_rd(0x4000, 0).unwrap());
        wire_writer.send(&cfg).await.unwrap();
        wire_writer.send(&mem).await.unwrap();

        assert_eq!(conn.cfg.host_to_target.recv().await, Some(cfg));
        assert_eq!(conn.cxl_mem.host_to_target.recv().await, Some(mem));

        // Responses queued on target_to_host come back over the wire.
        let rsp = Packet::Io(cxl_proto::io::CxlIoPacket::completion(
            0,
            1,
            cxl_proto::io::CplStatus::SuccessfulCompletion,
            0,
        ));
        conn.cfg.target_to_host.send(rsp.clone()).await.unwrap();
        let mut wire_reader = PacketReader::new(&mut near_read);
        assert_eq!(wire_reader.next_packet().await.unwrap(), Some(rsp));

        processor.stop().await;
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn drops_wrong_port_frames_on_the_switch_side() {
        let conn = Connection::new();
        let processor = PacketProcessor::new(conn.clone(), PeerRole::Host, Some(3), "test");

        let (near, far) = tokio::io::duplex(1024);
        let (far_read, far_write) = tokio::io::split(far);
        let task = {
            let processor = processor.clone();
            tokio::spawn(async move { processor.run(far_read, far_write).await })
        };

        let (_near_read, mut near_write) = tokio::io::split(near);
        let mut wire_writer = PacketWriter::new(&mut near_write);
        let mut wrong = CxlMemPacket::mem_rd(0x4000, 0).unwrap();
        wrong.port_index = 1;
        let mut right = CxlMemPacket::mem_rd(0x8000, 0).unwrap();
        right.port_index = 3;
        wire_writer.send(&Packet::Mem(wrong)).await.unwrap();
        wire_writer.send(&Packet::Mem(right.clone())).await.unwrap();

        // Only the correctly addressed frame surfaces.
        assert_eq!(conn.cxl_mem.host_to_target.recv().await, Some(Packet::Mem(right)));

        processor.stop().await;
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn transport_eof_ends_the_processor() {
        let conn = Connection::new();
        let processor = PacketProcessor::new(conn, PeerRole::Target, None, "test");

        let (near, far) = tokio::io::duplex(64);
        let (far_read, far_write) = tokio::io::split(far);
        let task = {
            let processor = processor.clone();
            tokio::spawn(async move { processor.run(far_read, far_write).await })
        };
        drop(near);
        task.await.unwrap().unwrap();
        assert_eq!(
            processor.lifecycle().state(),
            crate::runnable::ComponentState::Stopped
        );
    }

    #[tokio::test]
    async fn post_handshake_sideband_is_ignored() {
        let conn = Connection::new();
        let processor = PacketProcessor::new(conn.clone(), PeerRole::Host, Some(0), "test");

        let (near, far) = tokio::io::duplex(1024);
        let (far_read, far_write) = tokio::io::split(far);
        let task = {
            let processor = processor.clone();
            tokio::spawn(async move { processor.run(far_read, far_write).await })
        };

        let (_near_read, mut near_write) = tokio::io::split(near);
        let mut wire_writer = PacketWriter::new(&mut near_write);
        wire_writer
            .send(&Packet::Sideband(SidebandPacket::ConnectionAccept))
            .await
            .unwrap();
        let follow_up = Packet::Mem(CxlMemPacket::mem_rd(0x4000, 0).unwrap());
        wire_writer.send(&follow_up).await.unwrap();

        assert_eq!(conn.cxl_mem.host_to_target.recv().await, Some(follow_up));
        processor.stop().await;
        task.await.unwrap().unwrap();
    }
}
