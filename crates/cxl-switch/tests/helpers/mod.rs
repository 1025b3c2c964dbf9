//! Shared harness: a running switch on an ephemeral port plus raw wire
//! peers.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cxl_proto::sideband::SidebandPacket;
use cxl_proto::Packet;
use cxl_switch::{
    PhysicalPortManager, PortConfig, SwitchConnectionManager, VirtualSwitchConfig,
    VirtualSwitchManager,
};
use cxl_transport::{PacketReader, PacketWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

pub struct TestSwitch {
    pub manager: Arc<SwitchConnectionManager>,
    pub ppm: Arc<PhysicalPortManager>,
    pub vsm: Arc<VirtualSwitchManager>,
    pub addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

pub async fn start_switch(
    port_configs: Vec<PortConfig>,
    vcs_configs: Vec<VirtualSwitchConfig>,
) -> TestSwitch {
    let manager =
        SwitchConnectionManager::new(&port_configs, "127.0.0.1:0".parse().expect("addr"));
    let ppm = PhysicalPortManager::new(&manager, &port_configs);
    let vsm = VirtualSwitchManager::new(&vcs_configs, ppm.clone()).expect("valid vcs configs");

    let mut tasks = Vec::new();
    {
        let manager = manager.clone();
        tasks.push(tokio::spawn(async move {
            manager.run().await.expect("connection manager runs");
        }));
    }
    {
        let vsm = vsm.clone();
        tasks.push(tokio::spawn(async move {
            vsm.run().await.expect("virtual switch manager runs");
        }));
    }
    manager.wait_for_ready().await;
    vsm.wait_for_ready().await;

    let addr = manager.local_addr().expect("listener bound");
    TestSwitch {
        manager,
        ppm,
        vsm,
        addr,
        tasks,
    }
}

impl TestSwitch {
    pub async fn shutdown(self) {
        self.vsm.stop().await;
        self.manager.stop().await;
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// A raw framed connection to the switch.
pub struct WirePeer {
    reader: PacketReader<OwnedReadHalf>,
    writer: PacketWriter<OwnedWriteHalf>,
}

impl WirePeer {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (read_half, write_half) = stream.into_split();
        WirePeer {
            reader: PacketReader::new(read_half),
            writer: PacketWriter::new(write_half),
        }
    }

    /// Connects and completes the handshake for `port_index`.
    pub async fn connect_port(addr: SocketAddr, port_index: u8) -> Self {
        let mut peer = Self::connect(addr).await;
        peer.send(&Packet::Sideband(SidebandPacket::ConnectionRequest {
            port_index,
        }))
        .await;
        assert_eq!(
            peer.recv().await,
            Packet::Sideband(SidebandPacket::ConnectionAccept)
        );
        peer
    }

    pub async fn send(&mut self, packet: &Packet) {
        self.writer.send(packet).await.expect("send");
    }

    pub async fn recv(&mut self) -> Packet {
        tokio::time::timeout(RECV_TIMEOUT, self.reader.next_packet())
            .await
            .expect("timed out waiting for a frame")
            .expect("read")
            .expect("peer closed")
    }

    /// Next frame, or `None` when the switch closes the connection.
    pub async fn recv_eof(&mut self) -> Option<Packet> {
        tokio::time::timeout(RECV_TIMEOUT, self.reader.next_packet())
            .await
            .expect("timed out waiting for close")
            .expect("read")
    }
}
