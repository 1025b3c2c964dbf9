//! The switch connection manager: TCP listener, sideband handshake, and
//! per-port packet processors.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use cxl_proto::sideband::SidebandPacket;
use cxl_proto::Packet;
use cxl_transport::{
    ComponentState, Connection, Lifecycle, PacketProcessor, PacketReader, PacketWriter, PeerRole,
};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::{PortConfig, PortType};
use crate::events::PortUpdateEvent;
use crate::SwitchError;

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
struct PortSlot {
    config: PortConfig,
    connection: Arc<Connection>,
    connected: AtomicBool,
    processor: Mutex<Option<Arc<PacketProcessor>>>,
}

/// A snapshot of one port for management queries.
#[derive(Debug, Clone, Copy)]
pub struct PortState {
    pub port_index: u8,
    pub port_type: PortType,
    pub connected: bool,
}

pub struct SwitchConnectionManager {
    bind_addr: SocketAddr,
    ports: Vec<PortSlot>,
    events: broadcast::Sender<PortUpdateEvent>,
    lifecycle: Lifecycle,
    local_addr: OnceLock<SocketAddr>,
}

impl SwitchConnectionManager {
    pub fn new(port_configs: &[PortConfig], bind_addr: SocketAddr) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let ports = port_configs
            .iter()
            .map(|config| PortSlot {
                config: *config,
                connection: Connection::new(),
                connected: AtomicBool::new(false),
                processor: Mutex::new(None),
            })
            .collect();
        Arc::new(SwitchConnectionManager {
            bind_addr,
            ports,
            events,
            lifecycle: Lifecycle::new(),
            local_addr: OnceLock::new(),
        })
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub async fn wait_for_ready(&self) {
        self.lifecycle.wait_for(ComponentState::Running).await;
    }

    /// The address the listener actually bound; meaningful once running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PortUpdateEvent> {
        self.events.subscribe()
    }

    pub fn port_connection(&self, port_index: u8) -> Result<Arc<Connection>, SwitchError> {
        self.ports
            .get(port_index as usize)
            .map(|slot| slot.connection.clone())
            .ok_or(SwitchError::PortOutOfRange(port_index))
    }

    pub fn port_states(&self) -> Vec<PortState> {
        self.ports
            .iter()
            .enumerate()
            .map(|(index, slot)| PortState {
                port_index: index as u8,
                port_type: slot.config.port_type,
                connected: slot.connected.load(Ordering::Acquire),
            })
            .collect()
    }

    /// Listens and serves handshakes until stopped. Failure to bind the
    /// listening socket is fatal.
    pub async fn run(self: &Arc<Self>) -> Result<(), SwitchError> {
        self.lifecycle.begin_start().map_err(SwitchError::from)?;

        let listener = match TcpListener::bind(self.bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.lifecycle.set_stopped();
                return Err(e.into());
            }
        };
        let local = listener.local_addr()?;
        let _ = self.local_addr.set(local);
        info!(%local, ports = self.ports.len(), "switch connection manager listening");
        self.lifecycle.set_running();

        let mut handshakes = JoinSet::new();
        loop {
            tokio::select! {
                _ = self.lifecycle.stopping() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let manager = self.clone();
                        handshakes.spawn(async move {
                            manager.handle_connection(stream, peer).await;
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
            }
        }

        // Stop the per-port processors so their handshake tasks wind down,
        // then cancel any connection still stuck before its first frame.
        for slot in &self.ports {
            let processor = slot.processor.lock().expect("processor slot poisoned").clone();
            if let Some(processor) = processor {
                processor.stop().await;
            }
        }
        handshakes.abort_all();
        while handshakes.join_next().await.is_some() {}

        self.lifecycle.set_stopped();
        Ok(())
    }

    /// Requests a stop and waits for the accept loop and processors to
    /// finish. Idempotent.
    pub async fn stop(&self) {
        if !self.lifecycle.begin_stop() {
            return;
        }
        self.lifecycle.wait_for(ComponentState::Stopped).await;
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let (read_half, write_half) = stream.into_split();
        let mut reader = PacketReader::new(read_half);
        let mut writer = PacketWriter::new(write_half);

        let first = match reader.next_packet().await {
            Ok(Some(packet)) => packet,
            Ok(None) => return,
            Err(e) => {
                // Protocol violation: terminal for this socket only.
                warn!(%peer, error = %e, "closing socket: bad handshake frame");
                return;
            }
        };

        let port_index = match first {
            Packet::Sideband(SidebandPacket::ConnectionRequest { port_index }) => port_index,
            other => {
                warn!(%peer, packet = ?other.payload_type(), "rejecting: handshake must be a connection request");
                Self::send_reject(&mut writer, peer).await;
                return;
            }
        };

        let Some(slot) = self.ports.get(port_index as usize) else {
            warn!(%peer, port_index, "rejecting: port index out of range");
            Self::send_reject(&mut writer, peer).await;
            return;
        };
        if slot
            .connected
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(%peer, port_index, "rejecting: port already connected");
            Self::send_reject(&mut writer, peer).await;
            return;
        }

        if let Err(e) = writer.send(&Packet::Sideband(SidebandPacket::ConnectionAccept)).await {
            warn!(%peer, port_index, error = %e, "failed to send accept");
            slot.connected.store(false, Ordering::Release);
            return;
        }

        info!(%peer, port_index, "port connected");
        let _ = self.events.send(PortUpdateEvent {
            port_id: port_index,
            connected: true,
        });

        let peer_role = match slot.config.port_type {
            PortType::Usp => PeerRole::Host,
            PortType::Dsp => PeerRole::Target,
        };
        let processor = PacketProcessor::new(
            slot.connection.clone(),
            peer_role,
            Some(port_index),
            format!("SwitchPort{port_index}"),
        );
        *slot.processor.lock().expect("processor slot poisoned") = Some(processor.clone());

        if let Err(e) = processor.run(reader.into_inner(), writer.into_inner()).await {
            warn!(port_index, error = %e, "packet processor failed");
        }

        *slot.processor.lock().expect("processor slot poisoned") = None;
        slot.connected.store(false, Ordering::Release);
        info!(port_index, "port disconnected");
        let _ = self.events.send(PortUpdateEvent {
            port_id: port_index,
            connected: false,
        });
    }

    async fn send_reject(writer: &mut PacketWriter<OwnedWriteHalf>, peer: SocketAddr) {
        if let Err(e) = writer.send(&Packet::Sideband(SidebandPacket::ConnectionReject)).await {
            warn!(%peer, error = %e, "failed to send reject");
        }
    }
}
