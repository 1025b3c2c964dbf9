//! Client side of the switch connection: handshake, retry, and a
//! client-oriented packet processor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cxl_proto::sideband::SidebandPacket;
use cxl_proto::{Bdf, Packet};
use cxl_transport::{
    ComponentState, Connection, Lifecycle, PacketProcessor, PacketReader, PacketWriter, PeerRole,
};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::SwitchError;

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(1);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(120);
const CONNECT_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// What the client is emulating; decides which fifo directions face the
/// switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMode {
    /// A host: the switch forwards target→host traffic to us.
    Host,
    /// A device: the switch forwards host→target traffic to us.
    Device,
}

/// Handshake faults injectable by the connection-manager tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedError {
    NonSideband,
    NonConnectionRequest,
}

pub struct SwitchConnectionClient {
    host: String,
    port: u16,
    port_index: u8,
    mode: ClientMode,
    retry: bool,
    connection: Arc<Connection>,
    processor: Mutex<Option<Arc<PacketProcessor>>>,
    injected_error: Mutex<Option<InjectedError>>,
    stop_requested: AtomicBool,
    lifecycle: Lifecycle,
}

impl SwitchConnectionClient {
    pub fn new(host: impl Into<String>, port: u16, port_index: u8, mode: ClientMode) -> Arc<Self> {
        Self::build(host, port, port_index, mode, true)
    }

    /// A client that fails fast instead of retrying the initial connect.
    pub fn new_without_retry(
        host: impl Into<String>,
        port: u16,
        port_index: u8,
        mode: ClientMode,
    ) -> Arc<Self> {
        Self::build(host, port, port_index, mode, false)
    }

    fn build(
        host: impl Into<String>,
        port: u16,
        port_index: u8,
        mode: ClientMode,
        retry: bool,
    ) -> Arc<Self> {
        Arc::new(SwitchConnectionClient {
            host: host.into(),
            port,
            port_index,
            mode,
            retry,
            connection: Connection::new(),
            processor: Mutex::new(None),
            injected_error: Mutex::new(None),
            stop_requested: AtomicBool::new(false),
            lifecycle: Lifecycle::new(),
        })
    }

    pub fn inject_error(&self, error: InjectedError) {
        *self.injected_error.lock().expect("poisoned") = Some(error);
    }

    pub fn connection(&self) -> Arc<Connection> {
        self.connection.clone()
    }

    pub fn port_index(&self) -> u8 {
        self.port_index
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub async fn wait_for_ready(&self) {
        self.lifecycle.wait_for(ComponentState::Running).await;
    }

    /// Connects (retrying for up to two minutes when enabled), performs the
    /// handshake, then pumps packets until stopped or disconnected.
    pub async fn run(&self) -> Result<(), SwitchError> {
        self.lifecycle.begin_start().map_err(SwitchError::from)?;
        let result = self.run_inner().await;
        self.lifecycle.set_stopped();
        result
    }

    async fn run_inner(&self) -> Result<(), SwitchError> {
        let stream = if self.retry {
            let started = tokio::time::Instant::now();
            let mut next_log = started + CONNECT_LOG_INTERVAL;
            loop {
                if self.stop_requested.load(Ordering::Acquire) {
                    return Ok(());
                }
                match self.connect().await {
                    Ok(stream) => break stream,
                    Err(SwitchError::ConnectionRejected) => {
                        return Err(SwitchError::ConnectionRejected)
                    }
                    Err(e) => {
                        let now = tokio::time::Instant::now();
                        if now - started >= CONNECT_TIMEOUT {
                            warn!(error = %e, "gave up connecting to the switch");
                            return Err(SwitchError::ConnectTimeout(CONNECT_TIMEOUT));
                        }
                        if now >= next_log {
                            info!(
                                elapsed_secs = (now - started).as_secs(),
                                "awaiting switch, retrying"
                            );
                            next_log = now + CONNECT_LOG_INTERVAL;
                        }
                        tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
                    }
                }
            }
        } else {
            self.connect().await?
        };

        let local = stream.local_addr()?;
        info!(port_index = self.port_index, %local, "connected to switch");

        let peer_role = match self.mode {
            // A device's traffic from the switch is host-originated.
            ClientMode::Device => PeerRole::Host,
            ClientMode::Host => PeerRole::Target,
        };
        let processor = PacketProcessor::new(
            self.connection.clone(),
            peer_role,
            None,
            format!("ClientPort{}", self.port_index),
        );
        *self.processor.lock().expect("poisoned") = Some(processor.clone());
        if self.stop_requested.load(Ordering::Acquire) {
            return Ok(());
        }
        self.lifecycle.set_running();

        let (read_half, write_half) = stream.into_split();
        processor.run(read_half, write_half).await?;
        Ok(())
    }

    async fn connect(&self) -> Result<TcpStream, SwitchError> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        let (read_half, write_half) = stream.into_split();
        let mut reader = PacketReader::new(read_half);
        let mut writer = PacketWriter::new(write_half);

        let request = match *self.injected_error.lock().expect("poisoned") {
            None => Packet::Sideband(SidebandPacket::ConnectionRequest {
                port_index: self.port_index,
            }),
            Some(InjectedError::NonSideband) => Packet::Io(
                cxl_proto::io::CxlIoPacket::cfg_rd(Bdf::new(0, 0, 0), 0, 4, true, 0, 0, 0)
                    .expect("static cfg read"),
            ),
            Some(InjectedError::NonConnectionRequest) => {
                Packet::Sideband(SidebandPacket::ConnectionReject)
            }
        };
        debug!(port_index = self.port_index, "sending connection request");
        writer.send(&request).await?;

        match reader.next_packet().await? {
            Some(Packet::Sideband(SidebandPacket::ConnectionAccept)) => {}
            Some(Packet::Sideband(SidebandPacket::ConnectionReject)) => {
                warn!(port_index = self.port_index, "connection rejected");
                return Err(SwitchError::ConnectionRejected);
            }
            _ => return Err(SwitchError::UnexpectedHandshakeResponse),
        }
        debug!(port_index = self.port_index, "connection accepted");

        Ok(reader.into_inner().reunite(writer.into_inner()).expect("same stream"))
    }

    /// Stops the processor (if any) and aborts a pending retry loop.
    pub async fn stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        if !self.lifecycle.begin_stop() {
            return;
        }
        let processor = self.processor.lock().expect("poisoned").clone();
        if let Some(processor) = processor {
            processor.stop().await;
        }
        self.lifecycle.wait_for(ComponentState::Stopped).await;
    }
}
