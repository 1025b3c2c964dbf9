//! The MCTP-over-TCP executor: serves FM commands, pushes event
//! notifications, and runs background operations.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use cxl_proto::cci::{CciMessage, CciMsgClass, CciPacket};
use cxl_proto::Packet;
use cxl_switch::{PortType, PortUpdateEvent, SwitchUpdateEvent};
use cxl_transport::{ComponentState, Lifecycle, PacketReader, PacketWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cci::{BackgroundStatus, CciCommand, CciRequest, ReturnCode};
use crate::commands::{self, vendor, CommandContext};

/// Extended-status bit reporting that notifications were dropped since the
/// last successful delivery.
const STATUS_NOTIFY_OVERFLOW: u16 = 0x0001;

pub struct MctpCciExecutor {
    bind_addr: SocketAddr,
    ctx: Arc<CommandContext>,
    commands: HashMap<u16, Arc<dyn CciCommand>>,
    background: Arc<Mutex<BackgroundStatus>>,
    port_events: tokio::sync::Mutex<broadcast::Receiver<PortUpdateEvent>>,
    switch_events: tokio::sync::Mutex<broadcast::Receiver<SwitchUpdateEvent>>,
    notify_tag: AtomicU8,
    notify_overflow: AtomicBool,
    lifecycle: Lifecycle,
    local_addr: OnceLock<SocketAddr>,
}

impl MctpCciExecutor {
    pub fn new(bind_addr: SocketAddr, ctx: Arc<CommandContext>) -> Arc<Self> {
        let commands = commands::registry(&ctx)
            .into_iter()
            .map(|command| (command.opcode(), command))
            .collect();
        let port_events = ctx.connection_manager.subscribe_events();
        let switch_events = ctx.switch_manager.subscribe_events();
        let background = ctx.background.clone();
        Arc::new(MctpCciExecutor {
            bind_addr,
            ctx,
            commands,
            background,
            port_events: tokio::sync::Mutex::new(port_events),
            switch_events: tokio::sync::Mutex::new(switch_events),
            notify_tag: AtomicU8::new(0),
            notify_overflow: AtomicBool::new(false),
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

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Serves one FM connection at a time until stopped. Failing to bind the
    /// MCTP endpoint is fatal.
    pub async fn run(&self) -> anyhow::Result<()> {
        self.lifecycle.begin_start()?;
        let listener = match TcpListener::bind(self.bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.lifecycle.set_stopped();
                return Err(e.into());
            }
        };
        let local = listener.local_addr()?;
        let _ = self.local_addr.set(local);
        info!(%local, "CCI executor listening for the fabric manager");
        self.lifecycle.set_running();

        loop {
            tokio::select! {
                _ = self.lifecycle.stopping() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!(%peer, "fabric manager connected");
                        self.serve_connection(stream).await;
                        info!(%peer, "fabric manager disconnected");
                    }
                    Err(e) => warn!(error = %e, "MCTP accept failed"),
                },
            }
        }

        self.lifecycle.set_stopped();
        Ok(())
    }

    pub async fn stop(&self) {
        if !self.lifecycle.begin_stop() {
            return;
        }
        self.lifecycle.wait_for(ComponentState::Stopped).await;
    }

    async fn serve_connection(&self, stream: TcpStream) {
        let (read_half, write_half) = stream.into_split();
        // Responses and notifications funnel through one writer task so a
        // pushed event can never interleave with a half-written response.
        let (out_tx, mut out_rx) = tokio::sync::mpsc::channel::<Packet>(64);
        let mut port_events = self.port_events.lock().await;
        let mut switch_events = self.switch_events.lock().await;

        let write_loop = async move {
            let mut writer = PacketWriter::new(write_half);
            while let Some(packet) = out_rx.recv().await {
                if writer.send(&packet).await.is_err() {
                    break;
                }
            }
        };

        tokio::select! {
            _ = self.lifecycle.stopping() => {}
            _ = self.serve_requests(read_half, out_tx.clone()) => {}
            _ = self.push_events(&mut port_events, &mut switch_events, out_tx) => {}
            _ = write_loop => {}
        }
    }

    async fn serve_requests(
        &self,
        read_half: tokio::net::tcp::OwnedReadHalf,
        out_tx: tokio::sync::mpsc::Sender<Packet>,
    ) {
        let mut reader = PacketReader::new(read_half);
        loop {
            let cci = match reader.next_packet().await {
                Ok(Some(Packet::Cci(cci))) => cci,
                Ok(Some(_)) => {
                    warn!("closing MCTP socket: non-CCI frame");
                    return;
                }
                Ok(None) => return,
                Err(e) => {
                    warn!(error = %e, "closing MCTP socket: bad frame");
                    return;
                }
            };
            match cci.msg_class {
                CciMsgClass::Req => {
                    let response = self.dispatch(&cci).await;
                    if out_tx
                        .send(Packet::Cci(CciPacket::response(cci.port_index, response)))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                CciMsgClass::Rsp => {
                    // Acknowledgement of a pushed notification.
                    debug!(opcode = cci.opcode(), "notification acknowledged");
                }
            }
        }
    }

    async fn push_events(
        &self,
        port_events: &mut broadcast::Receiver<PortUpdateEvent>,
        switch_events: &mut broadcast::Receiver<SwitchUpdateEvent>,
        out_tx: tokio::sync::mpsc::Sender<Packet>,
    ) {
        loop {
            tokio::select! {
                event = recv_event(port_events) => match event {
                    Some(event) => {
                        let dsp = self
                            .ctx
                            .connection_manager
                            .port_states()
                            .get(event.port_id as usize)
                            .is_some_and(|state| state.port_type == PortType::Dsp);
                        if !self
                            .queue_notification(
                                &out_tx,
                                crate::cci::opcode::NOTIFY_PORT_UPDATE,
                                vendor::port_update_payload(&event),
                            )
                            .await
                        {
                            return;
                        }
                        // A device came or went with its DSP.
                        if dsp
                            && !self
                                .queue_notification(
                                    &out_tx,
                                    crate::cci::opcode::NOTIFY_DEVICE_UPDATE,
                                    vendor::device_update_payload(),
                                )
                                .await
                        {
                            return;
                        }
                    }
                    None => self.notify_overflow.store(true, Ordering::Release),
                },

                event = recv_event(switch_events) => match event {
                    Some(event) => {
                        if !self
                            .queue_notification(
                                &out_tx,
                                crate::cci::opcode::NOTIFY_SWITCH_UPDATE,
                                vendor::switch_update_payload(&event),
                            )
                            .await
                        {
                            return;
                        }
                    }
                    None => self.notify_overflow.store(true, Ordering::Release),
                },
            }
        }
    }

    async fn dispatch(&self, packet: &CciPacket) -> CciMessage {
        let opcode = packet.opcode();
        let tag = packet.message.header.message_tag;

        let Some(command) = self.commands.get(&opcode) else {
            debug!(opcode = format_args!("{opcode:#06x}"), "unsupported opcode");
            return CciMessage::response(opcode, tag, ReturnCode::Unsupported.into(), false, vec![]);
        };

        let request = CciRequest {
            opcode,
            message_tag: tag,
            payload: packet.message.payload.clone(),
        };

        if command.is_background() {
            {
                let mut background = self.background.lock().expect("background poisoned");
                if background.in_progress {
                    return CciMessage::response(
                        opcode,
                        tag,
                        ReturnCode::Busy.into(),
                        false,
                        vec![],
                    );
                }
                *background = BackgroundStatus {
                    opcode,
                    percent_complete: 0,
                    in_progress: true,
                    return_code: ReturnCode::Success,
                };
            }
            let command = command.clone();
            let background = self.background.clone();
            tokio::spawn(async move {
                let result = command.execute(&request).await;
                let mut background = background.lock().expect("background poisoned");
                *background = BackgroundStatus {
                    opcode,
                    percent_complete: 100,
                    in_progress: false,
                    return_code: result.return_code,
                };
            });
            return CciMessage::response(
                opcode,
                tag,
                ReturnCode::BackgroundCommandStarted.into(),
                true,
                vec![],
            );
        }

        let result = command.execute(&request).await;
        CciMessage::response(opcode, tag, result.return_code.into(), false, result.payload)
    }

    async fn queue_notification(
        &self,
        out_tx: &tokio::sync::mpsc::Sender<Packet>,
        opcode: u16,
        payload: Vec<u8>,
    ) -> bool {
        let tag = self.notify_tag.fetch_add(1, Ordering::AcqRel);
        let mut message = CciMessage::request(opcode, tag, payload);
        if self.notify_overflow.swap(false, Ordering::AcqRel) {
            message.header.vendor_specific_extended_status = STATUS_NOTIFY_OVERFLOW;
        }
        out_tx
            .send(Packet::Cci(CciPacket::request(0, message)))
            .await
            .is_ok()
    }
}

/// Receives the next event; `None` reports a lagged (overflowed) stream, and
/// a closed stream pends forever so the select loop ignores it.
async fn recv_event<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Option<T> {
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "notification ring overflowed");
                return None;
            }
            Err(broadcast::error::RecvError::Closed) => {
                // The producer side is gone; park this arm.
                std::future::pending::<()>().await;
            }
        }
    }
}
