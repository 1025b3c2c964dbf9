//! End-to-end FM command tests over the MCTP endpoint.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cxl_fm::cci::opcode;
use cxl_fm::commands::CommandContext;
use cxl_fm::{LdStore, MctpCciExecutor, ReturnCode};
use cxl_proto::cci::{CciMessage, CciMessageHeader, CciMsgClass, CciPacket};
use cxl_proto::sideband::SidebandPacket;
use cxl_proto::Packet;
use cxl_switch::{
    PhysicalPortManager, PortConfig, SwitchConnectionManager, VirtualSwitchConfig,
    VirtualSwitchManager,
};
use cxl_transport::{Connection, PacketReader, PacketWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

struct Harness {
    manager: Arc<SwitchConnectionManager>,
    vsm: Arc<VirtualSwitchManager>,
    executor: Arc<MctpCciExecutor>,
    switch_addr: std::net::SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

async fn start_harness() -> Harness {
    let port_configs = vec![PortConfig::usp(), PortConfig::dsp(), PortConfig::dsp()];
    let vcs_configs = vec![VirtualSwitchConfig {
        upstream_port_index: 0,
        vppb_count: 2,
        initial_bounds: vec![Some(1), None],
    }];

    let manager = SwitchConnectionManager::new(&port_configs, "127.0.0.1:0".parse().unwrap());
    let ppm = PhysicalPortManager::new(&manager, &port_configs);
    let vsm = VirtualSwitchManager::new(&vcs_configs, ppm.clone()).unwrap();

    let ld_store = Arc::new(LdStore::new());
    ld_store.seed_port(1, 256 << 20, 4);
    ld_store.seed_port(2, 256 << 20, 1);

    let ctx = Arc::new(CommandContext {
        connection_manager: manager.clone(),
        port_manager: ppm,
        switch_manager: vsm.clone(),
        ld_store,
        background: Arc::new(Mutex::new(Default::default())),
    });
    let executor = MctpCciExecutor::new("127.0.0.1:0".parse().unwrap(), ctx);

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
    {
        let executor = executor.clone();
        tasks.push(tokio::spawn(async move {
            executor.run().await.expect("executor runs");
        }));
    }
    manager.wait_for_ready().await;
    vsm.wait_for_ready().await;
    executor.wait_for_ready().await;

    let switch_addr = manager.local_addr().unwrap();
    Harness {
        manager,
        vsm,
        executor,
        switch_addr,
        tasks,
    }
}

impl Harness {
    async fn shutdown(self) {
        self.executor.stop().await;
        self.vsm.stop().await;
        self.manager.stop().await;
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

struct FmClient {
    reader: PacketReader<OwnedReadHalf>,
    writer: PacketWriter<OwnedWriteHalf>,
    tag: u8,
    notifications: Vec<CciMessage>,
}

impl FmClient {
    async fn connect(executor: &MctpCciExecutor) -> Self {
        let stream = TcpStream::connect(executor.local_addr().unwrap())
            .await
            .unwrap();
        let (read_half, write_half) = stream.into_split();
        FmClient {
            reader: PacketReader::new(read_half),
            writer: PacketWriter::new(write_half),
            tag: 0,
            notifications: Vec::new(),
        }
    }

    /// Sends one request and reads frames until its response arrives,
    /// collecting any notifications pushed in between.
    async fn request(&mut self, opcode: u16, payload: Vec<u8>) -> CciMessage {
        self.tag = self.tag.wrapping_add(1);
        let tag = self.tag;
        self.writer
            .send(&Packet::Cci(CciPacket::request(
                0,
                CciMessage::request(opcode, tag, payload),
            )))
            .await
            .unwrap();

        loop {
            let frame = tokio::time::timeout(RECV_TIMEOUT, self.reader.next_packet())
                .await
                .expect("timed out waiting for a response")
                .unwrap()
                .expect("executor closed the connection");
            let Packet::Cci(cci) = frame else {
                panic!("non-CCI frame from the executor: {frame:?}");
            };
            match cci.msg_class {
                CciMsgClass::Rsp => {
                    assert_eq!(cci.message.header.message_tag, tag);
                    assert_eq!(cci.message.header.command_opcode, opcode);
                    return cci.message;
                }
                CciMsgClass::Req => self.notifications.push(cci.message),
            }
        }
    }

    /// Reads pushed notifications until one matches `accept`. Notifications
    /// queued since startup (e.g. the initial bind) are skipped by the
    /// predicate.
    async fn recv_notification(&mut self, accept: impl Fn(&CciMessage) -> bool) -> CciMessage {
        if let Some(index) = self.notifications.iter().position(&accept) {
            let message = self.notifications.remove(index);
            // Everything queued ahead of the match is stale; drop it too.
            self.notifications.drain(..index);
            return message;
        }
        loop {
            let frame = tokio::time::timeout(RECV_TIMEOUT, self.reader.next_packet())
                .await
                .expect("timed out waiting for a notification")
                .unwrap()
                .expect("executor closed the connection");
            let Packet::Cci(cci) = frame else {
                panic!("non-CCI frame from the executor: {frame:?}");
            };
            if cci.msg_class == CciMsgClass::Req && accept(&cci.message) {
                return cci.message;
            }
        }
    }

    async fn wait_for_background(&mut self) -> u16 {
        for _ in 0..50 {
            let status = self.request(opcode::BACKGROUND_OPERATION_STATUS, vec![]).await;
            assert_eq!(status.header.return_code, u16::from(ReturnCode::Success));
            let in_progress = status.payload[0] & 1 != 0;
            if !in_progress {
                return u16::from_le_bytes([status.payload[4], status.payload[5]]);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("background operation never completed");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn identify_reports_a_switch() {
    let harness = start_harness().await;
    let mut fm = FmClient::connect(&harness.executor).await;

    let response = fm.request(opcode::IDENTIFY, vec![]).await;
    assert_eq!(response.header.return_code, u16::from(ReturnCode::Success));
    assert_eq!(response.payload.len(), 18);
    assert_eq!(response.payload[17], 0x00); // component type: switch

    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_opcode_is_unsupported() {
    let harness = start_harness().await;
    let mut fm = FmClient::connect(&harness.executor).await;

    let response = fm.request(0x0BAD, vec![]).await;
    assert_eq!(
        response.header.return_code,
        u16::from(ReturnCode::Unsupported)
    );

    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn identify_switch_device_counts_ports_and_vppbs() {
    let harness = start_harness().await;
    let mut fm = FmClient::connect(&harness.executor).await;

    let response = fm.request(opcode::IDENTIFY_SWITCH_DEVICE, vec![]).await;
    assert_eq!(response.header.return_code, u16::from(ReturnCode::Success));
    assert_eq!(response.payload[2], 3); // physical ports
    assert_eq!(response.payload[3], 1); // VCSs
    let total_vppbs = u16::from_le_bytes([response.payload[68], response.payload[69]]);
    let bound_vppbs = u16::from_le_bytes([response.payload[70], response.payload[71]]);
    assert_eq!(total_vppbs, 2);
    assert_eq!(bound_vppbs, 1);

    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn get_physical_port_state_validates_ids() {
    let harness = start_harness().await;
    let mut fm = FmClient::connect(&harness.executor).await;

    let response = fm
        .request(opcode::GET_PHYSICAL_PORT_STATE, vec![2, 0, 1])
        .await;
    assert_eq!(response.header.return_code, u16::from(ReturnCode::Success));
    assert_eq!(response.payload[0], 2);
    // Two 16-byte blocks follow the 4-byte header.
    assert_eq!(response.payload.len(), 4 + 32);
    assert_eq!(response.payload[4], 0); // port id 0
    assert_eq!(response.payload[4 + 16], 1); // port id 1

    let bad = fm.request(opcode::GET_PHYSICAL_PORT_STATE, vec![1, 9]).await;
    assert_eq!(bad.header.return_code, u16::from(ReturnCode::InvalidInput));

    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bind_cycle_over_cci() {
    let harness = start_harness().await;
    let mut fm = FmClient::connect(&harness.executor).await;

    // Unbind vPPB#1 (background command).
    let started = fm.request(opcode::UNBIND_VPPB, vec![0, 1]).await;
    assert_eq!(
        started.header.return_code,
        u16::from(ReturnCode::BackgroundCommandStarted)
    );
    assert_eq!(started.header.background_operation, 1);
    assert_eq!(fm.wait_for_background().await, u16::from(ReturnCode::Success));

    // Bind it back to physical port 1 with LD 0.
    let started = fm.request(opcode::BIND_VPPB, vec![0, 1, 1, 0, 0]).await;
    assert_eq!(
        started.header.return_code,
        u16::from(ReturnCode::BackgroundCommandStarted)
    );
    assert_eq!(fm.wait_for_background().await, u16::from(ReturnCode::Success));

    // The switch pushed one SwitchUpdate per transition.
    let unbound = fm
        .recv_notification(|m| {
            m.header.command_opcode == opcode::NOTIFY_SWITCH_UPDATE && m.payload == vec![0, 1, 2]
        })
        .await;
    assert_eq!(unbound.payload, vec![0, 1, 2]);
    let bound = fm
        .recv_notification(|m| m.header.command_opcode == opcode::NOTIFY_SWITCH_UPDATE)
        .await;
    assert_eq!(bound.payload, vec![0, 1, 1]);

    // And the info query reflects the final state.
    let info = fm
        .request(opcode::GET_VIRTUAL_CXL_SWITCH_INFO, vec![1, 0])
        .await;
    assert_eq!(info.header.return_code, u16::from(ReturnCode::Success));
    assert_eq!(info.payload[4], 0); // vcs id
    assert_eq!(info.payload[7], 2); // vppb count
    assert_eq!(info.payload[8], 0x80); // vPPB#1 bound
    assert_eq!(info.payload[9], 1); // to physical port 1

    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn binding_an_occupied_vppb_reports_invalid_input() {
    let harness = start_harness().await;
    let mut fm = FmClient::connect(&harness.executor).await;

    let started = fm.request(opcode::BIND_VPPB, vec![0, 1, 2, 0, 0]).await;
    assert_eq!(
        started.header.return_code,
        u16::from(ReturnCode::BackgroundCommandStarted)
    );
    assert_eq!(
        fm.wait_for_background().await,
        u16::from(ReturnCode::InvalidInput)
    );

    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ld_allocation_queries() {
    let harness = start_harness().await;
    let mut fm = FmClient::connect(&harness.executor).await;

    let info = fm.request(opcode::GET_LD_INFO, vec![1]).await;
    assert_eq!(info.header.return_code, u16::from(ReturnCode::Success));
    let memory_size = u64::from_le_bytes(info.payload[..8].try_into().unwrap());
    let ld_count = u16::from_le_bytes([info.payload[8], info.payload[9]]);
    assert_eq!(memory_size, 256 << 20);
    assert_eq!(ld_count, 4);

    let allocations = fm.request(opcode::GET_LD_ALLOCATIONS, vec![1, 1, 2]).await;
    assert_eq!(
        allocations.header.return_code,
        u16::from(ReturnCode::Success)
    );
    assert_eq!(allocations.payload[0], 4); // total LDs
    assert_eq!(allocations.payload[2], 1); // start
    assert_eq!(allocations.payload[3], 2); // returned
    assert_eq!(allocations.payload.len(), 4 + 2 * 16);

    // start_ld_id beyond the LD count is invalid input.
    let out_of_range = fm.request(opcode::GET_LD_ALLOCATIONS, vec![1, 4, 1]).await;
    assert_eq!(
        out_of_range.header.return_code,
        u16::from(ReturnCode::InvalidInput)
    );

    // Set and read back an allocation.
    let mut set_payload = vec![1, 1, 0, 0];
    set_payload.extend_from_slice(&0x1000_0000u64.to_le_bytes());
    set_payload.extend_from_slice(&0u64.to_le_bytes());
    let set = fm.request(opcode::SET_LD_ALLOCATIONS, set_payload).await;
    assert_eq!(set.header.return_code, u16::from(ReturnCode::Success));
    assert_eq!(set.payload[0], 1);

    let read_back = fm.request(opcode::GET_LD_ALLOCATIONS, vec![1, 0, 1]).await;
    let first = u64::from_le_bytes(read_back.payload[4..12].try_into().unwrap());
    assert_eq!(first, 0x1000_0000);

    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tunnel_relays_to_the_device_behind_a_port() {
    let harness = start_harness().await;
    let mut fm = FmClient::connect(&harness.executor).await;

    // A device on DSP port 2 answering CCI requests with a fixed payload.
    let device = cxl_switch::SwitchConnectionClient::new(
        "127.0.0.1",
        harness.switch_addr.port(),
        2,
        cxl_switch::client::ClientMode::Device,
    );
    let device_task = {
        let device = device.clone();
        tokio::spawn(async move { device.run().await })
    };
    device.wait_for_ready().await;
    let device_conn: Arc<Connection> = device.connection();
    let responder = tokio::spawn(async move {
        while let Some(Packet::Cci(request)) = device_conn.cci.host_to_target.recv().await {
            let reply = CciMessage::response(
                request.opcode(),
                request.message.header.message_tag,
                0,
                false,
                vec![0xEE, 0xFF],
            );
            device_conn
                .cci
                .target_to_host
                .send(Packet::Cci(CciPacket::response(request.port_index, reply)))
                .await
                .unwrap();
        }
    });

    // Tunnel an Identify to the device.
    let inner = CciMessage::request(opcode::IDENTIFY, 7, vec![]);
    let mut inner_bytes = Vec::new();
    inner_bytes.extend_from_slice(&inner.header.encode());
    inner_bytes.extend_from_slice(&inner.payload);

    let mut payload = vec![2, 0];
    payload.extend_from_slice(&(inner_bytes.len() as u16).to_le_bytes());
    payload.extend_from_slice(&inner_bytes);

    let response = fm.request(opcode::TUNNEL_MANAGEMENT_COMMAND, payload).await;
    assert_eq!(response.header.return_code, u16::from(ReturnCode::Success));
    let response_size = u16::from_le_bytes([response.payload[0], response.payload[1]]) as usize;
    assert_eq!(response.payload.len(), 4 + response_size);
    let inner_header = CciMessageHeader::decode(&response.payload[4..16]);
    assert_eq!(inner_header.command_opcode, opcode::IDENTIFY);
    assert_eq!(inner_header.message_tag, 7);
    assert_eq!(&response.payload[16..], &[0xEE, 0xFF]);

    // Tunnelling to a disconnected port is invalid input.
    let mut payload = vec![1, 0];
    payload.extend_from_slice(&(inner_bytes.len() as u16).to_le_bytes());
    payload.extend_from_slice(&inner_bytes);
    let response = fm.request(opcode::TUNNEL_MANAGEMENT_COMMAND, payload).await;
    assert_eq!(
        response.header.return_code,
        u16::from(ReturnCode::InvalidInput)
    );

    device.stop().await;
    let _ = device_task.await.unwrap();
    responder.abort();
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn port_events_are_pushed_to_the_fm() {
    let harness = start_harness().await;
    let mut fm = FmClient::connect(&harness.executor).await;

    // Connect a device to DSP port 2 the raw way.
    let stream = TcpStream::connect(harness.switch_addr).await.unwrap();
    let (read_half, write_half) = stream.into_split();
    let mut writer = PacketWriter::new(write_half);
    let mut reader = PacketReader::new(read_half);
    writer
        .send(&Packet::Sideband(SidebandPacket::ConnectionRequest {
            port_index: 2,
        }))
        .await
        .unwrap();
    assert_eq!(
        reader.next_packet().await.unwrap(),
        Some(Packet::Sideband(SidebandPacket::ConnectionAccept))
    );

    let update = fm
        .recv_notification(|m| m.header.command_opcode == opcode::NOTIFY_PORT_UPDATE)
        .await;
    assert_eq!(update.payload, vec![2, 1]);
    // A DSP event also announces a device change.
    let device_update = fm
        .recv_notification(|m| m.header.command_opcode == opcode::NOTIFY_DEVICE_UPDATE)
        .await;
    assert_eq!(device_update.payload, Vec::<u8>::new());

    let connected = fm.request(opcode::GET_CONNECTED_DEVICES, vec![]).await;
    assert_eq!(connected.payload, vec![1, 2]);

    harness.shutdown().await;
}
