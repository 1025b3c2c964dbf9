//! Sideband handshake behaviour of the switch connection manager.

mod helpers;

use cxl_proto::sideband::SidebandPacket;
use cxl_proto::Packet;
use cxl_switch::client::{ClientMode, InjectedError};
use cxl_switch::{PortConfig, PortUpdateEvent, SwitchConnectionClient, SwitchError};
use helpers::{start_switch, TestSwitch, WirePeer};
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

async fn four_port_switch() -> TestSwitch {
    start_switch(
        vec![
            PortConfig::usp(),
            PortConfig::usp(),
            PortConfig::dsp(),
            PortConfig::dsp(),
        ],
        vec![],
    )
    .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handshake_accepts_and_emits_port_up() {
    let switch = start_switch(vec![PortConfig::usp()], vec![]).await;
    let mut events = switch.manager.subscribe_events();

    // Exact wire bytes: request for port 0, accept in reply.
    let mut stream = TcpStream::connect(switch.addr).await.unwrap();
    stream.write_all(&[0x04, 0x05, 0x00, 0x00, 0x00]).await.unwrap();
    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [0x04, 0x04, 0x00, 0x01]);

    assert_eq!(
        events.recv().await.unwrap(),
        PortUpdateEvent {
            port_id: 0,
            connected: true
        }
    );
    assert!(switch.manager.port_states()[0].connected);

    drop(stream);
    assert_eq!(
        events.recv().await.unwrap(),
        PortUpdateEvent {
            port_id: 0,
            connected: false
        }
    );
    assert!(!switch.manager.port_states()[0].connected);

    switch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handshake_rejects_out_of_range_port() {
    let switch = four_port_switch().await;

    let mut peer = WirePeer::connect(switch.addr).await;
    peer.send(&Packet::Sideband(SidebandPacket::ConnectionRequest {
        port_index: 4,
    }))
    .await;
    assert_eq!(
        peer.recv().await,
        Packet::Sideband(SidebandPacket::ConnectionReject)
    );

    switch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handshake_rejects_occupied_port() {
    let switch = four_port_switch().await;

    let _first = WirePeer::connect_port(switch.addr, 0).await;
    let mut second = WirePeer::connect(switch.addr).await;
    second
        .send(&Packet::Sideband(SidebandPacket::ConnectionRequest {
            port_index: 0,
        }))
        .await;
    assert_eq!(
        second.recv().await,
        Packet::Sideband(SidebandPacket::ConnectionReject)
    );

    switch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handshake_rejects_non_request_frames() {
    let switch = four_port_switch().await;

    // A sideband frame that is not a connection request.
    let mut peer = WirePeer::connect(switch.addr).await;
    peer.send(&Packet::Sideband(SidebandPacket::ConnectionReject))
        .await;
    assert_eq!(
        peer.recv().await,
        Packet::Sideband(SidebandPacket::ConnectionReject)
    );

    // A non-sideband frame.
    let mut peer = WirePeer::connect(switch.addr).await;
    peer.send(&Packet::Io(cxl_proto::io::CxlIoPacket::mem_rd(
        0x1000, 4, 0, 0, 0,
    )))
    .await;
    assert_eq!(
        peer.recv().await,
        Packet::Sideband(SidebandPacket::ConnectionReject)
    );

    // The violation is terminal for that socket only; the switch still
    // accepts a well-formed handshake afterwards.
    let _ok = WirePeer::connect_port(switch.addr, 0).await;

    switch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn port_reconnects_after_disconnect() {
    let switch = four_port_switch().await;
    let mut events = switch.manager.subscribe_events();

    let first = WirePeer::connect_port(switch.addr, 2).await;
    assert_eq!(
        events.recv().await.unwrap(),
        PortUpdateEvent {
            port_id: 2,
            connected: true
        }
    );
    drop(first);
    assert_eq!(
        events.recv().await.unwrap(),
        PortUpdateEvent {
            port_id: 2,
            connected: false
        }
    );

    let _second = WirePeer::connect_port(switch.addr, 2).await;
    assert_eq!(
        events.recv().await.unwrap(),
        PortUpdateEvent {
            port_id: 2,
            connected: true
        }
    );

    switch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_component_connects_and_stops() {
    let switch = four_port_switch().await;

    let client =
        SwitchConnectionClient::new("127.0.0.1", switch.addr.port(), 0, ClientMode::Host);
    let task = {
        let client = client.clone();
        tokio::spawn(async move { client.run().await })
    };
    client.wait_for_ready().await;
    assert!(switch.manager.port_states()[0].connected);

    client.stop().await;
    task.await.unwrap().unwrap();

    switch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_surfaces_rejection_on_injected_errors() {
    let switch = four_port_switch().await;

    for injected in [InjectedError::NonSideband, InjectedError::NonConnectionRequest] {
        let client = SwitchConnectionClient::new_without_retry(
            "127.0.0.1",
            switch.addr.port(),
            0,
            ClientMode::Host,
        );
        client.inject_error(injected);
        let result = client.run().await;
        assert!(
            matches!(result, Err(SwitchError::ConnectionRejected)),
            "expected rejection for {injected:?}, got {result:?}"
        );
    }

    switch.shutdown().await;
}
