//! Bind/unbind state machine and rewiring.

mod helpers;

use cxl_proto::io::{CplStatus, CxlIoPacket, IoBody};
use cxl_proto::{Bdf, Packet};
use cxl_switch::{BindingStatus, PortConfig, SwitchError, SwitchUpdateEvent, VirtualSwitchConfig};
use helpers::{start_switch, TestSwitch, WirePeer};

async fn one_dsp_switch() -> TestSwitch {
    start_switch(
        vec![PortConfig::usp(), PortConfig::dsp()],
        vec![VirtualSwitchConfig {
            upstream_port_index: 0,
            vppb_count: 1,
            initial_bounds: vec![Some(1)],
        }],
    )
    .await
}

fn cfg_wr_to_bus1() -> Packet {
    Packet::Io(
        CxlIoPacket::cfg_wr(Bdf::new(1, 0, 0), 0x10, 4, 0xDEAD_BEEF, true, 0, 0x5, 0).unwrap(),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unbind_then_rebind_restores_routing() {
    let switch = one_dsp_switch().await;
    let vcs = switch.vsm.vcs(0).unwrap();
    let mut events = switch.vsm.subscribe_events();

    let mut device = WirePeer::connect_port(switch.addr, 1).await;
    let mut host = WirePeer::connect_port(switch.addr, 0).await;
    {
        let vppb = vcs.vppb(1).unwrap();
        let registers = vppb.registers();
        registers.write().unwrap().bridge.set_secondary_bus_number(1);
    }
    assert_eq!(vcs.binding_status(1).unwrap(), BindingStatus::Bound);
    assert_eq!(vcs.bound_port(1).unwrap(), Some(1));

    // Bound: the write reaches the device.
    host.send(&cfg_wr_to_bus1()).await;
    assert!(matches!(device.recv().await, Packet::Io(_)));

    switch.vsm.unbind_vppb(0, 1).await.unwrap();
    assert_eq!(
        events.recv().await.unwrap(),
        SwitchUpdateEvent {
            vcs_id: 0,
            vppb_index: 1,
            binding_status: BindingStatus::Unbound
        }
    );
    assert_eq!(vcs.binding_status(1).unwrap(), BindingStatus::Unbound);

    // Unbound: the same write is unsupported.
    host.send(&cfg_wr_to_bus1()).await;
    let Packet::Io(io) = host.recv().await else {
        panic!("expected a completion");
    };
    let IoBody::Cpl(cpl) = &io.body else {
        panic!("expected Cpl, got {:?}", io.body);
    };
    assert_eq!(cpl.status, CplStatus::UnsupportedRequest);
    assert_eq!(cpl.tag, 0x5);

    switch.vsm.bind_vppb(0, 1, 1).await.unwrap();
    assert_eq!(
        events.recv().await.unwrap(),
        SwitchUpdateEvent {
            vcs_id: 0,
            vppb_index: 1,
            binding_status: BindingStatus::Bound
        }
    );

    // Rebound: delivery works again.
    host.send(&cfg_wr_to_bus1()).await;
    assert!(matches!(device.recv().await, Packet::Io(_)));

    switch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bind_and_unbind_validate_their_targets() {
    let switch = start_switch(
        vec![PortConfig::usp(), PortConfig::dsp(), PortConfig::dsp()],
        vec![VirtualSwitchConfig {
            upstream_port_index: 0,
            vppb_count: 2,
            initial_bounds: vec![Some(1), None],
        }],
    )
    .await;

    // Binding over a bound vPPB fails.
    assert!(matches!(
        switch.vsm.bind_vppb(0, 1, 2).await,
        Err(SwitchError::VppbAlreadyBound(1))
    ));
    // Binding to a USP fails.
    assert!(matches!(
        switch.vsm.bind_vppb(0, 2, 0).await,
        Err(SwitchError::PortNotDownstream(0))
    ));
    // Binding a DSP already claimed by another vPPB fails.
    assert!(matches!(
        switch.vsm.bind_vppb(0, 2, 1).await,
        Err(SwitchError::PortAlreadyBound(1))
    ));
    // Out-of-range indices fail.
    assert!(matches!(
        switch.vsm.bind_vppb(0, 3, 2).await,
        Err(SwitchError::VppbOutOfRange(3))
    ));
    assert!(matches!(
        switch.vsm.bind_vppb(0, 2, 9).await,
        Err(SwitchError::PortOutOfRange(9))
    ));
    assert!(matches!(
        switch.vsm.bind_vppb(1, 1, 2).await,
        Err(SwitchError::UnknownVcs(1))
    ));
    // Unbinding an unbound vPPB fails.
    assert!(matches!(
        switch.vsm.unbind_vppb(0, 2).await,
        Err(SwitchError::VppbNotBound(2))
    ));

    // A failed bind leaves the slot unbound and bindable.
    let vcs = switch.vsm.vcs(0).unwrap();
    assert_ne!(vcs.binding_status(2).unwrap(), BindingStatus::Bound);
    switch.vsm.bind_vppb(0, 2, 2).await.unwrap();
    assert_eq!(vcs.binding_status(2).unwrap(), BindingStatus::Bound);

    switch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bind_unbind_cycle_preserves_the_register_image() {
    let switch = one_dsp_switch().await;
    let vcs = switch.vsm.vcs(0).unwrap();
    switch.vsm.unbind_vppb(0, 1).await.unwrap();

    // Program the vPPB while unbound and snapshot its config image.
    let vppb = vcs.vppb(1).unwrap();
    {
        let registers = vppb.registers();
        let mut registers = registers.write().unwrap();
        registers.bridge.set_secondary_bus_number(3);
        registers.bridge.set_mmio_window(0x8000_0000, 0x8FFF_FFFF);
    }
    let snapshot: Vec<u32> = (0..0x40)
        .map(|offset| {
            vppb.registers()
                .read()
                .unwrap()
                .cfg_read(offset * 4)
        })
        .collect();

    switch.vsm.bind_vppb(0, 1, 1).await.unwrap();
    switch.vsm.unbind_vppb(0, 1).await.unwrap();

    let after: Vec<u32> = (0..0x40)
        .map(|offset| {
            vppb.registers()
                .read()
                .unwrap()
                .cfg_read(offset * 4)
        })
        .collect();
    assert_eq!(snapshot, after);

    switch.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn repeated_stop_is_a_no_op() {
    let switch = one_dsp_switch().await;
    switch.vsm.stop().await;
    switch.vsm.stop().await;
    switch.manager.stop().await;
    switch.manager.stop().await;
    // The harness shutdown stops everything again.
    switch.shutdown().await;
}
