use std::net::Ipv4Addr;

use bytes::Bytes;
use futures::StreamExt;
use vnet_datapath::{family::cmd, packet, port, DatapathError, DatapathEvent, PortType, UpcallKind};
use vnet_flow::FlowMatch;
use vnet_packet::{Arp, Ethernet, EthernetPayload, MacAddr};

use crate::kernel::{connect, notification, DP_INDEX, PACKET_ID, VPORT_GROUP, VPORT_ID};

#[tokio::test]
async fn port_events_after_subscribing() {
    let (dp, notifications, mut kernel) = connect().await;
    let mut events = dp.events(notifications);

    assert!(!kernel.peer().is_member(VPORT_GROUP));
    dp.subscribe_port_events().await.unwrap();
    assert!(kernel.peer().is_member(VPORT_GROUP));

    kernel.send([
        notification(VPORT_ID, cmd::NEW, DP_INDEX, |w| {
            w.put_u32(port::attr::PORT_NO, 4)
                .put_u32(port::attr::TYPE, PortType::NetDev.raw())
                .put_str(port::attr::NAME, "eth4");
        }),
        notification(VPORT_ID, cmd::DEL, DP_INDEX, |w| {
            w.put_u32(port::attr::PORT_NO, 4)
                .put_u32(port::attr::TYPE, PortType::NetDev.raw())
                .put_str(port::attr::NAME, "eth4");
        }),
    ]);

    let Some(Ok(DatapathEvent::PortCreated(created))) = events.next().await else {
        panic!("expected a port creation");
    };
    assert_eq!(created.datapath, DP_INDEX);
    assert_eq!(created.number, 4);
    assert_eq!(created.name, "eth4");

    let Some(Ok(DatapathEvent::PortDeleted(deleted))) = events.next().await else {
        panic!("expected a port deletion");
    };
    assert_eq!(deleted, created);
}

#[tokio::test]
async fn miss_upcall_carries_the_packet() {
    let (dp, notifications, mut kernel) = connect().await;
    let mut events = dp.events(notifications);

    let source = MacAddr::new(2, 0, 0, 0, 0, 7);
    let frame = Ethernet::new(
        source,
        MacAddr::broadcast(),
        EthernetPayload::Arp(Arp::request(source, Ipv4Addr::new(10, 0, 0, 7), Ipv4Addr::new(10, 0, 0, 1))),
    );
    let raw = frame.serialize().unwrap();
    let key = FlowMatch::from_ethernet(&frame, 2);

    kernel.send([notification(PACKET_ID, packet::cmd::MISS, DP_INDEX, |w| {
        w.put(packet::attr::PACKET, &raw);
        w.nested(packet::attr::KEY, |w| key.encode(w));
    })]);

    let Some(Ok(DatapathEvent::Upcall(upcall))) = events.next().await else {
        panic!("expected an upcall");
    };
    assert_eq!(upcall.kind, UpcallKind::Miss);
    assert_eq!(upcall.datapath, DP_INDEX);
    assert_eq!(upcall.flow_match, key);
    assert_eq!(upcall.flow_match.in_port(), Some(2));
    assert_eq!(upcall.userdata, None);
    assert_eq!(upcall.frame().unwrap(), frame);
}

#[tokio::test]
async fn action_upcall_keeps_userdata() {
    let (dp, notifications, mut kernel) = connect().await;
    let mut events = dp.events(notifications);

    let key = FlowMatch::new().with_key(vnet_flow::FlowKey::InPort(1));
    kernel.send([notification(PACKET_ID, packet::cmd::ACTION, DP_INDEX, |w| {
        w.put(packet::attr::PACKET, b"not a frame");
        w.nested(packet::attr::KEY, |w| key.encode(w));
        w.put(packet::attr::USERDATA, b"cookie");
    })]);

    let Some(Ok(DatapathEvent::Upcall(upcall))) = events.next().await else {
        panic!("expected an upcall");
    };
    assert_eq!(upcall.kind, UpcallKind::Action);
    assert_eq!(upcall.userdata, Some(Bytes::from_static(b"cookie")));
    assert!(upcall.frame().is_err());
}

#[tokio::test]
async fn undecodable_events_do_not_end_the_stream() {
    let (dp, notifications, mut kernel) = connect().await;
    let mut events = dp.events(notifications);

    // A port notification without a name, then a message of some other family.
    kernel.send([
        notification(VPORT_ID, cmd::NEW, DP_INDEX, |w| {
            w.put_u32(port::attr::PORT_NO, 1).put_u32(port::attr::TYPE, 1);
        }),
        notification(0x30, 1, 0, |_| {}),
    ]);

    let err = events.next().await.unwrap().unwrap_err();
    assert!(matches!(err, DatapathError::Attr(_)), "{err:?}");

    let Some(Ok(DatapathEvent::Other(msg))) = events.next().await else {
        panic!("expected an undecoded message");
    };
    assert_eq!(msg.ty(), 0x30);
}
