use std::net::Ipv4Addr;

use bytes::Bytes;
use vnet_datapath::{family::cmd, packet, Datapath, DatapathError, DatapathOps};
use vnet_flow::{flow::attr, Flow, FlowAction, FlowKey, FlowMatch, FlowStats};
use vnet_netlink::Errno;
use vnet_packet::{Ethernet, EthernetPayload, Ipv4, Ipv4Payload, MacAddr, Udp, UdpPayload};
use vnet_wire::{AttrError, NlFlags};

use crate::kernel::{ack, connect, done, error, parse, reply, DP_INDEX, FLOW_ID, PACKET_ID};

fn datapath() -> Datapath {
    Datapath { index: DP_INDEX, name: "vnet0".to_owned(), stats: None, user_features: None }
}

fn flow_match(in_port: u32) -> FlowMatch {
    FlowMatch::new()
        .with_key(FlowKey::InPort(in_port))
        .with_key(FlowKey::Ethernet {
            source: MacAddr::new(2, 0, 0, 0, 0, 1),
            destination: MacAddr::new(2, 0, 0, 0, 0, 2),
        })
        .with_key(FlowKey::EtherType(0x0800))
}

fn stats_bytes(stats: FlowStats) -> Vec<u8> {
    let mut raw = stats.packets.to_ne_bytes().to_vec();
    raw.extend_from_slice(&stats.bytes.to_ne_bytes());
    raw
}

#[tokio::test]
async fn create_flow_returns_the_echoed_flow() {
    let (dp, _notifications, mut kernel) = connect().await;
    let flow = Flow::new(flow_match(1)).with_action(FlowAction::Output(2));

    let answer = async {
        let request = kernel.recv().await;
        assert_eq!(request.ty(), FLOW_ID);
        assert!(request.flags().contains(NlFlags::ECHO | NlFlags::ACK));
        let (header, dp_ifindex, attrs) = parse(&request);
        assert_eq!(header.cmd, cmd::NEW);
        assert_eq!(dp_ifindex, DP_INDEX);

        let sent = Flow::decode(&attrs).unwrap();
        assert_eq!(sent.flow_match, flow_match(1));
        assert_eq!(sent.actions, vec![FlowAction::Output(2)]);
        assert!(!attrs.contains(attr::STATS));

        let stats = FlowStats { packets: 0, bytes: 0 };
        kernel.send([
            reply(&request, DP_INDEX, NlFlags::empty(), |w| {
                sent.encode(w);
                w.put(attr::STATS, &stats_bytes(stats));
            }),
            ack(&request),
        ]);
    };
    let datapath = datapath();
    let (created, ()) = tokio::join!(dp.create_flow(&datapath, &flow), answer);

    let created = created.unwrap();
    assert_eq!(created.flow_match, flow.flow_match);
    assert_eq!(created.actions, flow.actions);
    assert_eq!(created.stats, Some(FlowStats::default()));
}

#[tokio::test]
async fn create_flow_without_echo_returns_the_request() {
    let (dp, _notifications, mut kernel) = connect().await;
    let flow = Flow::new(flow_match(3)).with_action(FlowAction::push_vlan(10));

    let answer = async {
        let request = kernel.recv().await;
        kernel.send([ack(&request)]);
    };
    let datapath = datapath();
    let (created, ()) = tokio::join!(dp.create_flow(&datapath, &flow), answer);

    assert_eq!(created.unwrap(), flow);
}

#[tokio::test]
async fn missing_flow_is_not_found() {
    let (dp, _notifications, mut kernel) = connect().await;
    let ops: &dyn DatapathOps = &dp;

    let answer = async {
        let request = kernel.recv().await;
        let (header, _, attrs) = parse(&request);
        assert_eq!(header.cmd, cmd::GET);
        assert_eq!(FlowMatch::decode(&attrs.nested(attr::KEY).unwrap()).unwrap(), flow_match(4));
        kernel.send([error(&request, Errno::ENOENT)]);
    };
    let datapath = datapath();
    let key = flow_match(4);
    let (result, ()) = tokio::join!(ops.flow(&datapath, &key), answer);

    assert!(matches!(result.unwrap_err(), DatapathError::FlowNotFound));
}

#[tokio::test]
async fn enumerate_flows_reports_usage() {
    let (dp, _notifications, mut kernel) = connect().await;
    let ops: &dyn DatapathOps = &dp;

    let answer = async {
        let request = kernel.recv().await;
        assert!(request.flags().contains(NlFlags::DUMP));

        let busy = Flow::new(flow_match(1)).with_action(FlowAction::Output(2));
        let idle = Flow::new(flow_match(2));
        kernel.send([
            reply(&request, DP_INDEX, NlFlags::MULTI, |w| {
                busy.encode(w);
                w.put(attr::STATS, &stats_bytes(FlowStats { packets: 12, bytes: 7200 }))
                    .put_u8(attr::TCP_FLAGS, 0x12)
                    .put_u64(attr::USED, 99_000);
            }),
            reply(&request, DP_INDEX, NlFlags::MULTI, |w| idle.encode(w)),
            done(&request),
        ]);
    };
    let datapath = datapath();
    let (flows, ()) = tokio::join!(ops.flows(&datapath), answer);

    let flows = flows.unwrap();
    assert_eq!(flows.len(), 2);
    assert_eq!(flows[0].stats, Some(FlowStats { packets: 12, bytes: 7200 }));
    assert_eq!(flows[0].tcp_flags, Some(0x12));
    assert_eq!(flows[0].last_used, Some(99_000));
    assert_eq!(flows[1].flow_match.in_port(), Some(2));
    assert!(flows[1].actions.is_empty());
    assert_eq!(flows[1].stats, None);
}

#[tokio::test]
async fn flush_deletes_without_a_key() {
    let (dp, _notifications, mut kernel) = connect().await;

    let answer = async {
        let request = kernel.recv().await;
        assert_eq!(request.ty(), FLOW_ID);
        assert!(request.flags().contains(NlFlags::ACK));
        let (header, dp_ifindex, attrs) = parse(&request);
        assert_eq!(header.cmd, cmd::DEL);
        assert_eq!(dp_ifindex, DP_INDEX);
        assert!(attrs.is_empty());
        kernel.send([ack(&request)]);
    };
    let datapath = datapath();
    let (result, ()) = tokio::join!(dp.flush_flows(&datapath), answer);

    result.unwrap();
}

#[tokio::test]
async fn execute_packet_carries_frame_key_and_actions() {
    let (dp, _notifications, mut kernel) = connect().await;

    let frame = Ethernet::new(
        MacAddr::new(2, 0, 0, 0, 0, 1),
        MacAddr::new(2, 0, 0, 0, 0, 2),
        EthernetPayload::Ipv4(Ipv4::new(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Payload::Udp(Udp::new(4000, 5000, UdpPayload::Data(Bytes::from_static(b"ping")))),
        )),
    );
    let raw = frame.serialize().unwrap();
    let key = FlowMatch::from_ethernet(&frame, 1);
    let actions = vec![FlowAction::push_vlan(100), FlowAction::Output(3)];

    let answer = async {
        let request = kernel.recv().await;
        assert_eq!(request.ty(), PACKET_ID);
        let (header, dp_ifindex, attrs) = parse(&request);
        assert_eq!(header.cmd, packet::cmd::EXECUTE);
        assert_eq!(dp_ifindex, DP_INDEX);

        let (packet, flow_match, sent_actions) = packet::decode_execute(&attrs).unwrap();
        assert_eq!(packet, raw);
        assert_eq!(flow_match, key);
        assert_eq!(sent_actions, actions);
        assert_eq!(Ethernet::deserialize(&packet).unwrap().source, frame.source);
        kernel.send([ack(&request)]);
    };
    let datapath = datapath();
    let (result, ()) = tokio::join!(dp.execute_packet(&datapath, &raw, &key, &actions), answer);

    result.unwrap();
}

#[tokio::test]
async fn oversized_packet_is_rejected_before_sending() {
    let (dp, _notifications, _kernel) = connect().await;
    let sent = dp.connection().stats().requests();

    let raw = vec![0; 70_000];
    let result = dp.execute_packet(&datapath(), &raw, &flow_match(1), &[FlowAction::Output(2)]).await;

    assert!(matches!(
        result,
        Err(DatapathError::Attr(AttrError::TooLong { kind: packet::attr::PACKET, len: 70_004 }))
    ));
    assert_eq!(dp.connection().stats().requests(), sent);
}
