use bytes::Bytes;
use vnet_datapath::{family::cmd, port::attr, Datapath, DatapathOps, Port, PortSpec, PortStats, PortType};
use vnet_netlink::Errno;
use vnet_wire::NlFlags;

use crate::kernel::{ack, connect, created, done, error, parse, reply, DP_INDEX, PORT, VPORT_ID};

fn datapath() -> Datapath {
    Datapath { index: DP_INDEX, name: "vnet0".to_owned(), stats: None, user_features: None }
}

fn stats_bytes(stats: &PortStats) -> Vec<u8> {
    [
        stats.rx_packets,
        stats.tx_packets,
        stats.rx_bytes,
        stats.tx_bytes,
        stats.rx_errors,
        stats.tx_errors,
        stats.rx_dropped,
        stats.tx_dropped,
    ]
    .iter()
    .flat_map(|word| word.to_ne_bytes())
    .collect()
}

#[tokio::test]
async fn create_port_sends_spec_and_decodes_reply() {
    let (dp, _notifications, mut kernel) = connect().await;
    let spec = PortSpec::new("vx0", PortType::Vxlan)
        .with_number(3)
        .with_options(Bytes::from_static(&[8, 0, 1, 0, 0x12, 0xb5, 0, 0]));

    let create = tokio::spawn({
        let dp = dp.clone();
        let spec = spec.clone();
        async move { dp.create_port(&datapath(), &spec).await }
    });

    let request = kernel.recv().await;
    assert_eq!(request.ty(), VPORT_ID);
    assert!(request.flags().contains(NlFlags::ECHO | NlFlags::ACK));
    let (header, dp_ifindex, attrs) = parse(&request);
    assert_eq!(header.cmd, cmd::NEW);
    assert_eq!(dp_ifindex, DP_INDEX);
    assert_eq!(attrs.string(attr::NAME).unwrap(), "vx0");
    assert_eq!(attrs.u32(attr::TYPE).unwrap(), PortType::Vxlan.raw());
    assert_eq!(attrs.u32(attr::UPCALL_PID).unwrap(), PORT);
    assert_eq!(attrs.u32(attr::PORT_NO).unwrap(), 3);
    assert_eq!(attrs.bytes(attr::OPTIONS).unwrap(), spec.options.as_ref().unwrap());

    kernel.send(created(&request, DP_INDEX, |w| {
        w.put_u32(attr::PORT_NO, 3)
            .put_u32(attr::TYPE, PortType::Vxlan.raw())
            .put_str(attr::NAME, "vx0")
            .put_u32(attr::UPCALL_PID, PORT);
    }));

    let port = create.await.unwrap().unwrap();
    assert_eq!(port.datapath, DP_INDEX);
    assert_eq!(port.number, 3);
    assert_eq!(port.port_type, PortType::Vxlan);
    assert_eq!(port.name, "vx0");
    assert_eq!(port.upcall_pid, Some(PORT));
    assert_eq!(port.stats, None);
}

#[tokio::test]
async fn enumerate_ports_through_the_trait() {
    let (dp, _notifications, mut kernel) = connect().await;
    let ops: &dyn DatapathOps = &dp;

    let stats = PortStats { rx_packets: 10, tx_packets: 4, rx_bytes: 1500, ..Default::default() };
    let raw_stats = stats_bytes(&stats);

    let answer = async {
        let request = kernel.recv().await;
        assert!(request.flags().contains(NlFlags::DUMP));
        let (_, dp_ifindex, attrs) = parse(&request);
        assert_eq!(dp_ifindex, DP_INDEX);
        assert!(attrs.is_empty());

        kernel.send([
            reply(&request, DP_INDEX, NlFlags::MULTI, |w| {
                w.put_u32(attr::PORT_NO, 0)
                    .put_u32(attr::TYPE, PortType::Internal.raw())
                    .put_str(attr::NAME, "vnet0");
            }),
            reply(&request, DP_INDEX, NlFlags::MULTI, |w| {
                w.put_u32(attr::PORT_NO, 1)
                    .put_u32(attr::TYPE, PortType::NetDev.raw())
                    .put_str(attr::NAME, "eth0")
                    .put(attr::STATS, &raw_stats);
            }),
            done(&request),
        ]);
    };
    let datapath = datapath();
    let (ports, ()) = tokio::join!(ops.ports(&datapath), answer);

    let ports = ports.unwrap();
    assert_eq!(ports.len(), 2);
    assert_eq!(ports[0].port_type, PortType::Internal);
    assert_eq!(ports[1].name, "eth0");
    assert_eq!(ports[1].stats, Some(stats));
}

#[tokio::test]
async fn unknown_port_is_not_found() {
    let (dp, _notifications, mut kernel) = connect().await;
    let ops: &dyn DatapathOps = &dp;

    let answer = async {
        let request = kernel.recv().await;
        let (header, _, attrs) = parse(&request);
        assert_eq!(header.cmd, cmd::GET);
        assert_eq!(attrs.string(attr::NAME).unwrap(), "eth9");
        kernel.send([error(&request, Errno::ENODEV)]);
    };
    let datapath = datapath();
    let (result, ()) = tokio::join!(ops.port(&datapath, "eth9"), answer);

    let err = result.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.to_string(), "port eth9 not found");
}

#[tokio::test(start_paused = true)]
async fn unanswered_lookup_times_out() {
    let (dp, _notifications, mut kernel) = connect().await;

    let answer = async {
        // Received and ignored.
        kernel.recv().await;
    };
    let datapath = datapath();
    let (result, _) = tokio::join!(dp.get_port_by_number(&datapath, 7), answer);

    let err = result.unwrap_err();
    assert!(err.is_timeout());
    assert!(!err.is_not_found());
    assert_eq!(dp.connection().stats().timeouts(), 1);
}

#[tokio::test]
async fn delete_port_addresses_it_by_number() {
    let (dp, _notifications, mut kernel) = connect().await;

    let port = Port {
        datapath: DP_INDEX,
        number: 5,
        port_type: PortType::NetDev,
        name: "eth1".to_owned(),
        upcall_pid: None,
        stats: None,
        options: None,
    };

    let answer = async {
        let request = kernel.recv().await;
        assert!(request.flags().contains(NlFlags::ACK));
        let (header, dp_ifindex, attrs) = parse(&request);
        assert_eq!(header.cmd, cmd::DEL);
        assert_eq!(dp_ifindex, DP_INDEX);
        assert_eq!(attrs.u32(attr::PORT_NO).unwrap(), 5);
        assert!(!attrs.contains(attr::NAME));
        kernel.send([ack(&request)]);
    };
    let (result, ()) = tokio::join!(dp.delete_port(&port), answer);

    result.unwrap();
}
