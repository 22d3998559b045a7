use vnet_datapath::{
    datapath::attr, family::cmd, DatapathError, DatapathOps, DatapathStats, OvsDatapathConnection,
};
use vnet_netlink::{Errno, NetlinkConnection};
use vnet_transport::pair;
use vnet_wire::NlFlags;

use crate::kernel::{
    connect, created, done, error, parse, reply, Kernel, DATAPATH_ID, DP_INDEX, FLOW_ID, PACKET_ID,
    PORT, VPORT_ID,
};

#[tokio::test]
async fn initialize_resolves_all_families() {
    let (dp, _notifications, _kernel) = connect().await;

    let families = dp.families();
    assert_eq!(families.datapath.id, DATAPATH_ID);
    assert_eq!(families.vport.id, VPORT_ID);
    assert_eq!(families.flow.id, FLOW_ID);
    assert_eq!(families.packet.id, PACKET_ID);
    assert_eq!(dp.connection().port_id(), PORT);
}

#[tokio::test]
async fn missing_kernel_module_is_reported_by_family() {
    let (transport, peer) = pair(PORT);
    let (conn, _notifications) = NetlinkConnection::spawn(transport);
    let mut kernel = Kernel::new(peer);

    let init = tokio::spawn(OvsDatapathConnection::initialize(conn));
    kernel.answer_families(&["ovs_flow"]).await;

    let err = init.await.unwrap().unwrap_err();
    assert!(matches!(err, DatapathError::MissingFamily("ovs_flow")), "{err:?}");
}

#[tokio::test]
async fn create_datapath_registers_this_socket_for_upcalls() {
    let (dp, _notifications, mut kernel) = connect().await;

    let create = tokio::spawn({
        let dp = dp.clone();
        async move { dp.create_datapath("vnet0").await }
    });

    let request = kernel.recv().await;
    assert_eq!(request.ty(), DATAPATH_ID);
    assert!(request.flags().contains(NlFlags::ECHO | NlFlags::ACK));
    let (header, dp_ifindex, attrs) = parse(&request);
    assert_eq!(header.cmd, cmd::NEW);
    assert_eq!(header.version, 2);
    assert_eq!(dp_ifindex, 0);
    assert_eq!(attrs.string(attr::NAME).unwrap(), "vnet0");
    assert_eq!(attrs.u32(attr::UPCALL_PID).unwrap(), PORT);

    kernel.send(created(&request, DP_INDEX, |w| {
        w.put_str(attr::NAME, "vnet0");
    }));

    let datapath = create.await.unwrap().unwrap();
    assert_eq!(datapath.index, DP_INDEX);
    assert_eq!(datapath.name, "vnet0");
    assert_eq!(datapath.stats, None);
}

#[tokio::test]
async fn enumerate_datapaths_collects_the_dump() {
    let (dp, _notifications, mut kernel) = connect().await;

    let dump = tokio::spawn({
        let dp = dp.clone();
        async move { dp.enumerate_datapaths().await }
    });

    let request = kernel.recv().await;
    assert!(request.flags().contains(NlFlags::DUMP));

    let stats = DatapathStats { hit: 100, missed: 3, lost: 0, flows: 7 };
    kernel.send([
        reply(&request, 1, NlFlags::MULTI, |w| {
            w.put_str(attr::NAME, "a").put(attr::STATS, &stats.to_bytes());
        }),
        reply(&request, 2, NlFlags::MULTI, |w| {
            w.put_str(attr::NAME, "b").put_u32(attr::USER_FEATURES, 1);
        }),
    ]);
    kernel.send([done(&request)]);

    let datapaths = dump.await.unwrap().unwrap();
    assert_eq!(datapaths.len(), 2);
    assert_eq!(datapaths[0].name, "a");
    assert_eq!(datapaths[0].stats, Some(stats));
    assert_eq!(datapaths[1].index, 2);
    assert_eq!(datapaths[1].user_features, Some(1));
}

#[tokio::test]
async fn unknown_datapath_is_not_found() {
    let (dp, _notifications, mut kernel) = connect().await;
    let ops: &dyn DatapathOps = &dp;

    let lookup = async {
        let request = kernel.recv().await;
        kernel.send([error(&request, Errno::ENODEV)]);
    };
    let (result, ()) = tokio::join!(ops.datapath("nope"), lookup);

    let err = result.unwrap_err();
    assert!(err.is_not_found());
    assert!(matches!(err, DatapathError::DatapathNotFound(name) if name == "nope"));
}

#[tokio::test]
async fn other_kernel_errors_pass_through() {
    let (dp, _notifications, mut kernel) = connect().await;

    let lookup = async {
        let request = kernel.recv().await;
        kernel.send([error(&request, Errno::EPERM)]);
    };
    let (result, ()) = tokio::join!(dp.get_datapath("vnet0"), lookup);

    let err = result.unwrap_err();
    assert!(!err.is_not_found());
    assert!(matches!(
        err,
        DatapathError::Connection(vnet_netlink::ConnectionError::Protocol(errno)) if errno == Errno::EPERM
    ));
}
