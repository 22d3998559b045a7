use rustc_hash::FxHashMap;
use vnet_netlink::{
    genl::{self, Family},
    ConnectionOptions, Errno, NetlinkConnection,
};
use vnet_transport::pair;
use vnet_wire::{msg_type, Body, Message, NlFlags};

use crate::kernel::{reply, Kernel, PORT};

fn ovs_vport() -> Family {
    let mut mcast_groups = FxHashMap::default();
    mcast_groups.insert("ovs_vport".to_owned(), 9);

    Family {
        name: "ovs_vport".to_owned(),
        id: 0x1d,
        version: 1,
        hdr_size: 4,
        max_attr: 9,
        mcast_groups,
    }
}

#[tokio::test]
async fn resolves_family_with_groups() {
    let (transport, peer) = pair(PORT);
    let (conn, _notifications) = NetlinkConnection::with_options(transport, ConnectionOptions::default());
    let mut kernel = Kernel::new(peer);

    let lookup = tokio::spawn({
        let conn = conn.clone();
        async move { genl::resolve_family(&conn, "ovs_vport").await }
    });

    let request = kernel.recv().await;
    assert_eq!(request.ty(), msg_type::GENL_ID_CTRL);
    let (header, attrs) = request.attributes(0).unwrap();
    assert_eq!(header.cmd, genl::CTRL_CMD_GETFAMILY);
    assert_eq!(attrs.string(genl::CTRL_ATTR_FAMILY_NAME).unwrap(), "ovs_vport");

    let mut body = Body::new();
    genl::encode_family(&ovs_vport(), &mut body).unwrap();
    kernel.send([reply(&request, NlFlags::empty(), body.freeze())]);

    let family = lookup.await.unwrap().unwrap();
    assert_eq!(family, ovs_vport());
    assert_eq!(family.mcast_group("ovs_vport"), Some(9));
    assert_eq!(family.mcast_group("nope"), None);
}

#[tokio::test]
async fn unknown_family_is_not_found() {
    let (transport, peer) = pair(PORT);
    let (conn, _notifications) = NetlinkConnection::spawn(transport);
    let mut kernel = Kernel::new(peer);

    let lookup = tokio::spawn({
        let conn = conn.clone();
        async move { genl::resolve_family(&conn, "ovs_flow").await }
    });

    let request = kernel.recv().await;
    kernel.send([Message::error(request.header(), -2)]);

    let err = lookup.await.unwrap().unwrap_err();
    assert_eq!(err.errno(), Some(Errno::ENOENT));
}
