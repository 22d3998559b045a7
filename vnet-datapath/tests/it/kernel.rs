//! A scripted Open vSwitch kernel module on the far side of an in-memory transport.

use bytes::BytesMut;
use rustc_hash::FxHashMap;
use tokio_util::codec::{Decoder, Encoder};
use vnet_datapath::{family, OvsDatapathConnection};
use vnet_netlink::{
    genl::{self, Family},
    Errno, NetlinkConnection, Notifications,
};
use vnet_transport::{pair, MemoryPeer};
use vnet_wire::{AttrWriter, Attributes, Body, Codec, GenlHeader, Message, NlFlags};

pub const PORT: u32 = 4242;
pub const DATAPATH_ID: u16 = 0x1a;
pub const VPORT_ID: u16 = 0x1b;
pub const FLOW_ID: u16 = 0x1c;
pub const PACKET_ID: u16 = 0x1d;
pub const VPORT_GROUP: u32 = 7;
pub const DP_INDEX: i32 = 12;

pub struct Kernel {
    peer: MemoryPeer,
    codec: Codec,
}

impl Kernel {
    pub fn new(peer: MemoryPeer) -> Self {
        Self { peer, codec: Codec::new() }
    }

    pub fn peer(&self) -> &MemoryPeer {
        &self.peer
    }

    pub async fn recv(&mut self) -> Message {
        let datagram = self.peer.recv().await.expect("transport dropped");
        let mut buf = BytesMut::from(&datagram[..]);
        let msg = self.codec.decode(&mut buf).unwrap().expect("empty datagram");
        assert!(buf.is_empty(), "one request per datagram");
        msg
    }

    pub fn send(&mut self, messages: impl IntoIterator<Item = Message>) {
        let mut buf = BytesMut::new();
        for msg in messages {
            self.codec.encode(msg, &mut buf).unwrap();
        }
        assert!(self.peer.send(buf.freeze()));
    }

    /// Answers the four family lookups of `OvsDatapathConnection::initialize`, failing
    /// the ones named in `missing` with `ENOENT`.
    pub async fn answer_families(&mut self, missing: &[&str]) {
        for _ in 0..4 {
            let request = self.recv().await;
            let (_, attrs) = request.attributes(0).unwrap();
            let name = attrs.string(genl::CTRL_ATTR_FAMILY_NAME).unwrap().to_owned();

            if missing.contains(&name.as_str()) {
                self.send([error(&request, Errno::ENOENT)]);
            } else {
                let mut body = Body::new();
                genl::encode_family(&ovs_family(&name), &mut body).unwrap();
                let (header, _) = request.genl_parts().unwrap();
                let mut reply = Message::genl(request.ty(), NlFlags::empty(), header, &body.freeze());
                reply.set_seq(request.seq());
                reply.set_pid(request.pid());
                self.send([reply]);
            }
        }
    }
}

pub fn ovs_family(name: &str) -> Family {
    let (id, version) = match name {
        family::DATAPATH_FAMILY => (DATAPATH_ID, 2),
        family::VPORT_FAMILY => (VPORT_ID, 1),
        family::FLOW_FAMILY => (FLOW_ID, 1),
        family::PACKET_FAMILY => (PACKET_ID, 1),
        other => panic!("unexpected family {other}"),
    };

    let mut mcast_groups = FxHashMap::default();
    if name == family::VPORT_FAMILY {
        mcast_groups.insert(family::VPORT_MCGROUP.to_owned(), VPORT_GROUP);
    }

    Family { name: name.to_owned(), id, version, hdr_size: 4, max_attr: 8, mcast_groups }
}

/// Connects to a fresh fake kernel and runs family resolution against it.
pub async fn connect() -> (OvsDatapathConnection, Notifications, Kernel) {
    let _ = tracing_subscriber::fmt::try_init();

    let (transport, peer) = pair(PORT);
    let (conn, notifications) = NetlinkConnection::spawn(transport);
    let mut kernel = Kernel::new(peer);

    let init = tokio::spawn(OvsDatapathConnection::initialize(conn));
    kernel.answer_families(&[]).await;
    (init.await.unwrap().unwrap(), notifications, kernel)
}

/// Splits an OVS request into its generic header, datapath index and attributes.
pub fn parse(request: &Message) -> (GenlHeader, i32, Attributes) {
    let (header, body) = request.genl_parts().unwrap();
    let dp_ifindex = i32::from_ne_bytes(body[..4].try_into().unwrap());
    (header, dp_ifindex, Attributes::parse(body.slice(4..)).unwrap())
}

/// An OVS reply to `request`.
pub fn reply(
    request: &Message,
    dp_ifindex: i32,
    flags: NlFlags,
    attrs: impl FnOnce(&mut AttrWriter<'_>),
) -> Message {
    let (header, _) = request.genl_parts().unwrap();
    let mut msg =
        family::encode_message(request.ty(), header.cmd, header.version, dp_ifindex, attrs).unwrap();
    msg.set_flags(flags);
    msg.set_seq(request.seq());
    msg.set_pid(request.pid());
    msg
}

/// What the kernel sends back for a NEW command: the created object is only
/// unicast to the caller when the request asked for an echo.
pub fn created(
    request: &Message,
    dp_ifindex: i32,
    attrs: impl FnOnce(&mut AttrWriter<'_>),
) -> Vec<Message> {
    if request.flags().contains(NlFlags::ECHO) {
        vec![reply(request, dp_ifindex, NlFlags::empty(), attrs), ack(request)]
    } else {
        vec![ack(request)]
    }
}

/// An unsolicited OVS message.
pub fn notification(
    family_id: u16,
    command: u8,
    dp_ifindex: i32,
    attrs: impl FnOnce(&mut AttrWriter<'_>),
) -> Message {
    family::encode_message(family_id, command, 1, dp_ifindex, attrs).unwrap()
}

pub fn ack(request: &Message) -> Message {
    Message::error(request.header(), 0)
}

pub fn error(request: &Message, errno: Errno) -> Message {
    Message::error(request.header(), -errno.raw())
}

pub fn done(request: &Message) -> Message {
    Message::done(request.seq(), request.pid())
}
