//! The four generic netlink families of the Open vSwitch kernel module.
//!
//! Every OVS message carries a `struct ovs_header` between the generic netlink header and
//! the attributes: the interface index of the datapath the message is about, or zero.

use bytes::Bytes;
use vnet_netlink::{genl::Family, Request};
use vnet_wire::{AttrError, AttrWriter, Attributes, Body, GenlHeader, Message, NlFlags};

use crate::DatapathError;

pub const DATAPATH_FAMILY: &str = "ovs_datapath";
pub const VPORT_FAMILY: &str = "ovs_vport";
pub const FLOW_FAMILY: &str = "ovs_flow";
pub const PACKET_FAMILY: &str = "ovs_packet";

pub const DATAPATH_VERSION: u8 = 2;
pub const VPORT_VERSION: u8 = 1;
pub const FLOW_VERSION: u8 = 1;
pub const PACKET_VERSION: u8 = 1;

/// The multicast group the vport family announces port changes on.
pub const VPORT_MCGROUP: &str = "ovs_vport";

/// Size of `struct ovs_header`.
pub const OVS_HEADER_LEN: usize = 4;

/// Commands shared by the datapath, vport and flow families.
pub mod cmd {
    pub const NEW: u8 = 1;
    pub const DEL: u8 = 2;
    pub const GET: u8 = 3;
    pub const SET: u8 = 4;
}

/// The resolved OVS families.
#[derive(Debug, Clone)]
pub struct Families {
    pub datapath: Family,
    pub vport: Family,
    pub flow: Family,
    pub packet: Family,
}

/// Which OVS family a message id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    Datapath,
    Vport,
    Flow,
    Packet,
}

impl Families {
    pub(crate) fn kind(&self, id: u16) -> Option<Kind> {
        [
            (self.datapath.id, Kind::Datapath),
            (self.vport.id, Kind::Vport),
            (self.flow.id, Kind::Flow),
            (self.packet.id, Kind::Packet),
        ]
        .into_iter()
        .find_map(|(family, kind)| (family == id).then_some(kind))
    }

    pub(crate) fn request(
        &self,
        kind: Kind,
        command: u8,
        dp_ifindex: i32,
        attrs: impl FnOnce(&mut AttrWriter<'_>),
    ) -> Result<Request, AttrError> {
        let (family, version) = match kind {
            Kind::Datapath => (self.datapath.id, DATAPATH_VERSION),
            Kind::Vport => (self.vport.id, VPORT_VERSION),
            Kind::Flow => (self.flow.id, FLOW_VERSION),
            Kind::Packet => (self.packet.id, PACKET_VERSION),
        };

        let mut body = Body::with_user_header(&dp_ifindex.to_ne_bytes());
        body.put_attrs(attrs)?;
        Ok(Request::new(family, command, version).with_body(body.freeze()))
    }
}

/// A decoded OVS message: generic header, datapath index and attributes.
#[derive(Debug)]
pub(crate) struct OvsMessage {
    pub(crate) header: GenlHeader,
    pub(crate) dp_ifindex: i32,
    pub(crate) attrs: Attributes,
}

impl OvsMessage {
    pub(crate) fn parse(msg: &Message) -> Result<Self, DatapathError> {
        let (header, body) = msg.genl_parts()?;
        if body.len() < OVS_HEADER_LEN {
            return Err(vnet_wire::Error::Truncated {
                what: "ovs header",
                needed: OVS_HEADER_LEN,
                available: body.len(),
            }
            .into());
        }

        let dp_ifindex = i32::from_ne_bytes([body[0], body[1], body[2], body[3]]);
        let attrs = Attributes::parse(body.slice(OVS_HEADER_LEN..))?;
        Ok(Self { header, dp_ifindex, attrs })
    }
}

/// Encodes an OVS message body. Useful for fake kernels.
pub fn encode_message(
    family: u16,
    command: u8,
    version: u8,
    dp_ifindex: i32,
    attrs: impl FnOnce(&mut AttrWriter<'_>),
) -> Result<Message, AttrError> {
    let mut body = Body::with_user_header(&dp_ifindex.to_ne_bytes());
    body.put_attrs(attrs)?;
    let body: Bytes = body.freeze();
    Ok(Message::genl(family, NlFlags::empty(), GenlHeader::new(command, version), &body))
}
