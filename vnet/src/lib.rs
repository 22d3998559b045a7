//! A userspace agent for a kernel virtual switch datapath.
//!
//! - [`wire`]: netlink message framing and attribute codecs.
//! - [`transport`]: kernel and in-memory netlink sockets.
//! - [`netlink`]: the request/response multiplexer and generic netlink family resolution.
//! - [`packet`]: Ethernet, ARP, IPv4, TCP, UDP, ICMP, DHCP and LLDP codecs.
//! - [`flow`]: flow keys, exact and wildcard matches, actions and the per-packet simulation
//!   context.
//! - [`datapath`]: Open vSwitch datapath, port, flow and packet operations.
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub use vnet_common as common;
pub use vnet_datapath as datapath;
pub use vnet_flow as flow;
pub use vnet_netlink as netlink;
pub use vnet_packet as packet;
pub use vnet_transport as transport;
pub use vnet_wire as wire;

pub use vnet_datapath::{DatapathError, DatapathEvent, OvsDatapathConnection};
pub use vnet_flow::{FlowMatch, PacketContext, WildcardMatch};
pub use vnet_netlink::{ConnectionError, ConnectionOptions, NetlinkConnection};
pub use vnet_transport::NetlinkSocket;
