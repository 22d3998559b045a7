//! Open vSwitch kernel datapath operations.
//!
//! [`OvsDatapathConnection`] resolves the OVS generic netlink families once and then
//! issues typed requests for datapaths, ports, flows and packets over a shared
//! [`NetlinkConnection`](vnet_netlink::NetlinkConnection). Unsolicited messages (upcalls
//! and port changes) are decoded into [`DatapathEvent`]s.

use thiserror::Error;
use vnet_netlink::ConnectionError;
use vnet_packet::MalformedPacket;
use vnet_wire::AttrError;

mod connection;
pub mod datapath;
mod event;
pub mod family;
mod ops;
pub mod packet;
pub mod port;

pub use connection::OvsDatapathConnection;
pub use datapath::{Datapath, DatapathStats};
pub use event::{DatapathEvent, DatapathEvents};
pub use family::Families;
pub use ops::DatapathOps;
pub use packet::{Upcall, UpcallKind};
pub use port::{Port, PortSpec, PortStats, PortType};

#[derive(Debug, Error)]
pub enum DatapathError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("generic netlink family {0} is not registered")]
    MissingFamily(&'static str),
    #[error("multicast group {0} is not registered")]
    MissingGroup(&'static str),
    #[error(transparent)]
    Wire(#[from] vnet_wire::Error),
    #[error(transparent)]
    Attr(#[from] AttrError),
    #[error(transparent)]
    Packet(#[from] MalformedPacket),
    #[error("datapath {0} not found")]
    DatapathNotFound(String),
    #[error("port {0} not found")]
    PortNotFound(String),
    #[error("flow not found")]
    FlowNotFound,
    #[error("unexpected reply: {0}")]
    UnexpectedReply(&'static str),
}

impl DatapathError {
    /// Whether the object a request named doesn't exist, as opposed to the request
    /// failing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::DatapathNotFound(_) | Self::PortNotFound(_) | Self::FlowNotFound)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Connection(ConnectionError::Timeout))
    }
}
