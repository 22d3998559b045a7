use std::fmt;

use bytes::Bytes;
use vnet_wire::{AttrError, AttrWriter, Attributes};

use crate::{datapath::u64_words, family::OvsMessage};

pub mod attr {
    pub const PORT_NO: u16 = 1;
    pub const TYPE: u16 = 2;
    pub const NAME: u16 = 3;
    pub const OPTIONS: u16 = 4;
    pub const UPCALL_PID: u16 = 5;
    pub const STATS: u16 = 6;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortType {
    NetDev,
    Internal,
    Gre,
    Vxlan,
    Geneve,
    Other(u32),
}

impl PortType {
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::NetDev,
            2 => Self::Internal,
            3 => Self::Gre,
            4 => Self::Vxlan,
            5 => Self::Geneve,
            other => Self::Other(other),
        }
    }

    pub const fn raw(&self) -> u32 {
        match self {
            Self::NetDev => 1,
            Self::Internal => 2,
            Self::Gre => 3,
            Self::Vxlan => 4,
            Self::Geneve => 5,
            Self::Other(raw) => *raw,
        }
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetDev => f.write_str("netdev"),
            Self::Internal => f.write_str("internal"),
            Self::Gre => f.write_str("gre"),
            Self::Vxlan => f.write_str("vxlan"),
            Self::Geneve => f.write_str("geneve"),
            Self::Other(raw) => write!(f, "type {raw}"),
        }
    }
}

/// Interface counters of a port (`struct ovs_vport_stats`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortStats {
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_errors: u64,
    pub tx_errors: u64,
    pub rx_dropped: u64,
    pub tx_dropped: u64,
}

impl PortStats {
    fn decode(attrs: &Attributes) -> Result<Option<Self>, AttrError> {
        let Some(raw) = attrs.get(attr::STATS) else {
            return Ok(None);
        };

        let [rx_packets, tx_packets, rx_bytes, tx_bytes, rx_errors, tx_errors, rx_dropped, tx_dropped] =
            u64_words::<8>(attr::STATS, raw.value())?;
        Ok(Some(Self {
            rx_packets,
            tx_packets,
            rx_bytes,
            tx_bytes,
            rx_errors,
            tx_errors,
            rx_dropped,
            tx_dropped,
        }))
    }
}

/// A port of a datapath.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub datapath: i32,
    pub number: u32,
    pub port_type: PortType,
    pub name: String,
    /// The netlink port misses on this port are sent to.
    pub upcall_pid: Option<u32>,
    pub stats: Option<PortStats>,
    /// Type-specific options, such as the destination port of a tunnel.
    pub options: Option<Bytes>,
}

impl Port {
    pub(crate) fn decode(msg: &OvsMessage) -> Result<Self, AttrError> {
        let attrs = &msg.attrs;
        Ok(Self {
            datapath: msg.dp_ifindex,
            number: attrs.u32(attr::PORT_NO)?,
            port_type: PortType::from_raw(attrs.u32(attr::TYPE)?),
            name: attrs.string(attr::NAME)?.to_owned(),
            upcall_pid: attrs.opt_u32(attr::UPCALL_PID)?,
            stats: PortStats::decode(attrs)?,
            options: attrs.get(attr::OPTIONS).map(|a| a.value().clone()),
        })
    }
}

/// What to create with [`OvsDatapathConnection::create_port`](crate::OvsDatapathConnection::create_port).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    pub name: String,
    pub port_type: PortType,
    /// Requested port number; the datapath picks one when unset.
    pub number: Option<u32>,
    /// Pre-encoded `OVS_TUNNEL_ATTR_*` options.
    pub options: Option<Bytes>,
}

impl PortSpec {
    pub fn new(name: impl Into<String>, port_type: PortType) -> Self {
        Self { name: name.into(), port_type, number: None, options: None }
    }

    pub fn netdev(name: impl Into<String>) -> Self {
        Self::new(name, PortType::NetDev)
    }

    pub fn internal(name: impl Into<String>) -> Self {
        Self::new(name, PortType::Internal)
    }

    pub fn with_number(mut self, number: u32) -> Self {
        self.number = Some(number);
        self
    }

    pub fn with_options(mut self, options: Bytes) -> Self {
        self.options = Some(options);
        self
    }

    pub(crate) fn encode(&self, upcall_pid: u32, w: &mut AttrWriter<'_>) {
        w.put_str(attr::NAME, &self.name)
            .put_u32(attr::TYPE, self.port_type.raw())
            .put_u32(attr::UPCALL_PID, upcall_pid);
        if let Some(number) = self.number {
            w.put_u32(attr::PORT_NO, number);
        }
        if let Some(options) = &self.options {
            w.put(attr::OPTIONS, options);
        }
    }
}
