//! Partial flow keys.
//!
//! A [`WildcardMatch`] sets some [`Field`]s and leaves the rest wildcarded. Matches are
//! used as map keys, and callers look up entries stored under a full match with a
//! projection of it. To make that work a projection remembers the fingerprint of the
//! match it was cut from and hashes as that fingerprint, and equality between a
//! projection and any other match only compares the fields the projection sets.
//!
//! This makes `==` lenient in one direction. A projection equals every match that sets at
//! least its fields with the same values, not just its source, while only its source is
//! guaranteed to hash alike. Lookups with a projection are therefore only meaningful in
//! maps whose keys are full matches the projection could have been cut from.

use std::{
    hash::{Hash, Hasher},
    net::Ipv4Addr,
};

use rustc_hash::FxHasher;
use thiserror::Error;
use vnet_packet::{ipv4::FragmentType, protocol::ip_proto, Ethernet, MacAddr};

use crate::{
    field::{Field, FieldSet},
    flow_match::FlowMatch,
    key::{FlowKey, Ipv4Key, TunnelKey, VLAN_TAG_PRESENT},
};

const MAX_VLAN_ID: u16 = 0x0fff;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("{value} is out of range for {field:?}")]
    OutOfRange { field: Field, value: u64 },
}

macro_rules! wildcard_fields {
    ($($name:ident: $ty:ty => $field:ident,)*) => {
        #[derive(Debug, Clone, Default)]
        pub struct WildcardMatch {
            $($name: Option<$ty>,)*
            /// Fingerprint of the match this one was projected from.
            origin: Option<u64>,
        }

        impl WildcardMatch {
            $(
                #[inline]
                pub fn $name(&self) -> Option<$ty> {
                    self.$name
                }
            )*

            /// The fields this match sets.
            pub fn used(&self) -> FieldSet {
                let mut used = FieldSet::empty();
                $(
                    if self.$name.is_some() {
                        used.insert(Field::$field.into());
                    }
                )*
                used
            }

            /// Wildcards `field` again.
            pub fn unset(&mut self, field: Field) -> &mut Self {
                match field {
                    $(Field::$field => self.$name = None,)*
                }
                self.origin = None;
                self
            }

            fn copy_field(&mut self, source: &Self, field: Field) {
                match field {
                    $(Field::$field => self.$name = source.$name,)*
                }
            }

            fn same_value(&self, other: &Self, field: Field) -> bool {
                match field {
                    $(Field::$field => self.$name == other.$name,)*
                }
            }

            fn same_fields(&self, other: &Self) -> bool {
                true $(&& self.$name == other.$name)*
            }

            /// Hash of the used fields and their values.
            fn fingerprint(&self) -> u64 {
                let mut hasher = FxHasher::default();
                $(self.$name.hash(&mut hasher);)*
                hasher.finish()
            }
        }
    };
}

wildcard_fields! {
    input_port: u32 => InputPort,
    tunnel_id: u64 => TunnelId,
    tunnel_source: Ipv4Addr => TunnelSource,
    tunnel_destination: Ipv4Addr => TunnelDestination,
    ethernet_source: MacAddr => EthernetSource,
    ethernet_destination: MacAddr => EthernetDestination,
    ether_type: u16 => EtherType,
    vlan_id: u16 => VlanId,
    network_source: Ipv4Addr => NetworkSource,
    network_destination: Ipv4Addr => NetworkDestination,
    network_protocol: u8 => NetworkProtocol,
    network_ttl: u8 => NetworkTtl,
    network_tos: u8 => NetworkTos,
    fragment_type: FragmentType => FragmentType,
    transport_source: u16 => TransportSource,
    transport_destination: u16 => TransportDestination,
}

impl WildcardMatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this match was produced by [`WildcardMatch::project`] and not modified since.
    pub fn is_projection(&self) -> bool {
        self.origin.is_some()
    }

    /// A match setting only those of `fields` that this match sets, with the same values.
    /// Fields this match leaves wildcarded stay wildcarded in the projection. A projection
    /// of a projection remembers the original source.
    pub fn project(&self, fields: impl Into<FieldSet>) -> Self {
        let origin = self.origin.unwrap_or_else(|| self.fingerprint());
        let mut projection = Self { origin: Some(origin), ..Self::default() };
        for field in fields.into().intersection(self.used()).fields() {
            projection.copy_field(self, field);
        }
        projection
    }

    /// Whether every field this match sets is set to the same value in `flow`.
    pub fn matches(&self, flow: &Self) -> bool {
        let used = self.used();
        used.is_subset(&flow.used()) && used.fields().all(|field| self.same_value(flow, field))
    }

    fn agrees_on(&self, other: &Self, fields: FieldSet) -> bool {
        fields.fields().all(|field| self.same_value(other, field))
    }

    pub fn set_input_port(&mut self, port: u32) -> &mut Self {
        self.input_port = Some(port);
        self.touched()
    }

    pub fn set_tunnel_id(&mut self, id: u64) -> &mut Self {
        self.tunnel_id = Some(id);
        self.touched()
    }

    pub fn set_tunnel_source(&mut self, addr: Ipv4Addr) -> &mut Self {
        self.tunnel_source = Some(addr);
        self.touched()
    }

    pub fn set_tunnel_destination(&mut self, addr: Ipv4Addr) -> &mut Self {
        self.tunnel_destination = Some(addr);
        self.touched()
    }

    pub fn set_ethernet_source(&mut self, addr: MacAddr) -> &mut Self {
        self.ethernet_source = Some(addr);
        self.touched()
    }

    pub fn set_ethernet_destination(&mut self, addr: MacAddr) -> &mut Self {
        self.ethernet_destination = Some(addr);
        self.touched()
    }

    pub fn set_ether_type(&mut self, ty: u16) -> &mut Self {
        self.ether_type = Some(ty);
        self.touched()
    }

    /// Rejects ids that don't fit in 12 bits.
    pub fn set_vlan_id(&mut self, id: u16) -> Result<&mut Self, FieldError> {
        if id > MAX_VLAN_ID {
            return Err(FieldError::OutOfRange { field: Field::VlanId, value: id.into() });
        }
        self.vlan_id = Some(id);
        Ok(self.touched())
    }

    pub fn set_network_source(&mut self, addr: Ipv4Addr) -> &mut Self {
        self.network_source = Some(addr);
        self.touched()
    }

    pub fn set_network_destination(&mut self, addr: Ipv4Addr) -> &mut Self {
        self.network_destination = Some(addr);
        self.touched()
    }

    pub fn set_network_protocol(&mut self, protocol: u8) -> &mut Self {
        self.network_protocol = Some(protocol);
        self.touched()
    }

    pub fn set_network_ttl(&mut self, ttl: u8) -> &mut Self {
        self.network_ttl = Some(ttl);
        self.touched()
    }

    pub fn set_network_tos(&mut self, tos: u8) -> &mut Self {
        self.network_tos = Some(tos);
        self.touched()
    }

    pub fn set_fragment_type(&mut self, ty: FragmentType) -> &mut Self {
        self.fragment_type = Some(ty);
        self.touched()
    }

    /// Rejects values outside the 16-bit port range.
    pub fn set_transport_source(&mut self, port: u32) -> Result<&mut Self, FieldError> {
        self.transport_source = Some(port_in_range(Field::TransportSource, port)?);
        Ok(self.touched())
    }

    /// Rejects values outside the 16-bit port range.
    pub fn set_transport_destination(&mut self, port: u32) -> Result<&mut Self, FieldError> {
        self.transport_destination = Some(port_in_range(Field::TransportDestination, port)?);
        Ok(self.touched())
    }

    fn touched(&mut self) -> &mut Self {
        self.origin = None;
        self
    }

    /// Sets every field `flow_match` carries. ICMP type and code land in the transport
    /// source and destination, and an ARP key fills the network fields.
    pub fn from_flow_match(flow_match: &FlowMatch) -> Self {
        let mut m = Self::new();
        for key in flow_match.iter() {
            match key {
                FlowKey::InPort(port) => m.input_port = Some(*port),
                FlowKey::Ethernet { source, destination } => {
                    m.ethernet_source = Some(*source);
                    m.ethernet_destination = Some(*destination);
                }
                FlowKey::EtherType(ty) => m.ether_type = Some(*ty),
                FlowKey::Vlan(tci) if tci & VLAN_TAG_PRESENT != 0 => {
                    m.vlan_id = Some(tci & MAX_VLAN_ID);
                }
                FlowKey::Ipv4(ip) => {
                    m.network_source = Some(ip.source);
                    m.network_destination = Some(ip.destination);
                    m.network_protocol = Some(ip.protocol);
                    m.network_tos = Some(ip.tos);
                    m.network_ttl = Some(ip.ttl);
                    m.fragment_type = Some(ip.fragment);
                }
                FlowKey::Tcp { source, destination } | FlowKey::Udp { source, destination } => {
                    m.transport_source = Some(*source);
                    m.transport_destination = Some(*destination);
                }
                FlowKey::Icmp { icmp_type, code } => {
                    m.transport_source = Some((*icmp_type).into());
                    m.transport_destination = Some((*code).into());
                }
                FlowKey::Arp(arp) => {
                    m.network_source = Some(arp.sender_ip);
                    m.network_destination = Some(arp.target_ip);
                    m.network_protocol = Some(arp.operation as u8);
                }
                FlowKey::Tunnel(tunnel) => {
                    m.tunnel_id = tunnel.id;
                    m.tunnel_source = tunnel.source;
                    m.tunnel_destination = tunnel.destination;
                }
                _ => {}
            }
        }
        m
    }

    pub fn from_ethernet(frame: &Ethernet, in_port: u32) -> Self {
        Self::from_flow_match(&FlowMatch::from_ethernet(frame, in_port))
    }

    /// The exact keys for the fields this match sets. Keys that bundle several fields are
    /// emitted when any of them is set, with the unset ones written as zero.
    pub fn to_flow_match(&self) -> FlowMatch {
        let mut keys = Vec::new();

        if let Some(port) = self.input_port {
            keys.push(FlowKey::InPort(port));
        }
        if self.tunnel_id.is_some() || self.tunnel_source.is_some() || self.tunnel_destination.is_some() {
            keys.push(FlowKey::Tunnel(TunnelKey {
                id: self.tunnel_id,
                source: self.tunnel_source,
                destination: self.tunnel_destination,
                ..TunnelKey::default()
            }));
        }
        if self.ethernet_source.is_some() || self.ethernet_destination.is_some() {
            keys.push(FlowKey::Ethernet {
                source: self.ethernet_source.unwrap_or_default(),
                destination: self.ethernet_destination.unwrap_or_default(),
            });
        }
        if let Some(id) = self.vlan_id {
            keys.push(FlowKey::Vlan(VLAN_TAG_PRESENT | id));
        }
        if let Some(ty) = self.ether_type {
            keys.push(FlowKey::EtherType(ty));
        }

        let l3 = FieldSet::from([
            Field::NetworkSource,
            Field::NetworkDestination,
            Field::NetworkProtocol,
            Field::NetworkTtl,
            Field::NetworkTos,
            Field::FragmentType,
        ]);
        if !l3.intersection(self.used()).is_empty() {
            keys.push(FlowKey::Ipv4(Ipv4Key {
                source: self.network_source.unwrap_or(Ipv4Addr::UNSPECIFIED),
                destination: self.network_destination.unwrap_or(Ipv4Addr::UNSPECIFIED),
                protocol: self.network_protocol.unwrap_or_default(),
                tos: self.network_tos.unwrap_or_default(),
                ttl: self.network_ttl.unwrap_or_default(),
                fragment: self.fragment_type.unwrap_or_default(),
            }));
        }

        if self.transport_source.is_some() || self.transport_destination.is_some() {
            let source = self.transport_source.unwrap_or_default();
            let destination = self.transport_destination.unwrap_or_default();
            match self.network_protocol {
                Some(ip_proto::TCP) => keys.push(FlowKey::Tcp { source, destination }),
                Some(ip_proto::UDP) => keys.push(FlowKey::Udp { source, destination }),
                Some(ip_proto::ICMP) => {
                    keys.push(FlowKey::Icmp { icmp_type: source as u8, code: destination as u8 })
                }
                _ => {}
            }
        }

        FlowMatch::from(keys)
    }
}

fn port_in_range(field: Field, port: u32) -> Result<u16, FieldError> {
    u16::try_from(port).map_err(|_| FieldError::OutOfRange { field, value: port.into() })
}

impl PartialEq for WildcardMatch {
    fn eq(&self, other: &Self) -> bool {
        match (self.origin, other.origin) {
            (None, None) => self.same_fields(other),
            (Some(_), None) => {
                let used = self.used();
                used.is_subset(&other.used()) && self.agrees_on(other, used)
            }
            (None, Some(_)) => other == self,
            (Some(a), Some(b)) => {
                let (mine, theirs) = (self.used(), other.used());
                a == b
                    && (mine.is_subset(&theirs) || theirs.is_subset(&mine))
                    && self.agrees_on(other, mine.intersection(theirs))
            }
        }
    }
}

/// Not transitive across projections; see the module docs.
impl Eq for WildcardMatch {}

impl Hash for WildcardMatch {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.origin.unwrap_or_else(|| self.fingerprint()));
    }
}
