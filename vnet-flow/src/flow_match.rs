use derive_more::{Deref, DerefMut, From};
use tracing::trace;
use vnet_packet::{ipv4::FragmentType, Ethernet, EthernetPayload, Ipv4Payload, MacAddr};
use vnet_wire::{AttrError, AttrWriter, Attributes};

use crate::key::{ArpKey, FlowKey, Ipv4Key, VLAN_TAG_PRESENT};

/// An exact flow key: the ordered list of keys the datapath extracted from a packet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, From, Deref, DerefMut)]
pub struct FlowMatch(Vec<FlowKey>);

impl FlowMatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: FlowKey) -> Self {
        self.0.push(key);
        self
    }

    pub fn into_keys(self) -> Vec<FlowKey> {
        self.0
    }

    /// Builds the key the datapath would extract from `frame` received on `in_port`.
    /// Non-initial fragments carry no transport key since they have no transport header.
    pub fn from_ethernet(frame: &Ethernet, in_port: u32) -> Self {
        let mut keys = vec![
            FlowKey::InPort(in_port),
            FlowKey::Ethernet { source: frame.source, destination: frame.destination },
        ];

        if let Some(tag) = frame.vlan {
            keys.push(FlowKey::Vlan(tag.tci() | VLAN_TAG_PRESENT));
        }
        keys.push(FlowKey::EtherType(frame.ether_type));

        match &frame.payload {
            EthernetPayload::Ipv4(ip) => {
                let fragment = ip.fragment_type();
                keys.push(FlowKey::Ipv4(Ipv4Key {
                    source: ip.source,
                    destination: ip.destination,
                    protocol: ip.protocol,
                    tos: ip.tos,
                    ttl: ip.ttl,
                    fragment,
                }));

                if fragment != FragmentType::Later {
                    match &ip.payload {
                        Ipv4Payload::Tcp(tcp) => keys.push(FlowKey::Tcp {
                            source: tcp.source_port,
                            destination: tcp.destination_port,
                        }),
                        Ipv4Payload::Udp(udp) => keys.push(FlowKey::Udp {
                            source: udp.source_port,
                            destination: udp.destination_port,
                        }),
                        Ipv4Payload::Icmp(icmp) => keys
                            .push(FlowKey::Icmp { icmp_type: icmp.icmp_type, code: icmp.code }),
                        Ipv4Payload::Data(_) => {}
                    }
                }
            }
            EthernetPayload::Arp(arp) => {
                if let (Some(sender_ip), Some(target_ip), Some(sender_mac), Some(target_mac)) =
                    (arp.sender_ip(), arp.target_ip(), arp.sender_mac(), arp.target_mac())
                {
                    keys.push(FlowKey::Arp(ArpKey {
                        sender_ip,
                        target_ip,
                        operation: arp.operation,
                        sender_mac,
                        target_mac,
                    }));
                }
            }
            _ => {}
        }

        Self(keys)
    }

    pub fn in_port(&self) -> Option<u32> {
        self.iter().find_map(|key| match key {
            FlowKey::InPort(port) => Some(*port),
            _ => None,
        })
    }

    pub fn ethernet_source(&self) -> Option<MacAddr> {
        self.iter().find_map(|key| match key {
            FlowKey::Ethernet { source, .. } => Some(*source),
            _ => None,
        })
    }

    /// Decodes a nested `OVS_FLOW_ATTR_KEY` (or `OVS_PACKET_ATTR_KEY`) stream.
    pub fn decode(attrs: &Attributes) -> Result<Self, AttrError> {
        let keys = attrs.iter().map(FlowKey::decode).collect::<Result<Vec<_>, _>>()?;
        trace!(keys = keys.len(), "decoded flow match");
        Ok(Self(keys))
    }

    pub fn encode(&self, w: &mut AttrWriter<'_>) {
        for key in self.iter() {
            key.encode(w);
        }
    }
}

impl FromIterator<FlowKey> for FlowMatch {
    fn from_iter<I: IntoIterator<Item = FlowKey>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
