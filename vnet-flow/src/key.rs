//! Exact flow keys as the datapath reports and accepts them (`OVS_KEY_ATTR_*`).

use std::net::Ipv4Addr;

use bytes::{BufMut, Bytes, BytesMut};
use vnet_packet::{ipv4::FragmentType, MacAddr};
use vnet_wire::{Attr, AttrError, AttrWriter};

pub mod attr {
    pub const ENCAP: u16 = 1;
    pub const PRIORITY: u16 = 2;
    pub const IN_PORT: u16 = 3;
    pub const ETHERNET: u16 = 4;
    pub const VLAN: u16 = 5;
    pub const ETHERTYPE: u16 = 6;
    pub const IPV4: u16 = 7;
    pub const TCP: u16 = 9;
    pub const UDP: u16 = 10;
    pub const ICMP: u16 = 11;
    pub const ARP: u16 = 13;
    pub const SKB_MARK: u16 = 15;
    pub const TUNNEL: u16 = 16;
}

pub mod tunnel_attr {
    pub const ID: u16 = 0;
    pub const IPV4_SRC: u16 = 1;
    pub const IPV4_DST: u16 = 2;
    pub const TOS: u16 = 3;
    pub const TTL: u16 = 4;
    pub const DONT_FRAGMENT: u16 = 5;
    pub const CSUM: u16 = 6;
}

/// Set in a VLAN key's TCI when the frame carries a tag.
pub const VLAN_TAG_PRESENT: u16 = 0x1000;

const IPV4_KEY_LEN: usize = 12;
const ARP_KEY_LEN: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Key {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub protocol: u8,
    pub tos: u8,
    pub ttl: u8,
    pub fragment: FragmentType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArpKey {
    pub sender_ip: Ipv4Addr,
    pub target_ip: Ipv4Addr,
    pub operation: u16,
    pub sender_mac: MacAddr,
    pub target_mac: MacAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TunnelKey {
    pub id: Option<u64>,
    pub source: Option<Ipv4Addr>,
    pub destination: Option<Ipv4Addr>,
    pub tos: Option<u8>,
    pub ttl: Option<u8>,
    pub dont_fragment: bool,
    pub checksum: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FlowKey {
    Priority(u32),
    InPort(u32),
    Ethernet { source: MacAddr, destination: MacAddr },
    /// The TCI, with [`VLAN_TAG_PRESENT`] set for tagged frames.
    Vlan(u16),
    EtherType(u16),
    Ipv4(Ipv4Key),
    Tcp { source: u16, destination: u16 },
    Udp { source: u16, destination: u16 },
    Icmp { icmp_type: u8, code: u8 },
    Arp(ArpKey),
    SkbMark(u32),
    Tunnel(TunnelKey),
    /// A key this crate doesn't model, carried through unchanged.
    Unknown { ty: u16, value: Bytes },
}

fn fixed<const N: usize>(attr: &Attr, min: usize) -> Result<&[u8], AttrError> {
    let value = attr.value();
    if value.len() < min {
        return Err(AttrError::InvalidLength { kind: attr.kind(), expected: N, actual: value.len() });
    }
    Ok(&value[..])
}

fn be16(raw: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([raw[offset], raw[offset + 1]])
}

fn ipv4(raw: &[u8], offset: usize) -> Ipv4Addr {
    Ipv4Addr::new(raw[offset], raw[offset + 1], raw[offset + 2], raw[offset + 3])
}

fn mac(raw: &[u8], offset: usize) -> MacAddr {
    MacAddr::new(raw[offset], raw[offset + 1], raw[offset + 2], raw[offset + 3], raw[offset + 4], raw[offset + 5])
}

impl FlowKey {
    /// The `OVS_KEY_ATTR_*` type of this key.
    pub fn attr_type(&self) -> u16 {
        match self {
            Self::Priority(_) => attr::PRIORITY,
            Self::InPort(_) => attr::IN_PORT,
            Self::Ethernet { .. } => attr::ETHERNET,
            Self::Vlan(_) => attr::VLAN,
            Self::EtherType(_) => attr::ETHERTYPE,
            Self::Ipv4(_) => attr::IPV4,
            Self::Tcp { .. } => attr::TCP,
            Self::Udp { .. } => attr::UDP,
            Self::Icmp { .. } => attr::ICMP,
            Self::Arp(_) => attr::ARP,
            Self::SkbMark(_) => attr::SKB_MARK,
            Self::Tunnel(_) => attr::TUNNEL,
            Self::Unknown { ty, .. } => *ty,
        }
    }

    pub fn decode(attr: &Attr) -> Result<Self, AttrError> {
        Ok(match attr.kind() {
            attr::PRIORITY => Self::Priority(attr.as_u32()?),
            attr::IN_PORT => Self::InPort(attr.as_u32()?),
            attr::ETHERNET => {
                let raw = fixed::<12>(attr, 12)?;
                Self::Ethernet { source: mac(raw, 0), destination: mac(raw, 6) }
            }
            attr::VLAN => Self::Vlan(attr.as_be16()?),
            attr::ETHERTYPE => Self::EtherType(attr.as_be16()?),
            attr::IPV4 => {
                let raw = fixed::<IPV4_KEY_LEN>(attr, IPV4_KEY_LEN)?;
                let fragment = FragmentType::from_u8(raw[11])
                    .ok_or(AttrError::InvalidValue { kind: attr.kind(), value: raw[11].into() })?;
                Self::Ipv4(Ipv4Key {
                    source: ipv4(raw, 0),
                    destination: ipv4(raw, 4),
                    protocol: raw[8],
                    tos: raw[9],
                    ttl: raw[10],
                    fragment,
                })
            }
            attr::TCP => {
                let raw = fixed::<4>(attr, 4)?;
                Self::Tcp { source: be16(raw, 0), destination: be16(raw, 2) }
            }
            attr::UDP => {
                let raw = fixed::<4>(attr, 4)?;
                Self::Udp { source: be16(raw, 0), destination: be16(raw, 2) }
            }
            attr::ICMP => {
                let raw = fixed::<2>(attr, 2)?;
                Self::Icmp { icmp_type: raw[0], code: raw[1] }
            }
            attr::ARP => {
                // The kernel struct is 22 bytes of fields padded to 24.
                let raw = fixed::<ARP_KEY_LEN>(attr, 22)?;
                Self::Arp(ArpKey {
                    sender_ip: ipv4(raw, 0),
                    target_ip: ipv4(raw, 4),
                    operation: be16(raw, 8),
                    sender_mac: mac(raw, 10),
                    target_mac: mac(raw, 16),
                })
            }
            attr::SKB_MARK => Self::SkbMark(attr.as_u32()?),
            attr::TUNNEL => {
                let nested = attr.as_nested()?;
                Self::Tunnel(TunnelKey {
                    id: nested.opt_be64(tunnel_attr::ID)?,
                    source: nested.opt_be32(tunnel_attr::IPV4_SRC)?.map(Ipv4Addr::from),
                    destination: nested.opt_be32(tunnel_attr::IPV4_DST)?.map(Ipv4Addr::from),
                    tos: nested.opt_u8(tunnel_attr::TOS)?,
                    ttl: nested.opt_u8(tunnel_attr::TTL)?,
                    dont_fragment: nested.contains(tunnel_attr::DONT_FRAGMENT),
                    checksum: nested.contains(tunnel_attr::CSUM),
                })
            }
            ty => Self::Unknown { ty, value: attr.value().clone() },
        })
    }

    pub fn encode(&self, w: &mut AttrWriter<'_>) {
        match self {
            Self::Priority(priority) => {
                w.put_u32(attr::PRIORITY, *priority);
            }
            Self::InPort(port) => {
                w.put_u32(attr::IN_PORT, *port);
            }
            Self::Ethernet { source, destination } => {
                let mut raw = [0u8; 12];
                raw[..6].copy_from_slice(&source.octets());
                raw[6..].copy_from_slice(&destination.octets());
                w.put(attr::ETHERNET, &raw);
            }
            Self::Vlan(tci) => {
                w.put_be16(attr::VLAN, *tci);
            }
            Self::EtherType(ty) => {
                w.put_be16(attr::ETHERTYPE, *ty);
            }
            Self::Ipv4(key) => {
                let mut raw = BytesMut::with_capacity(IPV4_KEY_LEN);
                raw.put_slice(&key.source.octets());
                raw.put_slice(&key.destination.octets());
                raw.put_u8(key.protocol);
                raw.put_u8(key.tos);
                raw.put_u8(key.ttl);
                raw.put_u8(key.fragment as u8);
                w.put(attr::IPV4, &raw);
            }
            Self::Tcp { source, destination } => {
                w.put(attr::TCP, &ports(*source, *destination));
            }
            Self::Udp { source, destination } => {
                w.put(attr::UDP, &ports(*source, *destination));
            }
            Self::Icmp { icmp_type, code } => {
                w.put(attr::ICMP, &[*icmp_type, *code]);
            }
            Self::Arp(key) => {
                let mut raw = BytesMut::with_capacity(ARP_KEY_LEN);
                raw.put_slice(&key.sender_ip.octets());
                raw.put_slice(&key.target_ip.octets());
                raw.put_u16(key.operation);
                raw.put_slice(&key.sender_mac.octets());
                raw.put_slice(&key.target_mac.octets());
                raw.put_bytes(0, ARP_KEY_LEN - raw.len());
                w.put(attr::ARP, &raw);
            }
            Self::SkbMark(mark) => {
                w.put_u32(attr::SKB_MARK, *mark);
            }
            Self::Tunnel(key) => {
                w.nested(attr::TUNNEL, |t| {
                    if let Some(id) = key.id {
                        t.put_be64(tunnel_attr::ID, id);
                    }
                    if let Some(source) = key.source {
                        t.put_be32(tunnel_attr::IPV4_SRC, source.into());
                    }
                    if let Some(destination) = key.destination {
                        t.put_be32(tunnel_attr::IPV4_DST, destination.into());
                    }
                    if let Some(tos) = key.tos {
                        t.put_u8(tunnel_attr::TOS, tos);
                    }
                    if let Some(ttl) = key.ttl {
                        t.put_u8(tunnel_attr::TTL, ttl);
                    }
                    if key.dont_fragment {
                        t.put_flag(tunnel_attr::DONT_FRAGMENT);
                    }
                    if key.checksum {
                        t.put_flag(tunnel_attr::CSUM);
                    }
                });
            }
            Self::Unknown { ty, value } => {
                w.put(*ty, value);
            }
        }
    }
}

fn ports(source: u16, destination: u16) -> [u8; 4] {
    let [s0, s1] = source.to_be_bytes();
    let [d0, d1] = destination.to_be_bytes();
    [s0, s1, d0, d1]
}
