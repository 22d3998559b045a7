//! Ethernet II frames with an optional 802.1Q tag.
//!
//! ```text
//! +-----------------+-----------------+------------------+-----------+---------
//! | destination (6) | source (6)      | [0x8100, TCI (4)]| type (2)  | payload
//! +-----------------+-----------------+------------------+-----------+---------
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    arp::Arp, be16, ensure, ipv4::Ipv4, lldp::Lldp, mac, protocol::ether_type, MacAddr,
    MalformedPacket,
};

const HEADER: &str = "ethernet";
pub const HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;

/// An 802.1Q tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VlanTag {
    /// Priority code point, 3 bits.
    pub priority: u8,
    pub drop_eligible: bool,
    /// VLAN id, 12 bits.
    pub id: u16,
}

impl VlanTag {
    pub const fn new(id: u16) -> Self {
        Self { priority: 0, drop_eligible: false, id }
    }

    pub const fn from_tci(tci: u16) -> Self {
        Self { priority: (tci >> 13) as u8, drop_eligible: tci & 0x1000 != 0, id: tci & 0x0fff }
    }

    pub const fn tci(&self) -> u16 {
        ((self.priority as u16 & 0x7) << 13) | ((self.drop_eligible as u16) << 12) | (self.id & 0x0fff)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EthernetPayload {
    Ipv4(Ipv4),
    Arp(Arp),
    Lldp(Lldp),
    Data(Bytes),
}

impl EthernetPayload {
    fn decode(ty: u16, data: &[u8]) -> Result<Self, MalformedPacket> {
        Ok(match ty {
            ether_type::IPV4 => Self::Ipv4(Ipv4::deserialize(data)?),
            ether_type::ARP => Self::Arp(Arp::deserialize(data)?),
            ether_type::LLDP => Self::Lldp(Lldp::deserialize(data)?),
            _ => Self::Data(Bytes::copy_from_slice(data)),
        })
    }

    /// The ethertype that announces this payload, if it is a decoded header.
    pub const fn ether_type(&self) -> Option<u16> {
        match self {
            Self::Ipv4(_) => Some(ether_type::IPV4),
            Self::Arp(_) => Some(ether_type::ARP),
            Self::Lldp(_) => Some(ether_type::LLDP),
            Self::Data(_) => None,
        }
    }

    fn encode(&self, dst: &mut BytesMut) -> Result<(), MalformedPacket> {
        match self {
            Self::Ipv4(ip) => ip.encode(dst)?,
            Self::Arp(arp) => arp.encode(dst),
            Self::Lldp(lldp) => lldp.encode(dst),
            Self::Data(data) => dst.put_slice(data),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ethernet {
    pub destination: MacAddr,
    pub source: MacAddr,
    pub vlan: Option<VlanTag>,
    /// Overwritten on encode when the payload is a decoded header.
    pub ether_type: u16,
    pub payload: EthernetPayload,
}

impl Ethernet {
    pub fn new(source: MacAddr, destination: MacAddr, payload: EthernetPayload) -> Self {
        Self {
            destination,
            source,
            vlan: None,
            ether_type: payload.ether_type().unwrap_or_default(),
            payload,
        }
    }

    pub fn with_vlan(mut self, tag: VlanTag) -> Self {
        self.vlan = Some(tag);
        self
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, MalformedPacket> {
        ensure(HEADER, HEADER_LEN, data.len())?;

        let destination = mac(data, 0);
        let source = mac(data, 6);
        let mut ty = be16(data, 12);
        let mut offset = HEADER_LEN;

        let mut vlan = None;
        if ty == ether_type::VLAN {
            ensure(HEADER, HEADER_LEN + VLAN_TAG_LEN, data.len())?;
            vlan = Some(VlanTag::from_tci(be16(data, 14)));
            ty = be16(data, 16);
            offset += VLAN_TAG_LEN;
        }

        Ok(Self {
            destination,
            source,
            vlan,
            ether_type: ty,
            payload: EthernetPayload::decode(ty, &data[offset..])?,
        })
    }

    pub fn serialize(&self) -> Result<Bytes, MalformedPacket> {
        let mut dst = BytesMut::with_capacity(HEADER_LEN + VLAN_TAG_LEN + 64);
        self.encode(&mut dst)?;
        Ok(dst.freeze())
    }

    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), MalformedPacket> {
        dst.put_slice(&self.destination.octets());
        dst.put_slice(&self.source.octets());
        if let Some(tag) = self.vlan {
            dst.put_u16(ether_type::VLAN);
            dst.put_u16(tag.tci());
        }
        dst.put_u16(self.payload.ether_type().unwrap_or(self.ether_type));
        self.payload.encode(dst)
    }

    pub fn ipv4(&self) -> Option<&Ipv4> {
        match &self.payload {
            EthernetPayload::Ipv4(ip) => Some(ip),
            _ => None,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.destination.is_broadcast()
    }

    pub fn is_multicast(&self) -> bool {
        self.destination.is_multicast()
    }
}
