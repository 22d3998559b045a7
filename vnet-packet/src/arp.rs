//! ARP (RFC 826). Address fields keep the lengths announced in the header; the typed
//! accessors only answer for Ethernet and IPv4.

use std::net::Ipv4Addr;

use bytes::{BufMut, Bytes, BytesMut};

use crate::{be16, ensure, ipv4_addr, mac, protocol::ether_type, MacAddr, MalformedPacket};

const HEADER: &str = "arp";
const FIXED_LEN: usize = 8;

pub const HW_TYPE_ETHERNET: u16 = 1;
pub const OP_REQUEST: u16 = 1;
pub const OP_REPLY: u16 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arp {
    pub hardware_type: u16,
    pub protocol_type: u16,
    pub operation: u16,
    pub sender_hardware: Bytes,
    pub sender_protocol: Bytes,
    pub target_hardware: Bytes,
    pub target_protocol: Bytes,
}

impl Arp {
    fn ethernet_ipv4(
        operation: u16,
        sender_mac: MacAddr,
        sender_ip: Ipv4Addr,
        target_mac: MacAddr,
        target_ip: Ipv4Addr,
    ) -> Self {
        Self {
            hardware_type: HW_TYPE_ETHERNET,
            protocol_type: ether_type::IPV4,
            operation,
            sender_hardware: Bytes::copy_from_slice(&sender_mac.octets()),
            sender_protocol: Bytes::copy_from_slice(&sender_ip.octets()),
            target_hardware: Bytes::copy_from_slice(&target_mac.octets()),
            target_protocol: Bytes::copy_from_slice(&target_ip.octets()),
        }
    }

    pub fn request(sender_mac: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        Self::ethernet_ipv4(OP_REQUEST, sender_mac, sender_ip, MacAddr::zero(), target_ip)
    }

    pub fn reply(
        sender_mac: MacAddr,
        sender_ip: Ipv4Addr,
        target_mac: MacAddr,
        target_ip: Ipv4Addr,
    ) -> Self {
        Self::ethernet_ipv4(OP_REPLY, sender_mac, sender_ip, target_mac, target_ip)
    }

    fn is_ethernet_ipv4(&self) -> bool {
        self.sender_hardware.len() == 6
            && self.target_hardware.len() == 6
            && self.sender_protocol.len() == 4
            && self.target_protocol.len() == 4
    }

    pub fn sender_mac(&self) -> Option<MacAddr> {
        self.is_ethernet_ipv4().then(|| mac(&self.sender_hardware, 0))
    }

    pub fn target_mac(&self) -> Option<MacAddr> {
        self.is_ethernet_ipv4().then(|| mac(&self.target_hardware, 0))
    }

    pub fn sender_ip(&self) -> Option<Ipv4Addr> {
        self.is_ethernet_ipv4().then(|| ipv4_addr(&self.sender_protocol, 0))
    }

    pub fn target_ip(&self) -> Option<Ipv4Addr> {
        self.is_ethernet_ipv4().then(|| ipv4_addr(&self.target_protocol, 0))
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, MalformedPacket> {
        ensure(HEADER, FIXED_LEN, data.len())?;

        let hw_len = usize::from(data[4]);
        let proto_len = usize::from(data[5]);
        ensure(HEADER, FIXED_LEN + 2 * (hw_len + proto_len), data.len())?;

        let mut offset = FIXED_LEN;
        let mut take = |len: usize| {
            let field = Bytes::copy_from_slice(&data[offset..offset + len]);
            offset += len;
            field
        };

        Ok(Self {
            hardware_type: be16(data, 0),
            protocol_type: be16(data, 2),
            operation: be16(data, 6),
            sender_hardware: take(hw_len),
            sender_protocol: take(proto_len),
            target_hardware: take(hw_len),
            target_protocol: take(proto_len),
        })
    }

    pub fn serialize(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(28);
        self.encode(&mut dst);
        dst.freeze()
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(self.hardware_type);
        dst.put_u16(self.protocol_type);
        dst.put_u8(self.sender_hardware.len() as u8);
        dst.put_u8(self.sender_protocol.len() as u8);
        dst.put_u16(self.operation);
        dst.put_slice(&self.sender_hardware);
        dst.put_slice(&self.sender_protocol);
        dst.put_slice(&self.target_hardware);
        dst.put_slice(&self.target_protocol);
    }
}
