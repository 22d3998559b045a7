//! Binary packet codecs.
//!
//! Every header decodes from a byte slice with `deserialize` and encodes with `serialize`.
//! Headers with a 16-bit length field fail to encode once their contents outgrow it.
//! Decoding dispatches the payload to the next header by ethertype, IP protocol or
//! well-known port and falls back to opaque bytes for anything it doesn't know. Fields
//! left at zero, such as lengths and checksums, are computed while encoding. Checksums
//! that cover a pseudo-header take it as an explicit [`PseudoHeader`] argument.

use thiserror::Error;

pub mod arp;
pub mod checksum;
pub mod dhcp;
pub mod ethernet;
pub mod icmp;
pub mod ipv4;
pub mod lldp;
pub mod protocol;
pub mod tcp;
pub mod udp;

pub use arp::Arp;
pub use checksum::PseudoHeader;
pub use dhcp::{Dhcp, DhcpOption};
pub use ethernet::{Ethernet, EthernetPayload, VlanTag};
pub use icmp::Icmp;
pub use ipv4::{FragmentType, Ipv4, Ipv4Payload};
pub use lldp::{Lldp, LldpTlv};
pub use pnet::util::MacAddr;
pub use tcp::{Tcp, TcpFlags};
pub use udp::{Udp, UdpPayload};

/// A packet that can't be decoded, or a field value that can't be encoded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedPacket {
    #[error("{header} truncated: need {needed} bytes, {available} available")]
    Truncated { header: &'static str, needed: usize, available: usize },
    #[error("{header}: invalid {field} {value}")]
    InvalidField { header: &'static str, field: &'static str, value: u64 },
    #[error("{header}: missing {field}")]
    Missing { header: &'static str, field: &'static str },
}

#[inline]
pub(crate) fn ensure(
    header: &'static str,
    needed: usize,
    available: usize,
) -> Result<(), MalformedPacket> {
    if available < needed {
        return Err(MalformedPacket::Truncated { header, needed, available });
    }
    Ok(())
}

/// A computed length that has to fit its 16-bit wire field.
#[inline]
pub(crate) fn length_field(
    header: &'static str,
    field: &'static str,
    len: usize,
) -> Result<u16, MalformedPacket> {
    u16::try_from(len).map_err(|_| MalformedPacket::InvalidField { header, field, value: len as u64 })
}

#[inline]
pub(crate) fn be16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

#[inline]
pub(crate) fn be32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

#[inline]
pub(crate) fn mac(data: &[u8], offset: usize) -> MacAddr {
    MacAddr::new(
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
        data[offset + 4],
        data[offset + 5],
    )
}

#[inline]
pub(crate) fn ipv4_addr(data: &[u8], offset: usize) -> std::net::Ipv4Addr {
    std::net::Ipv4Addr::new(data[offset], data[offset + 1], data[offset + 2], data[offset + 3])
}
