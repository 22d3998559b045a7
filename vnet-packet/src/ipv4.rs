//! IPv4 (RFC 791).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |Version|  IHL  |Type of Service|          Total Length         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         Identification        |Flags|      Fragment Offset    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Time to Live |    Protocol   |         Header Checksum       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                       Source Address                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Destination Address                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Options                    |    Padding    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! `ihl`, `total_length` and `checksum` are computed on encode when left at zero.

use std::net::Ipv4Addr;

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    be16, checksum, ensure, icmp::Icmp, ipv4_addr, length_field, protocol::ip_proto, tcp::Tcp,
    udp::Udp, MalformedPacket, PseudoHeader,
};

const HEADER: &str = "ipv4";
pub const MIN_HEADER_LEN: usize = 20;

pub const FLAG_DONT_FRAGMENT: u8 = 0b010;
pub const FLAG_MORE_FRAGMENTS: u8 = 0b001;

/// Where a packet sits in a fragmented datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum FragmentType {
    /// Not fragmented.
    #[default]
    None = 0,
    /// The first fragment; it carries the transport header.
    First = 1,
    /// Any fragment after the first.
    Later = 2,
}

impl FragmentType {
    pub const fn from_header(flags: u8, offset: u16) -> Self {
        if offset != 0 {
            Self::Later
        } else if flags & FLAG_MORE_FRAGMENTS != 0 {
            Self::First
        } else {
            Self::None
        }
    }

    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::First),
            2 => Some(Self::Later),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ipv4Payload {
    Tcp(Tcp),
    Udp(Udp),
    Icmp(Icmp),
    Data(Bytes),
}

impl Ipv4Payload {
    fn decode(protocol: u8, data: &[u8]) -> Result<Self, MalformedPacket> {
        Ok(match protocol {
            ip_proto::TCP => Self::Tcp(Tcp::deserialize(data)?),
            ip_proto::UDP => Self::Udp(Udp::deserialize(data)?),
            ip_proto::ICMP => Self::Icmp(Icmp::deserialize(data)?),
            _ => Self::Data(Bytes::copy_from_slice(data)),
        })
    }

    /// The protocol number that announces this payload, if it is a decoded header.
    pub const fn protocol(&self) -> Option<u8> {
        match self {
            Self::Tcp(_) => Some(ip_proto::TCP),
            Self::Udp(_) => Some(ip_proto::UDP),
            Self::Icmp(_) => Some(ip_proto::ICMP),
            Self::Data(_) => None,
        }
    }

    fn encode(&self, dst: &mut BytesMut, pseudo: &PseudoHeader) -> Result<(), MalformedPacket> {
        match self {
            Self::Tcp(tcp) => tcp.encode(dst, Some(pseudo)),
            Self::Udp(udp) => udp.encode(dst, Some(pseudo))?,
            Self::Icmp(icmp) => icmp.encode(dst),
            Self::Data(data) => dst.put_slice(data),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4 {
    /// Header length in 32-bit words.
    pub ihl: u8,
    pub tos: u8,
    pub total_length: u16,
    pub identification: u16,
    /// The three flag bits: reserved, don't fragment, more fragments.
    pub flags: u8,
    /// Fragment offset in 8-byte units, 13 bits.
    pub fragment_offset: u16,
    pub ttl: u8,
    /// Overwritten on encode when the payload is a decoded header.
    pub protocol: u8,
    pub checksum: u16,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub options: Bytes,
    pub payload: Ipv4Payload,
}

impl Ipv4 {
    pub fn new(source: Ipv4Addr, destination: Ipv4Addr, payload: Ipv4Payload) -> Self {
        Self {
            ihl: 0,
            tos: 0,
            total_length: 0,
            identification: 0,
            flags: 0,
            fragment_offset: 0,
            ttl: 64,
            protocol: payload.protocol().unwrap_or_default(),
            checksum: 0,
            source,
            destination,
            options: Bytes::new(),
            payload,
        }
    }

    pub fn fragment_type(&self) -> FragmentType {
        FragmentType::from_header(self.flags, self.fragment_offset)
    }

    pub fn pseudo_header(&self) -> PseudoHeader {
        PseudoHeader::new(self.source, self.destination)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, MalformedPacket> {
        ensure(HEADER, MIN_HEADER_LEN, data.len())?;

        let version = data[0] >> 4;
        if version != 4 {
            return Err(MalformedPacket::InvalidField {
                header: HEADER,
                field: "version",
                value: version.into(),
            });
        }

        let ihl = data[0] & 0x0f;
        let header_len = usize::from(ihl) * 4;
        if header_len < MIN_HEADER_LEN {
            return Err(MalformedPacket::InvalidField {
                header: HEADER,
                field: "ihl",
                value: ihl.into(),
            });
        }
        ensure(HEADER, header_len, data.len())?;

        let total_length = be16(data, 2);
        if usize::from(total_length) < header_len {
            return Err(MalformedPacket::InvalidField {
                header: HEADER,
                field: "total length",
                value: total_length.into(),
            });
        }
        ensure(HEADER, total_length.into(), data.len())?;

        let flags_offset = be16(data, 6);
        let flags = (flags_offset >> 13) as u8;
        let fragment_offset = flags_offset & 0x1fff;
        let protocol = data[9];
        let body = &data[header_len..usize::from(total_length)];

        // Later fragments don't start with a transport header.
        let payload = if fragment_offset != 0 {
            Ipv4Payload::Data(Bytes::copy_from_slice(body))
        } else {
            Ipv4Payload::decode(protocol, body)?
        };

        Ok(Self {
            ihl,
            tos: data[1],
            total_length,
            identification: be16(data, 4),
            flags,
            fragment_offset,
            ttl: data[8],
            protocol,
            checksum: be16(data, 10),
            source: ipv4_addr(data, 12),
            destination: ipv4_addr(data, 16),
            options: Bytes::copy_from_slice(&data[MIN_HEADER_LEN..header_len]),
            payload,
        })
    }

    pub fn serialize(&self) -> Result<Bytes, MalformedPacket> {
        let mut dst = BytesMut::with_capacity(MIN_HEADER_LEN + self.options.len() + 64);
        self.encode(&mut dst)?;
        Ok(dst.freeze())
    }

    /// Fails when the options don't fit the 4-bit header length or the datagram
    /// outgrows the 16-bit total length.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), MalformedPacket> {
        let ihl = match self.ihl {
            0 => (MIN_HEADER_LEN + self.options.len()).div_ceil(4),
            ihl => usize::from(ihl),
        };
        if ihl > 0x0f {
            return Err(MalformedPacket::InvalidField { header: HEADER, field: "ihl", value: ihl as u64 });
        }
        let header_len = ihl * 4;

        let mut payload = BytesMut::new();
        self.payload.encode(&mut payload, &self.pseudo_header())?;

        let total_length = match self.total_length {
            0 => length_field(HEADER, "total length", header_len + payload.len())?,
            len => len,
        };

        let start = dst.len();
        dst.put_u8((4 << 4) | ihl as u8);
        dst.put_u8(self.tos);
        dst.put_u16(total_length);
        dst.put_u16(self.identification);
        dst.put_u16((u16::from(self.flags & 0x7) << 13) | (self.fragment_offset & 0x1fff));
        dst.put_u8(self.ttl);
        dst.put_u8(self.payload.protocol().unwrap_or(self.protocol));
        dst.put_u16(self.checksum);
        dst.put_slice(&self.source.octets());
        dst.put_slice(&self.destination.octets());
        dst.put_slice(&self.options);

        // Pad options up to the header length.
        let written = dst.len() - start;
        if written < header_len {
            dst.put_bytes(0, header_len - written);
        }

        if self.checksum == 0 {
            let end = start + header_len.min(dst.len() - start);
            let sum = checksum::checksum(&dst[start..end]);
            dst[start + 10..start + 12].copy_from_slice(&sum.to_be_bytes());
        }

        dst.put_slice(&payload);
        Ok(())
    }

    pub fn tcp(&self) -> Option<&Tcp> {
        match &self.payload {
            Ipv4Payload::Tcp(tcp) => Some(tcp),
            _ => None,
        }
    }

    pub fn udp(&self) -> Option<&Udp> {
        match &self.payload {
            Ipv4Payload::Udp(udp) => Some(udp),
            _ => None,
        }
    }
}
