//! UDP (RFC 768). The checksum covers an IPv4 pseudo-header, so it can only be computed
//! when the enclosing header passes one down.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    be16, dhcp::Dhcp, ensure, length_field,
    protocol::{ip_proto, udp_port},
    MalformedPacket, PseudoHeader,
};

const HEADER: &str = "udp";
pub const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UdpPayload {
    Dhcp(Dhcp),
    Data(Bytes),
}

impl UdpPayload {
    /// Picks a decoder by destination port, then by source port.
    fn decode(source: u16, destination: u16, data: &[u8]) -> Result<Self, MalformedPacket> {
        if udp_port::is_dhcp(destination) || udp_port::is_dhcp(source) {
            return Ok(Self::Dhcp(Dhcp::deserialize(data)?));
        }
        Ok(Self::Data(Bytes::copy_from_slice(data)))
    }

    fn encode(&self, dst: &mut BytesMut) {
        match self {
            Self::Dhcp(dhcp) => dhcp.encode(dst),
            Self::Data(data) => dst.put_slice(data),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Udp {
    pub source_port: u16,
    pub destination_port: u16,
    /// Header plus payload. Computed on encode when zero.
    pub length: u16,
    /// Computed on encode when zero and a pseudo-header is available.
    pub checksum: u16,
    pub payload: UdpPayload,
}

impl Udp {
    pub fn new(source_port: u16, destination_port: u16, payload: UdpPayload) -> Self {
        Self { source_port, destination_port, length: 0, checksum: 0, payload }
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, MalformedPacket> {
        ensure(HEADER, HEADER_LEN, data.len())?;

        let length = be16(data, 4);
        if usize::from(length) < HEADER_LEN {
            return Err(MalformedPacket::InvalidField {
                header: HEADER,
                field: "length",
                value: length.into(),
            });
        }
        ensure(HEADER, length.into(), data.len())?;

        let source_port = be16(data, 0);
        let destination_port = be16(data, 2);

        Ok(Self {
            source_port,
            destination_port,
            length,
            checksum: be16(data, 6),
            payload: UdpPayload::decode(
                source_port,
                destination_port,
                &data[HEADER_LEN..usize::from(length)],
            )?,
        })
    }

    /// Encodes the datagram. The checksum stays zero without a pseudo-header.
    pub fn serialize(&self, pseudo: Option<&PseudoHeader>) -> Result<Bytes, MalformedPacket> {
        let mut dst = BytesMut::with_capacity(HEADER_LEN + 64);
        self.encode(&mut dst, pseudo)?;
        Ok(dst.freeze())
    }

    pub fn encode(&self, dst: &mut BytesMut, pseudo: Option<&PseudoHeader>) -> Result<(), MalformedPacket> {
        let start = dst.len();

        dst.put_u16(self.source_port);
        dst.put_u16(self.destination_port);
        dst.put_u16(self.length);
        dst.put_u16(self.checksum);
        self.payload.encode(dst);

        let length = match self.length {
            0 => length_field(HEADER, "length", dst.len() - start)?,
            len => len,
        };
        dst[start + 4..start + 6].copy_from_slice(&length.to_be_bytes());

        if let (0, Some(pseudo)) = (self.checksum, pseudo) {
            let sum = crate::checksum::sum(&dst[start..], pseudo.sum(ip_proto::UDP, length));
            // Zero means "no checksum" on the wire.
            let sum = match crate::checksum::finish(sum) {
                0 => 0xffff,
                sum => sum,
            };
            dst[start + 6..start + 8].copy_from_slice(&sum.to_be_bytes());
        }
        Ok(())
    }
}
