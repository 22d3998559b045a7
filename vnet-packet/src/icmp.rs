//! ICMP for IPv4 (RFC 792).

use bytes::{BufMut, Bytes, BytesMut};

use crate::{be16, be32, checksum, ensure, MalformedPacket};

const HEADER: &str = "icmp";
pub const HEADER_LEN: usize = 8;

pub const TYPE_ECHO_REPLY: u8 = 0;
pub const TYPE_UNREACH: u8 = 3;
pub const TYPE_ECHO_REQUEST: u8 = 8;
pub const TYPE_TIME_EXCEEDED: u8 = 11;

pub const CODE_UNREACH_NET: u8 = 0;
pub const CODE_UNREACH_HOST: u8 = 1;
pub const CODE_UNREACH_PROTOCOL: u8 = 2;
pub const CODE_UNREACH_PORT: u8 = 3;
pub const CODE_UNREACH_FRAG_NEEDED: u8 = 4;
pub const CODE_UNREACH_FILTER_PROHIB: u8 = 13;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icmp {
    pub icmp_type: u8,
    pub code: u8,
    /// Computed on encode when zero.
    pub checksum: u16,
    /// The type-specific second word: identifier and sequence for echo, next-hop MTU for
    /// fragmentation needed, unused otherwise.
    pub rest: u32,
    pub data: Bytes,
}

impl Icmp {
    pub fn echo_request(identifier: u16, sequence: u16, data: Bytes) -> Self {
        Self {
            icmp_type: TYPE_ECHO_REQUEST,
            code: 0,
            checksum: 0,
            rest: (u32::from(identifier) << 16) | u32::from(sequence),
            data,
        }
    }

    /// The reply to an echo request, echoing its identifier, sequence and data.
    pub fn echo_reply(request: &Self) -> Self {
        Self { icmp_type: TYPE_ECHO_REPLY, code: 0, checksum: 0, ..request.clone() }
    }

    /// A destination unreachable error quoting `original`, the offending IP header plus
    /// at least the first eight bytes of its payload.
    pub fn unreachable(code: u8, original: Bytes) -> Self {
        Self { icmp_type: TYPE_UNREACH, code, checksum: 0, rest: 0, data: original }
    }

    pub fn time_exceeded(original: Bytes) -> Self {
        Self { icmp_type: TYPE_TIME_EXCEEDED, code: 0, checksum: 0, rest: 0, data: original }
    }

    pub const fn identifier(&self) -> u16 {
        (self.rest >> 16) as u16
    }

    pub const fn sequence(&self) -> u16 {
        self.rest as u16
    }

    pub const fn is_error(&self) -> bool {
        matches!(self.icmp_type, TYPE_UNREACH | TYPE_TIME_EXCEEDED)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, MalformedPacket> {
        ensure(HEADER, HEADER_LEN, data.len())?;

        Ok(Self {
            icmp_type: data[0],
            code: data[1],
            checksum: be16(data, 2),
            rest: be32(data, 4),
            data: Bytes::copy_from_slice(&data[HEADER_LEN..]),
        })
    }

    pub fn serialize(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(HEADER_LEN + self.data.len());
        self.encode(&mut dst);
        dst.freeze()
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        let start = dst.len();
        dst.put_u8(self.icmp_type);
        dst.put_u8(self.code);
        dst.put_u16(self.checksum);
        dst.put_u32(self.rest);
        dst.put_slice(&self.data);

        if self.checksum == 0 {
            let sum = checksum::checksum(&dst[start..]);
            dst[start + 2..start + 4].copy_from_slice(&sum.to_be_bytes());
        }
    }
}
