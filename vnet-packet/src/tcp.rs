//! TCP (RFC 793). Options are kept as raw bytes and the payload is opaque.

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};

use crate::{be16, be32, ensure, protocol::ip_proto, MalformedPacket, PseudoHeader};

const HEADER: &str = "tcp";
pub const MIN_HEADER_LEN: usize = 20;

bitflags! {
    /// The nine TCP control bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TcpFlags: u16 {
        const FIN = 0x001;
        const SYN = 0x002;
        const RST = 0x004;
        const PSH = 0x008;
        const ACK = 0x010;
        const URG = 0x020;
        const ECE = 0x040;
        const CWR = 0x080;
        const NS = 0x100;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tcp {
    pub source_port: u16,
    pub destination_port: u16,
    pub sequence: u32,
    pub acknowledgment: u32,
    /// Header length in 32-bit words. Computed on encode when zero.
    pub data_offset: u8,
    pub flags: TcpFlags,
    pub window: u16,
    /// Computed on encode when zero and a pseudo-header is available.
    pub checksum: u16,
    pub urgent: u16,
    pub options: Bytes,
    pub payload: Bytes,
}

impl Tcp {
    pub fn new(source_port: u16, destination_port: u16, flags: TcpFlags) -> Self {
        Self {
            source_port,
            destination_port,
            sequence: 0,
            acknowledgment: 0,
            data_offset: 0,
            flags,
            window: 0xffff,
            checksum: 0,
            urgent: 0,
            options: Bytes::new(),
            payload: Bytes::new(),
        }
    }

    pub fn with_payload(mut self, payload: Bytes) -> Self {
        self.payload = payload;
        self
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, MalformedPacket> {
        ensure(HEADER, MIN_HEADER_LEN, data.len())?;

        let data_offset = data[12] >> 4;
        let header_len = usize::from(data_offset) * 4;
        if header_len < MIN_HEADER_LEN {
            return Err(MalformedPacket::InvalidField {
                header: HEADER,
                field: "data offset",
                value: data_offset.into(),
            });
        }
        ensure(HEADER, header_len, data.len())?;

        Ok(Self {
            source_port: be16(data, 0),
            destination_port: be16(data, 2),
            sequence: be32(data, 4),
            acknowledgment: be32(data, 8),
            data_offset,
            flags: TcpFlags::from_bits_truncate(be16(data, 12)),
            window: be16(data, 14),
            checksum: be16(data, 16),
            urgent: be16(data, 18),
            options: Bytes::copy_from_slice(&data[MIN_HEADER_LEN..header_len]),
            payload: Bytes::copy_from_slice(&data[header_len..]),
        })
    }

    pub fn serialize(&self, pseudo: Option<&PseudoHeader>) -> Bytes {
        let mut dst = BytesMut::with_capacity(MIN_HEADER_LEN + self.options.len() + self.payload.len());
        self.encode(&mut dst, pseudo);
        dst.freeze()
    }

    pub fn encode(&self, dst: &mut BytesMut, pseudo: Option<&PseudoHeader>) {
        let data_offset = match self.data_offset {
            0 => (MIN_HEADER_LEN + self.options.len()).div_ceil(4) as u8,
            offset => offset,
        };
        let header_len = usize::from(data_offset) * 4;

        let start = dst.len();
        dst.put_u16(self.source_port);
        dst.put_u16(self.destination_port);
        dst.put_u32(self.sequence);
        dst.put_u32(self.acknowledgment);
        dst.put_u16((u16::from(data_offset) << 12) | self.flags.bits());
        dst.put_u16(self.window);
        dst.put_u16(self.checksum);
        dst.put_u16(self.urgent);
        dst.put_slice(&self.options);

        let written = dst.len() - start;
        if written < header_len {
            dst.put_bytes(0, header_len - written);
        }
        dst.put_slice(&self.payload);

        if let (0, Some(pseudo)) = (self.checksum, pseudo) {
            let sum = pseudo.checksum(ip_proto::TCP, &dst[start..]);
            dst[start + 16..start + 18].copy_from_slice(&sum.to_be_bytes());
        }
    }
}
