//! LLDP (IEEE 802.1AB).
//!
//! A frame is a sequence of TLVs, each with a 7-bit type and a 9-bit length, closed by an
//! end TLV. Chassis ID, port ID and TTL are mandatory. Decoding files each TLV by its
//! type code: a TLV is only taken as a mandatory field when its type says so, anything
//! else becomes an optional TLV. A frame whose mandatory TLVs are missing, including one
//! that carries them under the wrong type code, fails to decode.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{be16, ensure, MalformedPacket};

const HEADER: &str = "lldp";
const TLV_HEADER_LEN: usize = 2;
pub const MAX_TLV_VALUE_LEN: usize = 0x1ff;

pub const TLV_END: u8 = 0;
pub const TLV_CHASSIS_ID: u8 = 1;
pub const TLV_PORT_ID: u8 = 2;
pub const TLV_TTL: u8 = 3;
pub const TLV_PORT_DESCRIPTION: u8 = 4;
pub const TLV_SYSTEM_NAME: u8 = 5;
pub const TLV_ORGANIZATION: u8 = 127;

pub const CHASSIS_ID_SUBTYPE_MAC: u8 = 4;
pub const PORT_ID_SUBTYPE_NAME: u8 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LldpTlv {
    ty: u8,
    value: Bytes,
}

impl LldpTlv {
    /// Fails when the type doesn't fit in seven bits or the value in 511 bytes.
    pub fn new(ty: u8, value: Bytes) -> Result<Self, MalformedPacket> {
        if ty > 0x7f {
            return Err(MalformedPacket::InvalidField {
                header: HEADER,
                field: "tlv type",
                value: ty.into(),
            });
        }
        if value.len() > MAX_TLV_VALUE_LEN {
            return Err(MalformedPacket::InvalidField {
                header: HEADER,
                field: "tlv length",
                value: value.len() as u64,
            });
        }
        Ok(Self { ty, value })
    }

    pub fn ty(&self) -> u8 {
        self.ty
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Decodes one TLV, returning it and the bytes that follow.
    fn decode(data: &[u8]) -> Result<(Self, &[u8]), MalformedPacket> {
        ensure(HEADER, TLV_HEADER_LEN, data.len())?;

        let word = be16(data, 0);
        let ty = (word >> 9) as u8;
        let len = usize::from(word & 0x1ff);
        ensure(HEADER, TLV_HEADER_LEN + len, data.len())?;

        let value = Bytes::copy_from_slice(&data[TLV_HEADER_LEN..TLV_HEADER_LEN + len]);
        Ok((Self { ty, value }, &data[TLV_HEADER_LEN + len..]))
    }

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16((u16::from(self.ty) << 9) | (self.value.len() as u16 & 0x1ff));
        dst.put_slice(&self.value);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lldp {
    pub chassis_id: LldpTlv,
    pub port_id: LldpTlv,
    pub ttl: LldpTlv,
    pub optional: Vec<LldpTlv>,
}

impl Lldp {
    /// A frame announcing the chassis by MAC address and the port by name.
    pub fn new(chassis_mac: [u8; 6], port_name: &str, ttl_secs: u16) -> Result<Self, MalformedPacket> {
        let mut chassis = BytesMut::with_capacity(7);
        chassis.put_u8(CHASSIS_ID_SUBTYPE_MAC);
        chassis.put_slice(&chassis_mac);

        let mut port = BytesMut::with_capacity(1 + port_name.len());
        port.put_u8(PORT_ID_SUBTYPE_NAME);
        port.put_slice(port_name.as_bytes());

        Ok(Self {
            chassis_id: LldpTlv::new(TLV_CHASSIS_ID, chassis.freeze())?,
            port_id: LldpTlv::new(TLV_PORT_ID, port.freeze())?,
            ttl: LldpTlv::new(TLV_TTL, Bytes::copy_from_slice(&ttl_secs.to_be_bytes()))?,
            optional: Vec::new(),
        })
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, MalformedPacket> {
        let mut chassis_id = None;
        let mut port_id = None;
        let mut ttl = None;
        let mut optional = Vec::new();

        let mut rest = data;
        while !rest.is_empty() {
            let (tlv, next) = LldpTlv::decode(rest)?;
            rest = next;

            match tlv.ty {
                TLV_END => break,
                TLV_CHASSIS_ID => chassis_id = Some(tlv),
                TLV_PORT_ID => port_id = Some(tlv),
                TLV_TTL => ttl = Some(tlv),
                _ => optional.push(tlv),
            }
        }

        let missing = |field| MalformedPacket::Missing { header: HEADER, field };
        Ok(Self {
            chassis_id: chassis_id.ok_or_else(|| missing("chassis id"))?,
            port_id: port_id.ok_or_else(|| missing("port id"))?,
            ttl: ttl.ok_or_else(|| missing("ttl"))?,
            optional,
        })
    }

    pub fn serialize(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(64);
        self.encode(&mut dst);
        dst.freeze()
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        self.chassis_id.encode(dst);
        self.port_id.encode(dst);
        self.ttl.encode(dst);
        for tlv in &self.optional {
            tlv.encode(dst);
        }
        dst.put_u16(0);
    }
}
