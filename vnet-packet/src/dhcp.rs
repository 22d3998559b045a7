//! DHCP (RFC 2131): the BOOTP fixed part, the magic cookie and an option list.

use std::net::Ipv4Addr;

use bytes::{BufMut, Bytes, BytesMut};

use crate::{be16, be32, ensure, ipv4_addr, MalformedPacket};

const HEADER: &str = "dhcp";
const FIXED_LEN: usize = 236;
pub const MAGIC_COOKIE: u32 = 0x6382_5363;

pub const OP_REQUEST: u8 = 1;
pub const OP_REPLY: u8 = 2;

pub mod option {
    pub const PAD: u8 = 0;
    pub const SUBNET_MASK: u8 = 1;
    pub const ROUTER: u8 = 3;
    pub const DNS: u8 = 6;
    pub const INTERFACE_MTU: u8 = 26;
    pub const REQUESTED_IP: u8 = 50;
    pub const LEASE_TIME: u8 = 51;
    pub const MESSAGE_TYPE: u8 = 53;
    pub const SERVER_ID: u8 = 54;
    pub const END: u8 = 255;
}

pub mod message_type {
    pub const DISCOVER: u8 = 1;
    pub const OFFER: u8 = 2;
    pub const REQUEST: u8 = 3;
    pub const DECLINE: u8 = 4;
    pub const ACK: u8 = 5;
    pub const NAK: u8 = 6;
    pub const RELEASE: u8 = 7;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpOption {
    pub code: u8,
    pub value: Bytes,
}

impl DhcpOption {
    pub fn new(code: u8, value: impl Into<Bytes>) -> Self {
        Self { code, value: value.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dhcp {
    pub op: u8,
    pub hardware_type: u8,
    pub hardware_len: u8,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    pub client_ip: Ipv4Addr,
    pub your_ip: Ipv4Addr,
    pub server_ip: Ipv4Addr,
    pub gateway_ip: Ipv4Addr,
    pub client_hardware: [u8; 16],
    pub server_name: [u8; 64],
    pub boot_file: [u8; 128],
    /// Options in wire order, without pads or the end marker.
    pub options: Vec<DhcpOption>,
}

impl Dhcp {
    pub fn new(op: u8, xid: u32, client_mac: [u8; 6]) -> Self {
        let mut client_hardware = [0; 16];
        client_hardware[..6].copy_from_slice(&client_mac);

        Self {
            op,
            hardware_type: 1,
            hardware_len: 6,
            hops: 0,
            xid,
            secs: 0,
            flags: 0,
            client_ip: Ipv4Addr::UNSPECIFIED,
            your_ip: Ipv4Addr::UNSPECIFIED,
            server_ip: Ipv4Addr::UNSPECIFIED,
            gateway_ip: Ipv4Addr::UNSPECIFIED,
            client_hardware,
            server_name: [0; 64],
            boot_file: [0; 128],
            options: Vec::new(),
        }
    }

    pub fn with_option(mut self, option: DhcpOption) -> Self {
        self.options.push(option);
        self
    }

    pub fn option(&self, code: u8) -> Option<&DhcpOption> {
        self.options.iter().find(|o| o.code == code)
    }

    pub fn message_type(&self) -> Option<u8> {
        self.option(option::MESSAGE_TYPE).and_then(|o| o.value.first().copied())
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, MalformedPacket> {
        ensure(HEADER, FIXED_LEN + 4, data.len())?;

        let cookie = be32(data, FIXED_LEN);
        if cookie != MAGIC_COOKIE {
            return Err(MalformedPacket::InvalidField {
                header: HEADER,
                field: "magic cookie",
                value: cookie.into(),
            });
        }

        let mut options = Vec::new();
        let mut offset = FIXED_LEN + 4;
        while offset < data.len() {
            let code = data[offset];
            offset += 1;

            match code {
                option::PAD => continue,
                option::END => break,
                _ => {}
            }

            ensure(HEADER, offset + 1, data.len())?;
            let len = usize::from(data[offset]);
            offset += 1;
            ensure(HEADER, offset + len, data.len())?;

            options.push(DhcpOption::new(code, Bytes::copy_from_slice(&data[offset..offset + len])));
            offset += len;
        }

        let mut client_hardware = [0; 16];
        client_hardware.copy_from_slice(&data[28..44]);
        let mut server_name = [0; 64];
        server_name.copy_from_slice(&data[44..108]);
        let mut boot_file = [0; 128];
        boot_file.copy_from_slice(&data[108..236]);

        Ok(Self {
            op: data[0],
            hardware_type: data[1],
            hardware_len: data[2],
            hops: data[3],
            xid: be32(data, 4),
            secs: be16(data, 8),
            flags: be16(data, 10),
            client_ip: ipv4_addr(data, 12),
            your_ip: ipv4_addr(data, 16),
            server_ip: ipv4_addr(data, 20),
            gateway_ip: ipv4_addr(data, 24),
            client_hardware,
            server_name,
            boot_file,
            options,
        })
    }

    pub fn serialize(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(FIXED_LEN + 64);
        self.encode(&mut dst);
        dst.freeze()
    }

    /// Options longer than 255 bytes are split over consecutive options with the same
    /// code (RFC 3396).
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.op);
        dst.put_u8(self.hardware_type);
        dst.put_u8(self.hardware_len);
        dst.put_u8(self.hops);
        dst.put_u32(self.xid);
        dst.put_u16(self.secs);
        dst.put_u16(self.flags);
        dst.put_slice(&self.client_ip.octets());
        dst.put_slice(&self.your_ip.octets());
        dst.put_slice(&self.server_ip.octets());
        dst.put_slice(&self.gateway_ip.octets());
        dst.put_slice(&self.client_hardware);
        dst.put_slice(&self.server_name);
        dst.put_slice(&self.boot_file);
        dst.put_u32(MAGIC_COOKIE);

        for option in &self.options {
            for chunk in option.value.chunks(255) {
                dst.put_u8(option.code);
                dst.put_u8(chunk.len() as u8);
                dst.put_slice(chunk);
            }
            if option.value.is_empty() {
                dst.put_u8(option.code);
                dst.put_u8(0);
            }
        }
        dst.put_u8(option::END);
    }
}
