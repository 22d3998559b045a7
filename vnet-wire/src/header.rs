use bitflags::bitflags;
use bytes::{Buf, BufMut};

/// Length of the netlink message header.
pub const NLMSG_HDRLEN: usize = 16;
/// Length of the generic netlink header that follows the netlink header.
pub const GENL_HDRLEN: usize = 4;
/// Netlink messages and attributes are aligned to this many bytes.
pub const NLMSG_ALIGNTO: usize = 4;

/// Rounds `len` up to the netlink alignment.
#[inline]
pub const fn align(len: usize) -> usize {
    (len + NLMSG_ALIGNTO - 1) & !(NLMSG_ALIGNTO - 1)
}

/// Message types reserved by the netlink core.
pub mod msg_type {
    pub const NOOP: u16 = 1;
    pub const ERROR: u16 = 2;
    pub const DONE: u16 = 3;
    pub const OVERRUN: u16 = 4;
    /// Family id of the generic netlink controller.
    pub const GENL_ID_CTRL: u16 = 0x10;
}

bitflags! {
    /// `nlmsg_flags`. The upper byte is interpreted per request kind, so the GET and NEW
    /// modifiers deliberately share bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NlFlags: u16 {
        const REQUEST = 0x01;
        const MULTI = 0x02;
        const ACK = 0x04;
        const ECHO = 0x08;
        const DUMP_INTR = 0x10;

        // GET modifiers
        const ROOT = 0x100;
        const MATCH = 0x200;
        const ATOMIC = 0x400;
        const DUMP = 0x300;

        // NEW modifiers
        const REPLACE = 0x100;
        const EXCL = 0x200;
        const CREATE = 0x400;
        const APPEND = 0x800;
    }
}

/// The fixed netlink message header (`struct nlmsghdr`). All fields are in host byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NlHeader {
    /// Length of the message including this header.
    pub len: u32,
    /// Message type; the family id for generic netlink.
    pub ty: u16,
    pub flags: NlFlags,
    /// Sequence number used to correlate replies with requests.
    pub seq: u32,
    /// Port id of the sender.
    pub pid: u32,
}

impl NlHeader {
    /// Decodes a header. The caller guarantees at least [`NLMSG_HDRLEN`] bytes remain.
    pub fn decode<B: Buf>(src: &mut B) -> Self {
        Self {
            len: src.get_u32_ne(),
            ty: src.get_u16_ne(),
            flags: NlFlags::from_bits_retain(src.get_u16_ne()),
            seq: src.get_u32_ne(),
            pid: src.get_u32_ne(),
        }
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_u32_ne(self.len);
        dst.put_u16_ne(self.ty);
        dst.put_u16_ne(self.flags.bits());
        dst.put_u32_ne(self.seq);
        dst.put_u32_ne(self.pid);
    }
}

/// Generic netlink header (`struct genlmsghdr`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GenlHeader {
    pub cmd: u8,
    pub version: u8,
}

impl GenlHeader {
    #[inline]
    pub const fn new(cmd: u8, version: u8) -> Self {
        Self { cmd, version }
    }

    /// Decodes a header. The caller guarantees at least [`GENL_HDRLEN`] bytes remain.
    pub fn decode<B: Buf>(src: &mut B) -> Self {
        let cmd = src.get_u8();
        let version = src.get_u8();
        // reserved
        src.advance(2);
        Self { cmd, version }
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        dst.put_u8(self.cmd);
        dst.put_u8(self.version);
        dst.put_u16(0);
    }
}
