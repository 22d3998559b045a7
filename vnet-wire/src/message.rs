use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    attr::{AttrError, AttrWriter, Attributes},
    header::{align, msg_type, GenlHeader, NlFlags, NlHeader, GENL_HDRLEN, NLMSG_HDRLEN},
    Error,
};

/// A single netlink message: the fixed header plus everything after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    header: NlHeader,
    /// The bytes following the netlink header, unpadded.
    payload: Bytes,
}

impl Message {
    /// Creates a new message. The length field is derived from the payload and the
    /// sequence and port ids are left at zero.
    pub fn new(ty: u16, flags: NlFlags, payload: Bytes) -> Self {
        Self {
            header: NlHeader {
                len: (NLMSG_HDRLEN + payload.len()) as u32,
                ty,
                flags,
                seq: 0,
                pid: 0,
            },
            payload,
        }
    }

    /// Creates a generic netlink message whose body is the generic header followed by
    /// `body`.
    pub fn genl(family: u16, flags: NlFlags, genl: GenlHeader, body: &[u8]) -> Self {
        let mut payload = BytesMut::with_capacity(GENL_HDRLEN + body.len());
        genl.encode(&mut payload);
        payload.put_slice(body);
        Self::new(family, flags, payload.freeze())
    }

    /// Creates an error (or ACK, when `code` is zero) reply to `original`.
    pub fn error(original: &NlHeader, code: i32) -> Self {
        let mut payload = BytesMut::with_capacity(4 + NLMSG_HDRLEN);
        payload.put_i32_ne(code);
        original.encode(&mut payload);

        let mut msg = Self::new(msg_type::ERROR, NlFlags::empty(), payload.freeze());
        msg.header.seq = original.seq;
        msg.header.pid = original.pid;
        msg
    }

    /// Creates the terminator of a multi-part reply.
    pub fn done(seq: u32, pid: u32) -> Self {
        let mut msg = Self::new(msg_type::DONE, NlFlags::MULTI, Bytes::from_static(&[0; 4]));
        msg.header.seq = seq;
        msg.header.pid = pid;
        msg
    }

    #[inline]
    pub fn header(&self) -> &NlHeader {
        &self.header
    }

    #[inline]
    pub fn ty(&self) -> u16 {
        self.header.ty
    }

    #[inline]
    pub fn flags(&self) -> NlFlags {
        self.header.flags
    }

    #[inline]
    pub fn seq(&self) -> u32 {
        self.header.seq
    }

    #[inline]
    pub fn pid(&self) -> u32 {
        self.header.pid
    }

    #[inline]
    pub fn set_seq(&mut self, seq: u32) {
        self.header.seq = seq;
    }

    #[inline]
    pub fn set_pid(&mut self, pid: u32) {
        self.header.pid = pid;
    }

    #[inline]
    pub fn set_flags(&mut self, flags: NlFlags) {
        self.header.flags = flags;
    }

    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    #[inline]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Size of the message on the wire, including padding.
    #[inline]
    pub fn size(&self) -> usize {
        align(NLMSG_HDRLEN + self.payload.len())
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.header.ty == msg_type::ERROR
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.header.ty == msg_type::DONE
    }

    #[inline]
    pub fn is_multi(&self) -> bool {
        self.header.flags.contains(NlFlags::MULTI)
    }

    /// Splits a generic netlink body into its header and the bytes that follow.
    pub fn genl_parts(&self) -> Result<(GenlHeader, Bytes), Error> {
        if self.payload.len() < GENL_HDRLEN {
            return Err(Error::Truncated {
                what: "generic netlink header",
                needed: GENL_HDRLEN,
                available: self.payload.len(),
            });
        }

        let mut payload = self.payload.clone();
        let genl = GenlHeader::decode(&mut payload);
        Ok((genl, payload))
    }

    /// Parses the attributes of a generic netlink message, skipping `user_header` bytes
    /// of family-specific header after the generic header.
    pub fn attributes(&self, user_header: usize) -> Result<(GenlHeader, Attributes), Error> {
        let (genl, body) = self.genl_parts()?;
        if body.len() < user_header {
            return Err(Error::Truncated {
                what: "family header",
                needed: user_header,
                available: body.len(),
            });
        }
        Ok((genl, Attributes::parse(body.slice(user_header..))?))
    }

    /// Decodes the payload of an [`msg_type::ERROR`] message.
    pub fn error_message(&self) -> Result<ErrorMessage, Error> {
        if !self.is_error() {
            return Err(Error::UnexpectedType(self.header.ty));
        }
        ErrorMessage::decode(&self.payload)
    }
}

/// Body of an `NLMSG_ERROR` message. A zero code is an acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorMessage {
    /// Zero, or a negated errno.
    pub code: i32,
    /// The header of the request this error answers, when the kernel echoed it.
    pub original: Option<NlHeader>,
}

impl ErrorMessage {
    pub fn decode(payload: &[u8]) -> Result<Self, Error> {
        if payload.len() < 4 {
            return Err(Error::Truncated {
                what: "error message",
                needed: 4,
                available: payload.len(),
            });
        }

        let mut buf = payload;
        let code = buf.get_i32_ne();
        let original = (buf.remaining() >= NLMSG_HDRLEN).then(|| NlHeader::decode(&mut buf));
        Ok(Self { code, original })
    }

    #[inline]
    pub fn is_ack(&self) -> bool {
        self.code == 0
    }

    /// The positive errno carried by the message.
    #[inline]
    pub fn errno(&self) -> i32 {
        self.code.saturating_neg()
    }
}

/// Builds the attribute body of a generic netlink request.
#[derive(Debug, Default)]
pub struct Body {
    buf: BytesMut,
}

impl Body {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the body with a family-specific fixed header, such as the OVS
    /// `dp_ifindex` word.
    pub fn with_user_header(header: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_slice(header);
        Self { buf }
    }

    /// Appends the attributes written by `f`. Fails if one of them was too long to encode.
    pub fn put_attrs(&mut self, f: impl FnOnce(&mut AttrWriter<'_>)) -> Result<(), AttrError> {
        let mut attrs = AttrWriter::new(&mut self.buf);
        f(&mut attrs);
        attrs.finish()
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Datagram codec for netlink messages.
///
/// A single datagram carries one or more whole messages. [`Decoder::decode`] yields them
/// one at a time; because datagrams are never split, a partial message is malformed input
/// rather than a request for more bytes.
#[derive(Debug, Default)]
pub struct Codec;

impl Codec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for Codec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        if src.len() < NLMSG_HDRLEN {
            let available = src.len();
            src.clear();
            return Err(Error::Truncated { what: "netlink header", needed: NLMSG_HDRLEN, available });
        }

        let len = u32::from_ne_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len < NLMSG_HDRLEN {
            src.clear();
            return Err(Error::InvalidLength(len));
        }
        if len > src.len() {
            let available = src.len();
            src.clear();
            return Err(Error::Truncated { what: "netlink message", needed: len, available });
        }

        let mut frame = src.split_to(len);
        let header = NlHeader::decode(&mut frame);

        // The last message in a datagram may omit its padding.
        let padding = (align(len) - len).min(src.len());
        src.advance(padding);

        tracing::trace!(len, ty = header.ty, seq = header.seq, "Decoded message");

        Ok(Some(Message { header, payload: frame.freeze() }))
    }
}

impl Encoder<Message> for Codec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = NLMSG_HDRLEN + item.payload.len();
        if len > u32::MAX as usize {
            return Err(Error::InvalidLength(len));
        }

        dst.reserve(align(len));

        let header = NlHeader { len: len as u32, ..item.header };
        header.encode(dst);
        dst.put(item.payload);
        dst.resize(dst.len() + align(len) - len, 0);

        Ok(())
    }
}
