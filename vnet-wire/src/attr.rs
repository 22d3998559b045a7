//! Netlink attributes: `(length, type, value)` triples padded to 4 bytes.
//!
//! ```text
//!  0                   1                   2                   3
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |        Length (incl. hdr)     |N|O|         Type              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Value (padded to 4)                       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! `N` marks a nested attribute and `O` a value in network byte order. Both flags are
//! masked off by [`Attr::kind`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::header::align;

/// Length of an attribute header.
pub const NLA_HDRLEN: usize = 4;
pub const NLA_F_NESTED: u16 = 1 << 15;
pub const NLA_F_NET_BYTEORDER: u16 = 1 << 14;
pub const NLA_TYPE_MASK: u16 = !(NLA_F_NESTED | NLA_F_NET_BYTEORDER);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttrError {
    #[error("attribute {0} is missing")]
    Missing(u16),
    #[error("attribute {kind} has {actual} bytes, expected {expected}")]
    InvalidLength { kind: u16, expected: usize, actual: usize },
    #[error("attribute {kind} has invalid value {value}")]
    InvalidValue { kind: u16, value: u64 },
    #[error("attribute {0} is not a valid string")]
    InvalidString(u16),
    #[error("attribute declares {declared} bytes but only {remaining} remain")]
    Overrun { declared: usize, remaining: usize },
    #[error("attribute length {0} is shorter than its header")]
    TooShort(usize),
    #[error("attribute {kind} needs {len} bytes, more than its length field can hold")]
    TooLong { kind: u16, len: usize },
}

/// A single decoded attribute. The value shares the datagram buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Attr {
    ty: u16,
    value: Bytes,
}

impl Attr {
    pub fn new(ty: u16, value: Bytes) -> Self {
        Self { ty, value }
    }

    /// The attribute type with the nested and byte-order flags removed.
    #[inline]
    pub fn kind(&self) -> u16 {
        self.ty & NLA_TYPE_MASK
    }

    /// The type as it appeared on the wire.
    #[inline]
    pub fn raw_type(&self) -> u16 {
        self.ty
    }

    #[inline]
    pub fn is_nested(&self) -> bool {
        self.ty & NLA_F_NESTED != 0
    }

    #[inline]
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    #[inline]
    pub fn into_value(self) -> Bytes {
        self.value
    }

    fn exact<const N: usize>(&self) -> Result<[u8; N], AttrError> {
        self.value.as_ref().try_into().map_err(|_| AttrError::InvalidLength {
            kind: self.kind(),
            expected: N,
            actual: self.value.len(),
        })
    }

    pub fn as_u8(&self) -> Result<u8, AttrError> {
        self.exact::<1>().map(|b| b[0])
    }

    pub fn as_u16(&self) -> Result<u16, AttrError> {
        self.exact().map(u16::from_ne_bytes)
    }

    pub fn as_u32(&self) -> Result<u32, AttrError> {
        self.exact().map(u32::from_ne_bytes)
    }

    pub fn as_u64(&self) -> Result<u64, AttrError> {
        self.exact().map(u64::from_ne_bytes)
    }

    pub fn as_i32(&self) -> Result<i32, AttrError> {
        self.exact().map(i32::from_ne_bytes)
    }

    pub fn as_be16(&self) -> Result<u16, AttrError> {
        self.exact().map(u16::from_be_bytes)
    }

    pub fn as_be32(&self) -> Result<u32, AttrError> {
        self.exact().map(u32::from_be_bytes)
    }

    pub fn as_be64(&self) -> Result<u64, AttrError> {
        self.exact().map(u64::from_be_bytes)
    }

    /// Interprets the value as a string. A single trailing NUL is accepted; interior NULs
    /// and invalid UTF-8 are rejected.
    pub fn as_str(&self) -> Result<&str, AttrError> {
        let raw = self.value.as_ref();
        let raw = raw.strip_suffix(&[0]).unwrap_or(raw);
        if raw.contains(&0) {
            return Err(AttrError::InvalidString(self.kind()));
        }
        std::str::from_utf8(raw).map_err(|_| AttrError::InvalidString(self.kind()))
    }

    /// Parses the value as a nested attribute stream.
    pub fn as_nested(&self) -> Result<Attributes, AttrError> {
        Attributes::parse(self.value.clone())
    }
}

/// An ordered attribute stream. Lookups return the first attribute of a given kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    attrs: Vec<Attr>,
}

macro_rules! typed_getters {
    ($($name:ident, $opt:ident, $conv:ident -> $ty:ty;)*) => {
        $(
            /// Fails with [`AttrError::Missing`] when absent, or the conversion error when
            /// present with the wrong shape.
            pub fn $name(&self, kind: u16) -> Result<$ty, AttrError> {
                self.require(kind)?.$conv()
            }

            /// `Ok(None)` when absent; an error only when present with the wrong shape.
            pub fn $opt(&self, kind: u16) -> Result<Option<$ty>, AttrError> {
                self.get(kind).map(Attr::$conv).transpose()
            }
        )*
    };
}

impl Attributes {
    /// Parses `buf` into attributes, validating every declared length against the bytes
    /// that remain.
    pub fn parse(mut buf: Bytes) -> Result<Self, AttrError> {
        let mut attrs = Vec::new();

        while buf.has_remaining() {
            let remaining = buf.remaining();
            if remaining < NLA_HDRLEN {
                return Err(AttrError::Overrun { declared: NLA_HDRLEN, remaining });
            }

            let len = u16::from_ne_bytes([buf[0], buf[1]]) as usize;
            let ty = u16::from_ne_bytes([buf[2], buf[3]]);

            if len < NLA_HDRLEN {
                return Err(AttrError::TooShort(len));
            }
            if len > remaining {
                return Err(AttrError::Overrun { declared: len, remaining });
            }

            let value = buf.slice(NLA_HDRLEN..len);
            attrs.push(Attr { ty, value });

            // The final attribute may omit its padding.
            buf.advance(align(len).min(remaining));
        }

        Ok(Self { attrs })
    }

    pub fn get(&self, kind: u16) -> Option<&Attr> {
        self.attrs.iter().find(|a| a.kind() == kind)
    }

    pub fn contains(&self, kind: u16) -> bool {
        self.get(kind).is_some()
    }

    pub fn require(&self, kind: u16) -> Result<&Attr, AttrError> {
        self.get(kind).ok_or(AttrError::Missing(kind))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Attr> {
        self.attrs.iter()
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    typed_getters! {
        u8, opt_u8, as_u8 -> u8;
        u16, opt_u16, as_u16 -> u16;
        u32, opt_u32, as_u32 -> u32;
        u64, opt_u64, as_u64 -> u64;
        i32, opt_i32, as_i32 -> i32;
        be16, opt_be16, as_be16 -> u16;
        be32, opt_be32, as_be32 -> u32;
        be64, opt_be64, as_be64 -> u64;
        nested, opt_nested, as_nested -> Attributes;
    }

    pub fn string(&self, kind: u16) -> Result<&str, AttrError> {
        self.require(kind)?.as_str()
    }

    pub fn opt_string(&self, kind: u16) -> Result<Option<&str>, AttrError> {
        self.get(kind).map(Attr::as_str).transpose()
    }

    pub fn bytes(&self, kind: u16) -> Result<&Bytes, AttrError> {
        self.require(kind).map(Attr::value)
    }
}

impl<'a> IntoIterator for &'a Attributes {
    type Item = &'a Attr;
    type IntoIter = std::slice::Iter<'a, Attr>;

    fn into_iter(self) -> Self::IntoIter {
        self.attrs.iter()
    }
}

impl IntoIterator for Attributes {
    type Item = Attr;
    type IntoIter = std::vec::IntoIter<Attr>;

    fn into_iter(self) -> Self::IntoIter {
        self.attrs.into_iter()
    }
}

/// Appends attributes to a buffer, padding each one to the netlink alignment.
///
/// Writes chain, so an attribute that doesn't fit its 16-bit length is not written and
/// the writer remembers the first such failure. Check it with [`AttrWriter::finish`].
#[derive(Debug)]
pub struct AttrWriter<'a> {
    buf: &'a mut BytesMut,
    error: Option<AttrError>,
}

impl<'a> AttrWriter<'a> {
    pub fn new(buf: &'a mut BytesMut) -> Self {
        Self { buf, error: None }
    }

    /// Fails with the first attribute that didn't fit.
    pub fn finish(self) -> Result<(), AttrError> {
        self.error.map_or(Ok(()), Err)
    }

    fn fail(&mut self, err: AttrError) {
        self.error.get_or_insert(err);
    }

    /// Writes a raw attribute.
    pub fn put(&mut self, kind: u16, value: &[u8]) -> &mut Self {
        let len = NLA_HDRLEN + value.len();
        let Ok(wire_len) = u16::try_from(len) else {
            self.fail(AttrError::TooLong { kind, len });
            return self;
        };

        self.buf.reserve(align(len));
        self.buf.put_u16_ne(wire_len);
        self.buf.put_u16_ne(kind);
        self.buf.put_slice(value);
        self.pad();
        self
    }

    /// Writes an attribute without a value.
    pub fn put_flag(&mut self, kind: u16) -> &mut Self {
        self.put(kind, &[])
    }

    pub fn put_u8(&mut self, kind: u16, value: u8) -> &mut Self {
        self.put(kind, &[value])
    }

    pub fn put_u16(&mut self, kind: u16, value: u16) -> &mut Self {
        self.put(kind, &value.to_ne_bytes())
    }

    pub fn put_u32(&mut self, kind: u16, value: u32) -> &mut Self {
        self.put(kind, &value.to_ne_bytes())
    }

    pub fn put_u64(&mut self, kind: u16, value: u64) -> &mut Self {
        self.put(kind, &value.to_ne_bytes())
    }

    pub fn put_i32(&mut self, kind: u16, value: i32) -> &mut Self {
        self.put(kind, &value.to_ne_bytes())
    }

    pub fn put_be16(&mut self, kind: u16, value: u16) -> &mut Self {
        self.put(kind, &value.to_be_bytes())
    }

    pub fn put_be32(&mut self, kind: u16, value: u32) -> &mut Self {
        self.put(kind, &value.to_be_bytes())
    }

    pub fn put_be64(&mut self, kind: u16, value: u64) -> &mut Self {
        self.put(kind, &value.to_be_bytes())
    }

    /// Writes a NUL-terminated string.
    pub fn put_str(&mut self, kind: u16, value: &str) -> &mut Self {
        let mut raw = Vec::with_capacity(value.len() + 1);
        raw.extend_from_slice(value.as_bytes());
        raw.push(0);
        self.put(kind, &raw)
    }

    /// Writes a nested attribute whose value is produced by `f`. The length is patched in
    /// once `f` returns.
    pub fn nested<F>(&mut self, kind: u16, f: F) -> &mut Self
    where
        F: FnOnce(&mut AttrWriter<'_>),
    {
        let start = self.buf.len();
        self.buf.put_u16_ne(0);
        self.buf.put_u16_ne(kind | NLA_F_NESTED);

        let mut inner = AttrWriter::new(&mut *self.buf);
        f(&mut inner);
        if let Some(err) = inner.error {
            self.fail(err);
        }

        let len = self.buf.len() - start;
        match u16::try_from(len) {
            Ok(wire_len) => {
                self.buf[start..start + 2].copy_from_slice(&wire_len.to_ne_bytes());
                self.pad();
            }
            Err(_) => {
                self.buf.truncate(start);
                self.fail(AttrError::TooLong { kind, len });
            }
        }
        self
    }

    fn pad(&mut self) {
        let padded = align(self.buf.len());
        self.buf.resize(padded, 0);
    }
}
