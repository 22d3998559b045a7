//! Netlink wire formats: the netlink and generic netlink headers, attribute streams and a
//! datagram codec.
//!
//! ```text
//! +--------------------+  nlmsghdr: len, type (family id), flags, seq, pid
//! | netlink header 16B |
//! +--------------------+  genlmsghdr: cmd, version, reserved
//! | genl header 4B     |
//! +--------------------+  family-specific fixed header (OVS: dp_ifindex)
//! | user header        |
//! +--------------------+  (len, type, value) triples, 4-byte aligned
//! | attributes ...     |
//! +--------------------+
//! ```
//!
//! Integers in headers and attributes are in host byte order unless an attribute says
//! otherwise.

use thiserror::Error;

pub mod attr;
pub mod header;
pub mod message;

pub use attr::{Attr, AttrError, AttrWriter, Attributes};
pub use header::{msg_type, GenlHeader, NlFlags, NlHeader, GENL_HDRLEN, NLMSG_HDRLEN};
pub use message::{Body, Codec, ErrorMessage, Message};

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0:?}")]
    Io(#[from] std::io::Error),
    #[error("{what} truncated: need {needed} bytes, {available} available")]
    Truncated { what: &'static str, needed: usize, available: usize },
    #[error("invalid netlink message length {0}")]
    InvalidLength(usize),
    #[error("unexpected message type {0}")]
    UnexpectedType(u16),
    #[error("attribute error: {0}")]
    Attr(#[from] AttrError),
}
