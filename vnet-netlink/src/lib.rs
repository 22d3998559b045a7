use std::io;

use thiserror::Error;
use vnet_wire::AttrError;

mod connection;
mod errno;
pub mod genl;

pub use connection::*;
pub use errno::Errno;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("IO error: {0:?}")]
    Io(#[from] io::Error),
    #[error("Wire protocol error: {0}")]
    Wire(#[from] vnet_wire::Error),
    #[error("Attribute error: {0}")]
    Attr(#[from] AttrError),
    #[error("Kernel returned {0}")]
    Protocol(Errno),
    #[error("Request timed out")]
    Timeout,
    #[error("Connection closed")]
    Closed,
    #[error("Too many pending requests")]
    TooManyRequests,
    #[error("Expected a reply, kernel sent none")]
    EmptyReply,
    #[error("Kernel dropped replies (overrun)")]
    Overrun,
    #[error("Connection lost: {0:?}")]
    ConnectionLost(io::ErrorKind),
}

impl ConnectionError {
    /// The errno returned by the kernel, if this is a protocol error.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Self::Protocol(errno) => Some(*errno),
            _ => None,
        }
    }

    /// Whether the kernel reported that the addressed object does not exist.
    pub fn is_not_found(&self) -> bool {
        self.errno().is_some_and(|errno| errno.is_not_found())
    }
}
