use std::{
    io,
    task::{Context, Poll},
};

use bytes::BytesMut;

pub mod memory;
mod netlink;

pub use memory::{pair, MemoryPeer, MemoryTransport};
pub use netlink::{NetlinkSocket, SocketOptions};

/// A datagram transport carrying netlink messages.
///
/// Every call to [`Transport::poll_send`] sends exactly one datagram, and every successful
/// [`Transport::poll_recv`] appends exactly one datagram to the buffer. A datagram may hold
/// several netlink messages.
pub trait Transport: Send + Unpin + 'static {
    /// The netlink port id this transport is bound to.
    fn local_port(&self) -> u32;

    /// Attempts to send one datagram.
    fn poll_send(&mut self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>>;

    /// Attempts to receive one datagram into `buf`.
    fn poll_recv(&mut self, cx: &mut Context<'_>, buf: &mut BytesMut) -> Poll<io::Result<()>>;

    /// Subscribes to the multicast group with the given id.
    fn join_group(&mut self, group: u32) -> io::Result<()>;
}
