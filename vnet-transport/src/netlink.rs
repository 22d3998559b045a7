use std::{
    fmt, io,
    task::{Context, Poll},
};

use bytes::BytesMut;
use netlink_sys::{protocols::NETLINK_GENERIC, AsyncSocket, SocketAddr, TokioSocket};
use tracing::debug;

use crate::Transport;

/// Default size of a single receive: large enough for a full dump datagram.
const DEFAULT_RECV_CHUNK: usize = 64 * 1024;

/// Options for a kernel netlink socket.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// The protocol to open. Defaults to `NETLINK_GENERIC`.
    pub protocol: isize,
    /// Overrides `SO_RCVBUF` when set.
    pub recv_buffer_size: Option<usize>,
    /// Capacity reserved for every receive.
    pub recv_chunk_size: usize,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self { protocol: NETLINK_GENERIC, recv_buffer_size: None, recv_chunk_size: DEFAULT_RECV_CHUNK }
    }
}

impl SocketOptions {
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = Some(size);
        self
    }

    pub fn recv_chunk_size(mut self, size: usize) -> Self {
        self.recv_chunk_size = size;
        self
    }
}

/// A non-blocking kernel netlink socket registered with the tokio reactor.
pub struct NetlinkSocket {
    socket: TokioSocket,
    port: u32,
    options: SocketOptions,
}

impl fmt::Debug for NetlinkSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetlinkSocket").field("port", &self.port).finish_non_exhaustive()
    }
}

impl NetlinkSocket {
    /// Opens a generic netlink socket with default options.
    pub fn open() -> io::Result<Self> {
        Self::with_options(SocketOptions::default())
    }

    /// Opens a socket, binds it to a kernel-assigned port and connects it to the kernel.
    pub fn with_options(options: SocketOptions) -> io::Result<Self> {
        let mut socket = TokioSocket::new(options.protocol)?;

        let addr = socket.socket_mut().bind_auto()?;
        socket.socket_mut().connect(&SocketAddr::new(0, 0))?;

        if let Some(size) = options.recv_buffer_size {
            socket.socket_mut().set_rx_buf_sz(size)?;
        }

        let port = addr.port_number();
        debug!(port, protocol = options.protocol, "Opened netlink socket");

        Ok(Self { socket, port, options })
    }
}

impl Transport for NetlinkSocket {
    fn local_port(&self) -> u32 {
        self.port
    }

    fn poll_send(&mut self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.socket.poll_send(cx, buf)
    }

    fn poll_recv(&mut self, cx: &mut Context<'_>, buf: &mut BytesMut) -> Poll<io::Result<()>> {
        buf.reserve(self.options.recv_chunk_size);
        self.socket.poll_recv(cx, buf)
    }

    fn join_group(&mut self, group: u32) -> io::Result<()> {
        debug!(port = self.port, group, "Joining multicast group");
        self.socket.socket_mut().add_membership(group)
    }
}
