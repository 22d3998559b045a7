//! An in-process transport pair. The [`MemoryPeer`] plays the kernel side: it sees every
//! datagram the transport sends and decides what comes back.

use std::{
    io,
    sync::Arc,
    task::{Context, Poll},
};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tokio::sync::mpsc;

use crate::Transport;

type Datagram = io::Result<Bytes>;

/// Creates a connected transport and peer. The transport reports `port` as its port id.
pub fn pair(port: u32) -> (MemoryTransport, MemoryPeer) {
    let (to_peer, from_transport) = mpsc::unbounded_channel();
    let (to_transport, from_peer) = mpsc::unbounded_channel();
    let groups = Arc::new(Mutex::new(FxHashSet::default()));

    let transport =
        MemoryTransport { port, tx: to_peer, rx: from_peer, groups: Arc::clone(&groups) };
    let peer = MemoryPeer { port, tx: to_transport, rx: from_transport, groups };

    (transport, peer)
}

#[derive(Debug)]
pub struct MemoryTransport {
    port: u32,
    tx: mpsc::UnboundedSender<Bytes>,
    rx: mpsc::UnboundedReceiver<Datagram>,
    groups: Arc<Mutex<FxHashSet<u32>>>,
}

impl Transport for MemoryTransport {
    fn local_port(&self) -> u32 {
        self.port
    }

    fn poll_send(&mut self, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.tx.send(Bytes::copy_from_slice(buf)) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(_) => Poll::Ready(Err(io::ErrorKind::BrokenPipe.into())),
        }
    }

    fn poll_recv(&mut self, cx: &mut Context<'_>, buf: &mut BytesMut) -> Poll<io::Result<()>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(datagram))) => {
                buf.extend_from_slice(&datagram);
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Err(e)),
            Poll::Ready(None) => Poll::Ready(Err(io::ErrorKind::ConnectionReset.into())),
            Poll::Pending => Poll::Pending,
        }
    }

    fn join_group(&mut self, group: u32) -> io::Result<()> {
        self.groups.lock().insert(group);
        Ok(())
    }
}

/// The far end of a [`MemoryTransport`].
#[derive(Debug)]
pub struct MemoryPeer {
    port: u32,
    tx: mpsc::UnboundedSender<Datagram>,
    rx: mpsc::UnboundedReceiver<Bytes>,
    groups: Arc<Mutex<FxHashSet<u32>>>,
}

impl MemoryPeer {
    /// The port id of the transport side.
    pub fn port(&self) -> u32 {
        self.port
    }

    /// Waits for the next datagram sent by the transport. Returns `None` once the transport
    /// is dropped.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Returns a datagram if one is already queued.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    /// Delivers a datagram to the transport. Returns false if the transport is gone.
    pub fn send(&self, datagram: impl Into<Bytes>) -> bool {
        self.tx.send(Ok(datagram.into())).is_ok()
    }

    /// Makes the transport's next receive fail with `error`.
    pub fn fail(&self, error: io::Error) -> bool {
        self.tx.send(Err(error)).is_ok()
    }

    /// Whether the transport has joined `group`.
    pub fn is_member(&self, group: u32) -> bool {
        self.groups.lock().contains(&group)
    }
}
