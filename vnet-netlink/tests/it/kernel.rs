//! A scripted stand-in for the kernel side of a netlink socket.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use vnet_transport::MemoryPeer;
use vnet_wire::{Codec, GenlHeader, Message, NlFlags};

pub const PORT: u32 = 4242;

pub struct Kernel {
    peer: MemoryPeer,
    codec: Codec,
}

impl Kernel {
    pub fn new(peer: MemoryPeer) -> Self {
        Self { peer, codec: Codec::new() }
    }

    pub fn peer(&self) -> &MemoryPeer {
        &self.peer
    }

    /// Waits for the next request datagram and decodes its single message.
    pub async fn recv(&mut self) -> Message {
        let datagram = self.peer.recv().await.expect("transport dropped");
        let mut buf = BytesMut::from(&datagram[..]);
        let msg = self.codec.decode(&mut buf).unwrap().expect("empty datagram");
        assert!(buf.is_empty(), "one request per datagram");
        msg
    }

    /// Sends all `messages` in one datagram.
    pub fn send(&mut self, messages: impl IntoIterator<Item = Message>) {
        let mut buf = BytesMut::new();
        for msg in messages {
            self.codec.encode(msg, &mut buf).unwrap();
        }
        assert!(self.peer.send(buf.freeze()));
    }
}

/// A generic netlink reply to `request` carrying `body`.
pub fn reply(request: &Message, flags: NlFlags, body: impl Into<Bytes>) -> Message {
    let (genl, _) = request.genl_parts().unwrap();
    let body = body.into();
    let mut msg = Message::genl(request.ty(), flags, GenlHeader::new(genl.cmd, genl.version), &body);
    msg.set_seq(request.seq());
    msg.set_pid(request.pid());
    msg
}

/// The body of a reply, as seen by the caller.
pub fn body(msg: &Message) -> Bytes {
    msg.genl_parts().unwrap().1
}
