use std::{
    collections::VecDeque,
    future::Future,
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use bytes::{Buf, Bytes, BytesMut};
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    time::{Instant, Interval},
};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, error, trace, warn};
use vnet_transport::Transport;
use vnet_wire::{msg_type, Codec, Message};

use super::{Command, ConnectionOptions, Request, Responder, SharedState};
use crate::{ConnectionError, Errno};

/// The connection driver. Owns the transport and the pending request table, and runs
/// until every handle is gone and nothing is in flight, or the transport fails.
pub(crate) struct ConnectionDriver<T: Transport> {
    pub(crate) options: Arc<ConnectionOptions>,
    /// State shared with the handles.
    pub(crate) state: Arc<SharedState>,
    pub(crate) transport: T,
    /// Our netlink port id, stamped on every request.
    pub(crate) port: u32,
    /// The last sequence number handed out.
    pub(crate) seq: u32,
    pub(crate) codec: Codec,
    /// Commands from the connection handles.
    pub(crate) from_handle: mpsc::Receiver<Command>,
    /// Set once every handle has been dropped.
    pub(crate) handles_dropped: bool,
    /// Encoded datagrams waiting for the transport, with their sequence numbers.
    pub(crate) egress_queue: VecDeque<(u32, Bytes)>,
    pub(crate) recv_buf: BytesMut,
    /// Requests waiting for their reply, keyed by sequence number.
    pub(crate) pending: FxHashMap<u32, PendingRequest>,
    /// Sequence numbers whose requests already timed out or were cancelled.
    pub(crate) expired: ExpiredHistory,
    /// Unsolicited messages.
    pub(crate) to_notifications: mpsc::Sender<Message>,
    pub(crate) timeout_check_interval: Interval,
}

pub(crate) struct PendingRequest {
    start: Instant,
    deadline: Instant,
    /// Data messages received so far.
    parts: Vec<Message>,
    /// Whether the request completes at the kernel's ACK rather than its first reply.
    expects_ack: bool,
    responder: Responder,
}

impl<T: Transport> ConnectionDriver<T> {
    /// Hands out the next sequence number. Zero is skipped since the kernel uses it for
    /// multicast notifications.
    fn next_seq(&mut self) -> u32 {
        self.seq = self.seq.wrapping_add(1);
        if self.seq == 0 {
            self.seq = 1;
        }
        self.seq
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Send { request, responder } => self.on_request(request, responder),
            Command::JoinGroup { group, response } => {
                let result = self.transport.join_group(group).map_err(ConnectionError::Io);
                if result.is_ok() {
                    debug!(group, "Joined multicast group");
                }
                let _ = response.send(result);
            }
        }
    }

    /// Registers the request in the pending table, then queues its datagram.
    fn on_request(&mut self, request: Request, responder: Responder) {
        if self.pending.len() >= self.options.max_pending_requests {
            warn!(pending = self.pending.len(), "Rejecting request, too many pending");
            responder.respond(Err(ConnectionError::TooManyRequests));
            return;
        }

        let seq = self.next_seq();
        let start = Instant::now();
        let deadline = start + request.timeout.unwrap_or(self.options.timeout);
        let expects_ack = request.flags.contains(vnet_wire::NlFlags::ACK);

        let mut datagram = BytesMut::new();
        if let Err(e) = self.codec.encode(request.into_message(seq, self.port), &mut datagram) {
            responder.respond(Err(e.into()));
            return;
        }

        self.pending.insert(
            seq,
            PendingRequest { start, deadline, parts: Vec::new(), expects_ack, responder },
        );
        self.egress_queue.push_back((seq, datagram.freeze()));
        self.state.stats.increment_requests();

        trace!(seq, "Registered request");
    }

    /// Resolves and removes a pending request.
    fn complete(&mut self, seq: u32, result: Result<(), ConnectionError>) {
        let Some(pending) = self.pending.remove(&seq) else { return };

        let rtt = pending.start.elapsed().as_micros() as usize;
        self.state.stats.update_rtt(rtt);
        self.state.stats.increment_responses();

        debug!(seq, parts = pending.parts.len(), ok = result.is_ok(), "Request completed");
        pending.responder.respond(result.map(|_| pending.parts));
    }

    fn on_datagram(&mut self) {
        let mut datagram = self.recv_buf.split();
        self.state.stats.increment_rx(datagram.len());

        loop {
            match self.codec.decode(&mut datagram) {
                Ok(Some(msg)) => self.on_message(msg),
                Ok(None) => break,
                Err(e) => {
                    warn!(?e, "Dropping malformed datagram");
                    self.state.stats.increment_dropped();
                    break;
                }
            }
        }
    }

    fn on_message(&mut self, msg: Message) {
        let seq = msg.seq();

        if msg.ty() == msg_type::NOOP {
            return;
        }

        let Some(pending) = self.pending.get_mut(&seq) else {
            self.on_unmatched(msg);
            return;
        };

        match msg.ty() {
            msg_type::ERROR => {
                let result = match msg.error_message() {
                    Ok(err) if err.is_ack() => Ok(()),
                    Ok(err) => Err(ConnectionError::Protocol(Errno::from_code(err.code))),
                    Err(e) => Err(e.into()),
                };
                self.complete(seq, result);
            }
            msg_type::DONE => {
                // A failed dump reports its errno in the DONE payload.
                let mut payload = msg.payload().clone();
                let code = if payload.remaining() >= 4 { payload.get_i32_ne() } else { 0 };
                let result = if code < 0 {
                    Err(ConnectionError::Protocol(Errno::from_code(code)))
                } else {
                    Ok(())
                };
                self.complete(seq, result);
            }
            msg_type::OVERRUN => self.complete(seq, Err(ConnectionError::Overrun)),
            _ => {
                let done = !msg.is_multi() && !pending.expects_ack;
                pending.parts.push(msg);
                if done {
                    self.complete(seq, Ok(()));
                }
            }
        }
    }

    /// Routes a message that no pending request claims.
    fn on_unmatched(&mut self, msg: Message) {
        let seq = msg.seq();

        if seq != 0 && self.expired.contains(seq) {
            debug!(seq, "Dropping late reply");
            self.state.stats.increment_dropped();
            return;
        }

        match self.to_notifications.try_send(msg) {
            Ok(()) => self.state.stats.increment_notifications(),
            Err(TrySendError::Full(_)) => {
                warn!(seq, "Notification buffer full, dropping message");
                self.state.stats.increment_dropped();
            }
            Err(TrySendError::Closed(_)) => {
                trace!(seq, "No notification listener, dropping message");
                self.state.stats.increment_dropped();
            }
        }
    }

    /// Fails requests past their deadline and forgets requests whose caller went away.
    fn check_timeouts(&mut self) {
        let now = Instant::now();

        let expired = self
            .pending
            .iter()
            .filter(|(_, pending)| now >= pending.deadline || pending.responder.is_closed())
            .map(|(seq, _)| *seq)
            .collect::<Vec<_>>();

        for seq in expired {
            let Some(pending) = self.pending.remove(&seq) else { continue };
            self.expired.insert(seq);

            if pending.responder.is_closed() {
                debug!(seq, "Request cancelled by caller");
                self.state.stats.increment_cancelled();
            } else {
                debug!(seq, elapsed = ?pending.start.elapsed(), "Request timed out");
                self.state.stats.increment_timeouts();
                pending.responder.respond(Err(ConnectionError::Timeout));
            }
        }
    }

    /// Fails every pending request and every command still queued in the channel.
    fn shutdown(&mut self, kind: io::ErrorKind) {
        for (seq, pending) in self.pending.drain() {
            debug!(seq, "Failing request, connection lost");
            pending.responder.respond(Err(ConnectionError::ConnectionLost(kind)));
        }

        self.from_handle.close();
        while let Ok(cmd) = self.from_handle.try_recv() {
            cmd.reject();
        }
    }

    fn is_idle(&self) -> bool {
        self.handles_dropped && self.pending.is_empty() && self.egress_queue.is_empty()
    }
}

impl<T: Transport> Future for ConnectionDriver<T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        loop {
            // Polled until pending so the interval registers a waker for its next tick.
            while this.timeout_check_interval.poll_tick(cx).is_ready() {
                this.check_timeouts();
            }

            // Ingress: replies and notifications from the kernel
            match this.transport.poll_recv(cx, &mut this.recv_buf) {
                Poll::Ready(Ok(())) => {
                    this.on_datagram();
                    continue;
                }
                // The kernel dropped messages because our receive buffer was full. The socket
                // stays usable; affected requests run into their deadline.
                Poll::Ready(Err(e)) if e.raw_os_error() == Some(Errno::ENOBUFS.raw()) => {
                    warn!("Netlink receive buffer overrun, replies were lost");
                    this.recv_buf.clear();
                    continue;
                }
                Poll::Ready(Err(e)) => {
                    error!(?e, pending = this.pending.len(), "Netlink transport failed");
                    this.shutdown(e.kind());
                    return Poll::Ready(());
                }
                Poll::Pending => {}
            }

            // Egress: drain the outgoing queue
            if let Some((seq, datagram)) = this.egress_queue.front() {
                let seq = *seq;
                match this.transport.poll_send(cx, datagram) {
                    Poll::Ready(Ok(sent)) => {
                        trace!(seq, sent, "Sent request");
                        this.state.stats.increment_tx(sent);
                        this.egress_queue.pop_front();
                        continue;
                    }
                    Poll::Ready(Err(e)) => {
                        error!(seq, ?e, "Failed to send request");
                        this.egress_queue.pop_front();
                        this.complete(seq, Err(ConnectionError::Io(e)));
                        continue;
                    }
                    Poll::Pending => {}
                }
            }

            // Commands from the connection handles
            if !this.handles_dropped {
                match this.from_handle.poll_recv(cx) {
                    Poll::Ready(Some(cmd)) => {
                        this.on_command(cmd);
                        continue;
                    }
                    Poll::Ready(None) => {
                        debug!(pending = this.pending.len(), "All connection handles dropped");
                        this.handles_dropped = true;
                    }
                    Poll::Pending => {}
                }
            }

            if this.is_idle() {
                debug!("Connection idle, shutting down driver");
                return Poll::Ready(());
            }

            return Poll::Pending;
        }
    }
}

/// A bounded set of recently expired sequence numbers. The oldest entry is evicted first.
#[derive(Debug, Default)]
pub(crate) struct ExpiredHistory {
    capacity: usize,
    order: VecDeque<u32>,
    members: FxHashSet<u32>,
}

impl ExpiredHistory {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            members: FxHashSet::default(),
        }
    }

    pub(crate) fn insert(&mut self, seq: u32) {
        if self.capacity == 0 || !self.members.insert(seq) {
            return;
        }

        self.order.push_back(seq);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
    }

    pub(crate) fn contains(&self, seq: u32) -> bool {
        self.members.contains(&seq)
    }
}
