use std::{
    collections::VecDeque,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use bytes::BytesMut;
use futures::Stream;
use rustc_hash::FxHashMap;
use tokio::{
    sync::{mpsc, oneshot},
    time::MissedTickBehavior,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;
use vnet_transport::Transport;
use vnet_wire::{Codec, Message};

use super::{
    driver::ExpiredHistory, Command, ConnectionDriver, ConnectionOptions, ConnectionStats,
    Request, Responder, Response, SharedState,
};
use crate::ConnectionError;

/// A handle to a netlink connection. Cloning it is cheap; every clone talks to the same
/// driver task, which owns the socket.
#[derive(Debug, Clone)]
pub struct NetlinkConnection {
    /// Command channel to the driver task.
    to_driver: mpsc::Sender<Command>,
    /// State shared with the driver task.
    state: Arc<SharedState>,
    port: u32,
}

impl NetlinkConnection {
    /// Spawns a driver for `transport` with default options. Must be called from within a
    /// tokio runtime.
    pub fn spawn<T: Transport>(transport: T) -> (Self, Notifications) {
        Self::with_options(transport, ConnectionOptions::default())
    }

    pub fn with_options<T: Transport>(
        transport: T,
        options: ConnectionOptions,
    ) -> (Self, Notifications) {
        let (to_driver, from_handle) = mpsc::channel(options.command_buffer_size.max(1));
        let (to_notifications, from_driver) =
            mpsc::channel(options.notification_buffer_size.max(1));

        let port = transport.local_port();
        let state = Arc::new(SharedState::default());

        let mut timeout_check_interval = tokio::time::interval(options.timeout_check_interval);
        timeout_check_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut pending = FxHashMap::default();
        pending.reserve(options.max_pending_requests.min(1024));

        let driver = ConnectionDriver {
            state: Arc::clone(&state),
            transport,
            port,
            seq: 0,
            codec: Codec::new(),
            from_handle,
            handles_dropped: false,
            egress_queue: VecDeque::new(),
            recv_buf: BytesMut::new(),
            pending,
            expired: ExpiredHistory::new(options.expired_history),
            to_notifications,
            timeout_check_interval,
            options: Arc::new(options),
        };

        debug!(port, "Spawning netlink connection driver");
        tokio::spawn(driver);

        (Self { to_driver, state, port }, Notifications::new(from_driver))
    }

    /// The netlink port id of the underlying socket.
    pub fn port_id(&self) -> u32 {
        self.port
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.state.stats
    }

    /// Sends a request and waits for its reply messages.
    ///
    /// Dropping the returned future cancels the request: the driver forgets it at its next
    /// timeout check and drops any late reply.
    pub async fn request(&self, request: Request) -> Response {
        let (response_tx, response_rx) = oneshot::channel();

        self.to_driver
            .send(Command::Send { request, responder: Responder::Channel(response_tx) })
            .await
            .map_err(|_| ConnectionError::Closed)?;

        response_rx.await.map_err(|_| ConnectionError::Closed)?
    }

    /// Sends a request and decodes its reply with `decode`.
    pub async fn request_map<R, F>(&self, request: Request, decode: F) -> Result<R, ConnectionError>
    where
        F: FnOnce(Vec<Message>) -> Result<R, ConnectionError>,
    {
        decode(self.request(request).await?)
    }

    /// Sends a request and resolves it through `callback`, which runs on the driver task
    /// exactly once: with the reply, a kernel error, a timeout or a connection failure.
    pub async fn request_with_callback<F>(&self, request: Request, callback: F)
    where
        F: FnOnce(Response) + Send + 'static,
    {
        let cmd = Command::Send { request, responder: Responder::Callback(Box::new(callback)) };
        if let Err(mpsc::error::SendError(cmd)) = self.to_driver.send(cmd).await {
            cmd.reject();
        }
    }

    /// Subscribes the socket to a multicast group. Messages sent to the group arrive on the
    /// [`Notifications`] stream.
    pub async fn join_group(&self, group: u32) -> Result<(), ConnectionError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.to_driver
            .send(Command::JoinGroup { group, response: response_tx })
            .await
            .map_err(|_| ConnectionError::Closed)?;

        response_rx.await.map_err(|_| ConnectionError::Closed)?
    }
}

/// Messages that no request claimed: multicast events and other unsolicited traffic.
#[derive(Debug)]
pub struct Notifications {
    inner: ReceiverStream<Message>,
}

impl Notifications {
    fn new(rx: mpsc::Receiver<Message>) -> Self {
        Self { inner: ReceiverStream::new(rx) }
    }
}

impl Stream for Notifications {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
