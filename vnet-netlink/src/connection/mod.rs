use std::{fmt, time::Duration};

use bytes::Bytes;
use tokio::sync::oneshot;
use vnet_wire::{GenlHeader, Message, NlFlags};

use crate::ConnectionError;

mod driver;
mod socket;
mod stats;

use driver::ConnectionDriver;
pub use socket::*;
pub use stats::ConnectionStats;

const DEFAULT_BUFFER_SIZE: usize = 1024;

/// The outcome of a request: every data message the kernel sent in reply, in arrival order.
pub type Response = Result<Vec<Message>, ConnectionError>;

/// A completion callback. It runs on the driver task, exactly once.
pub type Callback = Box<dyn FnOnce(Response) + Send + 'static>;

/// A generic netlink request. The sequence and port ids are assigned by the connection.
#[derive(Debug, Clone)]
pub struct Request {
    pub(crate) family: u16,
    pub(crate) header: GenlHeader,
    pub(crate) flags: NlFlags,
    pub(crate) body: Bytes,
    pub(crate) timeout: Option<Duration>,
}

impl Request {
    pub fn new(family: u16, command: u8, version: u8) -> Self {
        Self {
            family,
            header: GenlHeader::new(command, version),
            flags: NlFlags::REQUEST,
            body: Bytes::new(),
            timeout: None,
        }
    }

    /// Sets the bytes following the generic netlink header.
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// Adds flags on top of `NLM_F_REQUEST`.
    pub fn with_flags(mut self, flags: NlFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Marks the request as a dump; it completes when the kernel sends `NLMSG_DONE`.
    pub fn dump(self) -> Self {
        self.with_flags(NlFlags::DUMP)
    }

    /// Asks the kernel for an acknowledgement; the request completes when it arrives.
    pub fn ack(self) -> Self {
        self.with_flags(NlFlags::ACK)
    }

    /// Overrides the connection-wide timeout for this request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn family(&self) -> u16 {
        self.family
    }

    pub fn command(&self) -> u8 {
        self.header.cmd
    }

    pub fn flags(&self) -> NlFlags {
        self.flags
    }

    pub(crate) fn into_message(self, seq: u32, pid: u32) -> Message {
        let mut msg = Message::genl(self.family, self.flags, self.header, &self.body);
        msg.set_seq(seq);
        msg.set_pid(pid);
        msg
    }
}

pub(crate) enum Responder {
    Channel(oneshot::Sender<Response>),
    Callback(Callback),
}

impl Responder {
    /// Consumes the responder, so a request can only ever be resolved once.
    pub(crate) fn respond(self, response: Response) {
        match self {
            Self::Channel(tx) => {
                let _ = tx.send(response);
            }
            Self::Callback(callback) => callback(response),
        }
    }

    /// Whether the caller has stopped waiting.
    pub(crate) fn is_closed(&self) -> bool {
        match self {
            Self::Channel(tx) => tx.is_closed(),
            Self::Callback(_) => false,
        }
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Channel(_) => f.write_str("Responder::Channel"),
            Self::Callback(_) => f.write_str("Responder::Callback"),
        }
    }
}

#[derive(Debug)]
pub(crate) enum Command {
    Send { request: Request, responder: Responder },
    JoinGroup { group: u32, response: oneshot::Sender<Result<(), ConnectionError>> },
}

impl Command {
    /// Resolves a command that never reached the driver.
    pub(crate) fn reject(self) {
        match self {
            Self::Send { responder, .. } => responder.respond(Err(ConnectionError::Closed)),
            Self::JoinGroup { response, .. } => {
                let _ = response.send(Err(ConnectionError::Closed));
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Deadline applied to requests that don't set their own.
    pub timeout: Duration,
    /// How often pending requests are checked for expired deadlines.
    pub timeout_check_interval: Duration,
    /// Requests beyond this many in flight fail with [`ConnectionError::TooManyRequests`].
    pub max_pending_requests: usize,
    /// Capacity of the channel between connection handles and the driver.
    pub command_buffer_size: usize,
    /// Capacity of the notification stream. Notifications are dropped when it is full.
    pub notification_buffer_size: usize,
    /// How many expired or cancelled sequence numbers are remembered so that their late
    /// replies are dropped instead of being reported as notifications.
    pub expired_history: usize,
}

impl ConnectionOptions {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout_check_interval(mut self, interval: Duration) -> Self {
        self.timeout_check_interval = interval;
        self
    }

    pub fn max_pending_requests(mut self, max: usize) -> Self {
        self.max_pending_requests = max;
        self
    }

    pub fn notification_buffer_size(mut self, size: usize) -> Self {
        self.notification_buffer_size = size;
        self
    }

    pub fn expired_history(mut self, len: usize) -> Self {
        self.expired_history = len;
        self
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            timeout_check_interval: Duration::from_millis(100),
            max_pending_requests: 4096,
            command_buffer_size: DEFAULT_BUFFER_SIZE,
            notification_buffer_size: DEFAULT_BUFFER_SIZE,
            expired_history: 256,
        }
    }
}

/// State shared between the driver and every connection handle.
#[derive(Debug, Default)]
pub(crate) struct SharedState {
    pub(crate) stats: ConnectionStats,
}
