use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::Stream;
use tracing::trace;
use vnet_netlink::Notifications;
use vnet_wire::Message;

use crate::{
    family::{cmd, Families, Kind, OvsMessage},
    packet::Upcall,
    port::Port,
    DatapathError,
};

/// Something the datapath told us without being asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatapathEvent {
    PortCreated(Port),
    PortDeleted(Port),
    Upcall(Upcall),
    /// Any other unsolicited message, left undecoded.
    Other(Message),
}

impl DatapathEvent {
    pub(crate) fn decode(families: &Families, msg: Message) -> Result<Self, DatapathError> {
        let event = match families.kind(msg.ty()) {
            Some(Kind::Vport) => {
                let ovs = OvsMessage::parse(&msg)?;
                match ovs.header.cmd {
                    cmd::NEW => Self::PortCreated(Port::decode(&ovs)?),
                    cmd::DEL => Self::PortDeleted(Port::decode(&ovs)?),
                    _ => Self::Other(msg),
                }
            }
            Some(Kind::Packet) => Self::Upcall(Upcall::decode(&OvsMessage::parse(&msg)?)?),
            _ => Self::Other(msg),
        };

        trace!(?event, "Datapath event");
        Ok(event)
    }
}

/// The notifications of a connection, decoded into [`DatapathEvent`]s. A message that
/// fails to decode yields an error and the stream carries on.
#[derive(Debug)]
pub struct DatapathEvents {
    notifications: Notifications,
    families: Arc<Families>,
}

impl DatapathEvents {
    pub(crate) fn new(notifications: Notifications, families: Arc<Families>) -> Self {
        Self { notifications, families }
    }
}

impl Stream for DatapathEvents {
    type Item = Result<DatapathEvent, DatapathError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.notifications)
            .poll_next(cx)
            .map(|msg| msg.map(|msg| DatapathEvent::decode(&this.families, msg)))
    }
}
