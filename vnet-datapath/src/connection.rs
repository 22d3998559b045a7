use std::sync::Arc;

use tracing::debug;
use vnet_flow::{Flow, FlowAction, FlowMatch};
use vnet_netlink::{genl, ConnectionError, NetlinkConnection, Notifications, Request};
use vnet_wire::{AttrError, NlFlags};

use crate::{
    datapath::{self, Datapath},
    event::DatapathEvents,
    family::{
        cmd, Families, Kind, OvsMessage, DATAPATH_FAMILY, FLOW_FAMILY, PACKET_FAMILY,
        VPORT_FAMILY, VPORT_MCGROUP,
    },
    packet::{self, encode_execute},
    port::{self, Port, PortSpec},
    DatapathError,
};

/// Open vSwitch datapath operations on top of a [`NetlinkConnection`].
///
/// Cloning is cheap and every clone shares the connection.
#[derive(Debug, Clone)]
pub struct OvsDatapathConnection {
    conn: NetlinkConnection,
    families: Arc<Families>,
}

async fn resolve(conn: &NetlinkConnection, name: &'static str) -> Result<genl::Family, DatapathError> {
    genl::resolve_family(conn, name).await.map_err(|e| {
        if e.is_not_found() {
            DatapathError::MissingFamily(name)
        } else {
            e.into()
        }
    })
}

/// Maps a kernel "no such object" error to `not_found`, leaving every other error alone.
fn or_not_found(err: DatapathError, not_found: impl FnOnce() -> DatapathError) -> DatapathError {
    match err {
        DatapathError::Connection(e) if e.is_not_found() => not_found(),
        other => other,
    }
}

fn first<T>(
    replies: &[OvsMessage],
    decode: impl FnOnce(&OvsMessage) -> Result<T, AttrError>,
) -> Result<T, DatapathError> {
    let reply = replies.first().ok_or(ConnectionError::EmptyReply)?;
    Ok(decode(reply)?)
}

fn all<T>(
    replies: &[OvsMessage],
    decode: impl Fn(&OvsMessage) -> Result<T, AttrError>,
) -> Result<Vec<T>, DatapathError> {
    replies.iter().map(|reply| decode(reply).map_err(Into::into)).collect()
}

impl OvsDatapathConnection {
    /// Resolves the OVS generic netlink families. Fails with
    /// [`DatapathError::MissingFamily`] when the kernel module isn't loaded.
    pub async fn initialize(conn: NetlinkConnection) -> Result<Self, DatapathError> {
        let (datapath, vport, flow, packet) = futures::try_join!(
            resolve(&conn, DATAPATH_FAMILY),
            resolve(&conn, VPORT_FAMILY),
            resolve(&conn, FLOW_FAMILY),
            resolve(&conn, PACKET_FAMILY),
        )?;

        debug!(
            datapath = datapath.id,
            vport = vport.id,
            flow = flow.id,
            packet = packet.id,
            "Resolved datapath families"
        );

        Ok(Self { conn, families: Arc::new(Families { datapath, vport, flow, packet }) })
    }

    pub fn connection(&self) -> &NetlinkConnection {
        &self.conn
    }

    pub fn families(&self) -> &Families {
        &self.families
    }

    /// Decodes the notifications of the underlying connection. Upcalls and, after
    /// [`subscribe_port_events`](Self::subscribe_port_events), port changes arrive here.
    pub fn events(&self, notifications: Notifications) -> DatapathEvents {
        DatapathEvents::new(notifications, Arc::clone(&self.families))
    }

    async fn call(&self, request: Request) -> Result<Vec<OvsMessage>, DatapathError> {
        let replies = self.conn.request(request).await?;
        replies.iter().map(OvsMessage::parse).collect()
    }

    pub async fn enumerate_datapaths(&self) -> Result<Vec<Datapath>, DatapathError> {
        let request = self.families.request(Kind::Datapath, cmd::GET, 0, |_| {})?.dump();
        all(&self.call(request).await?, Datapath::decode)
    }

    pub async fn get_datapath(&self, name: &str) -> Result<Datapath, DatapathError> {
        let request = self.families.request(Kind::Datapath, cmd::GET, 0, |w| {
            w.put_str(datapath::attr::NAME, name);
        })?;

        let replies = self
            .call(request)
            .await
            .map_err(|e| or_not_found(e, || DatapathError::DatapathNotFound(name.to_owned())))?;
        first(&replies, Datapath::decode)
    }

    /// Creates a datapath whose misses are sent to this connection.
    pub async fn create_datapath(&self, name: &str) -> Result<Datapath, DatapathError> {
        let upcall_pid = self.conn.port_id();
        let request = self
            .families
            .request(Kind::Datapath, cmd::NEW, 0, |w| {
                w.put_str(datapath::attr::NAME, name).put_u32(datapath::attr::UPCALL_PID, upcall_pid);
            })?
            .with_flags(NlFlags::ECHO)
            .ack();

        let datapath = first(&self.call(request).await?, Datapath::decode)?;
        debug!(name, index = datapath.index, "Created datapath");
        Ok(datapath)
    }

    pub async fn delete_datapath(&self, datapath: &Datapath) -> Result<(), DatapathError> {
        let request = self
            .families
            .request(Kind::Datapath, cmd::DEL, datapath.index, |w| {
                w.put_str(datapath::attr::NAME, &datapath.name);
            })?
            .ack();

        self.call(request)
            .await
            .map_err(|e| or_not_found(e, || DatapathError::DatapathNotFound(datapath.name.clone())))?;
        debug!(name = %datapath.name, "Deleted datapath");
        Ok(())
    }

    pub async fn enumerate_ports(&self, datapath: &Datapath) -> Result<Vec<Port>, DatapathError> {
        let request = self.families.request(Kind::Vport, cmd::GET, datapath.index, |_| {})?.dump();
        all(&self.call(request).await?, Port::decode)
    }

    /// Looks up a port by interface name. An interface that isn't a port of `datapath`
    /// fails with [`DatapathError::PortNotFound`].
    pub async fn get_port(&self, datapath: &Datapath, name: &str) -> Result<Port, DatapathError> {
        let request = self.families.request(Kind::Vport, cmd::GET, datapath.index, |w| {
            w.put_str(port::attr::NAME, name);
        })?;

        let replies = self
            .call(request)
            .await
            .map_err(|e| or_not_found(e, || DatapathError::PortNotFound(name.to_owned())))?;
        first(&replies, Port::decode)
    }

    pub async fn get_port_by_number(&self, datapath: &Datapath, number: u32) -> Result<Port, DatapathError> {
        let request = self.families.request(Kind::Vport, cmd::GET, datapath.index, |w| {
            w.put_u32(port::attr::PORT_NO, number);
        })?;

        let replies = self
            .call(request)
            .await
            .map_err(|e| or_not_found(e, || DatapathError::PortNotFound(format!("#{number}"))))?;
        first(&replies, Port::decode)
    }

    pub async fn create_port(&self, datapath: &Datapath, spec: &PortSpec) -> Result<Port, DatapathError> {
        let upcall_pid = self.conn.port_id();
        let request = self
            .families
            .request(Kind::Vport, cmd::NEW, datapath.index, |w| spec.encode(upcall_pid, w))?
            .with_flags(NlFlags::ECHO)
            .ack();

        let port = first(&self.call(request).await?, Port::decode)?;
        debug!(name = %port.name, number = port.number, port_type = %port.port_type, "Created port");
        Ok(port)
    }

    pub async fn delete_port(&self, port: &Port) -> Result<(), DatapathError> {
        let request = self
            .families
            .request(Kind::Vport, cmd::DEL, port.datapath, |w| {
                w.put_u32(port::attr::PORT_NO, port.number);
            })?
            .ack();

        self.call(request)
            .await
            .map_err(|e| or_not_found(e, || DatapathError::PortNotFound(port.name.clone())))?;
        debug!(name = %port.name, number = port.number, "Deleted port");
        Ok(())
    }

    /// Installs `flow`. Returns the flow as the datapath reports it, or `flow` itself when
    /// the datapath doesn't echo it.
    pub async fn create_flow(&self, datapath: &Datapath, flow: &Flow) -> Result<Flow, DatapathError> {
        let request = self
            .families
            .request(Kind::Flow, cmd::NEW, datapath.index, |w| flow.encode(w))?
            .with_flags(NlFlags::ECHO)
            .ack();

        let replies = self.call(request).await?;
        match replies.first() {
            Some(reply) => Ok(Flow::decode(&reply.attrs)?),
            None => Ok(flow.clone()),
        }
    }

    pub async fn get_flow(&self, datapath: &Datapath, flow_match: &FlowMatch) -> Result<Flow, DatapathError> {
        let request = self.families.request(Kind::Flow, cmd::GET, datapath.index, |w| {
            w.nested(vnet_flow::flow::attr::KEY, |w| flow_match.encode(w));
        })?;

        let replies = self
            .call(request)
            .await
            .map_err(|e| or_not_found(e, || DatapathError::FlowNotFound))?;
        first(&replies, |reply| Flow::decode(&reply.attrs))
    }

    pub async fn delete_flow(&self, datapath: &Datapath, flow_match: &FlowMatch) -> Result<(), DatapathError> {
        let request = self
            .families
            .request(Kind::Flow, cmd::DEL, datapath.index, |w| {
                w.nested(vnet_flow::flow::attr::KEY, |w| flow_match.encode(w));
            })?
            .ack();

        self.call(request).await.map_err(|e| or_not_found(e, || DatapathError::FlowNotFound))?;
        Ok(())
    }

    pub async fn enumerate_flows(&self, datapath: &Datapath) -> Result<Vec<Flow>, DatapathError> {
        let request = self.families.request(Kind::Flow, cmd::GET, datapath.index, |_| {})?.dump();
        all(&self.call(request).await?, |reply| Flow::decode(&reply.attrs))
    }

    /// Removes every flow of `datapath`.
    pub async fn flush_flows(&self, datapath: &Datapath) -> Result<(), DatapathError> {
        let request = self.families.request(Kind::Flow, cmd::DEL, datapath.index, |_| {})?.ack();
        self.call(request).await?;
        debug!(name = %datapath.name, "Flushed flows");
        Ok(())
    }

    /// Has the datapath apply `actions` to `packet` as if it had arrived with `flow_match`.
    pub async fn execute_packet(
        &self,
        datapath: &Datapath,
        packet: &[u8],
        flow_match: &FlowMatch,
        actions: &[FlowAction],
    ) -> Result<(), DatapathError> {
        let request = self
            .families
            .request(Kind::Packet, packet::cmd::EXECUTE, datapath.index, |w| {
                encode_execute(packet, flow_match, actions, w)
            })?
            .ack();

        self.call(request).await?;
        Ok(())
    }

    /// Joins the vport multicast group so port creation and deletion show up as
    /// [`DatapathEvent`](crate::DatapathEvent)s.
    pub async fn subscribe_port_events(&self) -> Result<(), DatapathError> {
        let group = self
            .families
            .vport
            .mcast_group(VPORT_MCGROUP)
            .ok_or(DatapathError::MissingGroup(VPORT_MCGROUP))?;

        self.conn.join_group(group).await?;
        debug!(group, "Subscribed to port events");
        Ok(())
    }
}
