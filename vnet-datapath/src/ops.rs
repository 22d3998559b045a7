use async_trait::async_trait;
use vnet_flow::{Flow, FlowMatch};

use crate::{Datapath, DatapathError, OvsDatapathConnection, Port};

/// The datapath lookups the management and simulation layers depend on.
#[async_trait]
pub trait DatapathOps: Send + Sync {
    async fn datapath(&self, name: &str) -> Result<Datapath, DatapathError>;

    async fn ports(&self, datapath: &Datapath) -> Result<Vec<Port>, DatapathError>;

    /// Fails with [`DatapathError::PortNotFound`] when `name` is not a port of `datapath`.
    async fn port(&self, datapath: &Datapath, name: &str) -> Result<Port, DatapathError>;

    async fn flows(&self, datapath: &Datapath) -> Result<Vec<Flow>, DatapathError>;

    async fn flow(&self, datapath: &Datapath, flow_match: &FlowMatch) -> Result<Flow, DatapathError>;
}

#[async_trait]
impl DatapathOps for OvsDatapathConnection {
    async fn datapath(&self, name: &str) -> Result<Datapath, DatapathError> {
        self.get_datapath(name).await
    }

    async fn ports(&self, datapath: &Datapath) -> Result<Vec<Port>, DatapathError> {
        self.enumerate_ports(datapath).await
    }

    async fn port(&self, datapath: &Datapath, name: &str) -> Result<Port, DatapathError> {
        self.get_port(datapath, name).await
    }

    async fn flows(&self, datapath: &Datapath) -> Result<Vec<Flow>, DatapathError> {
        self.enumerate_flows(datapath).await
    }

    async fn flow(&self, datapath: &Datapath, flow_match: &FlowMatch) -> Result<Flow, DatapathError> {
        self.get_flow(datapath, flow_match).await
    }
}
