//! Packets crossing the kernel boundary: upcalls from the datapath and packets userspace
//! asks it to execute actions on.

use bytes::Bytes;
use vnet_flow::{action::encode_actions, FlowAction, FlowMatch};
use vnet_packet::{Ethernet, MalformedPacket};
use vnet_wire::{AttrWriter, Attributes};

use crate::{family::OvsMessage, DatapathError};

pub mod cmd {
    pub const MISS: u8 = 1;
    pub const ACTION: u8 = 2;
    pub const EXECUTE: u8 = 3;
}

pub mod attr {
    pub const PACKET: u16 = 1;
    pub const KEY: u16 = 2;
    pub const ACTIONS: u16 = 3;
    pub const USERDATA: u16 = 4;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpcallKind {
    /// No flow matched the packet.
    Miss,
    /// A userspace action sent the packet up.
    Action,
}

/// A packet the datapath sent to userspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upcall {
    pub kind: UpcallKind,
    pub datapath: i32,
    /// The packet as received, starting at the Ethernet header.
    pub packet: Bytes,
    /// The key the datapath extracted from the packet.
    pub flow_match: FlowMatch,
    /// Set by the userspace action that generated the upcall.
    pub userdata: Option<Bytes>,
}

impl Upcall {
    pub(crate) fn decode(msg: &OvsMessage) -> Result<Self, DatapathError> {
        let kind = match msg.header.cmd {
            cmd::MISS => UpcallKind::Miss,
            cmd::ACTION => UpcallKind::Action,
            _ => return Err(DatapathError::UnexpectedReply("packet command")),
        };

        Ok(Self {
            kind,
            datapath: msg.dp_ifindex,
            packet: msg.attrs.bytes(attr::PACKET)?.clone(),
            flow_match: FlowMatch::decode(&msg.attrs.nested(attr::KEY)?)?,
            userdata: msg.attrs.get(attr::USERDATA).map(|a| a.value().clone()),
        })
    }

    /// Decodes the packet.
    pub fn frame(&self) -> Result<Ethernet, MalformedPacket> {
        Ethernet::deserialize(&self.packet)
    }
}

pub(crate) fn encode_execute(
    packet: &[u8],
    flow_match: &FlowMatch,
    actions: &[FlowAction],
    w: &mut AttrWriter<'_>,
) {
    w.put(attr::PACKET, packet);
    w.nested(attr::KEY, |w| flow_match.encode(w));
    w.nested(attr::ACTIONS, |w| encode_actions(actions, w));
}

/// Splits an execute request back into its parts. Useful for fake kernels.
pub fn decode_execute(attrs: &Attributes) -> Result<(Bytes, FlowMatch, Vec<FlowAction>), DatapathError> {
    let packet = attrs.bytes(attr::PACKET)?.clone();
    let flow_match = FlowMatch::decode(&attrs.nested(attr::KEY)?)?;
    let actions = vnet_flow::action::decode_actions(&attrs.nested(attr::ACTIONS)?)?;
    Ok((packet, flow_match, actions))
}
