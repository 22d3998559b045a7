use vnet_wire::{AttrError, AttrWriter, Attributes};

use crate::{
    action::{decode_actions, encode_actions, FlowAction},
    flow_match::FlowMatch,
};

pub mod attr {
    pub const KEY: u16 = 1;
    pub const ACTIONS: u16 = 2;
    pub const STATS: u16 = 3;
    pub const TCP_FLAGS: u16 = 4;
    pub const USED: u16 = 5;
    pub const CLEAR: u16 = 6;
    pub const MASK: u16 = 7;
}

/// Packet and byte counters of an installed flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlowStats {
    pub packets: u64,
    pub bytes: u64,
}

impl FlowStats {
    const LEN: usize = 16;
}

/// A datapath flow: an exact match and the actions applied to packets hitting it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Flow {
    pub flow_match: FlowMatch,
    pub actions: Vec<FlowAction>,
    /// Reported by the datapath, never sent.
    pub stats: Option<FlowStats>,
    /// Union of the TCP flags seen on the flow.
    pub tcp_flags: Option<u8>,
    /// Last hit, in milliseconds of the datapath's monotonic clock.
    pub last_used: Option<u64>,
}

impl Flow {
    pub fn new(flow_match: FlowMatch) -> Self {
        Self { flow_match, ..Self::default() }
    }

    pub fn with_action(mut self, action: FlowAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_actions(mut self, actions: Vec<FlowAction>) -> Self {
        self.actions = actions;
        self
    }

    pub fn decode(attrs: &Attributes) -> Result<Self, AttrError> {
        let flow_match = FlowMatch::decode(&attrs.nested(attr::KEY)?)?;
        let actions = match attrs.opt_nested(attr::ACTIONS)? {
            Some(actions) => decode_actions(&actions)?,
            None => Vec::new(),
        };

        let stats = match attrs.get(attr::STATS) {
            Some(raw) => {
                let value = raw.value();
                if value.len() != FlowStats::LEN {
                    return Err(AttrError::InvalidLength {
                        kind: attr::STATS,
                        expected: FlowStats::LEN,
                        actual: value.len(),
                    });
                }
                let mut packets = [0; 8];
                let mut bytes = [0; 8];
                packets.copy_from_slice(&value[..8]);
                bytes.copy_from_slice(&value[8..]);
                Some(FlowStats { packets: u64::from_ne_bytes(packets), bytes: u64::from_ne_bytes(bytes) })
            }
            None => None,
        };

        Ok(Self {
            flow_match,
            actions,
            stats,
            tcp_flags: attrs.opt_u8(attr::TCP_FLAGS)?,
            last_used: attrs.opt_u64(attr::USED)?,
        })
    }

    /// Writes the key and actions. Statistics are datapath output and are not encoded.
    pub fn encode(&self, w: &mut AttrWriter<'_>) {
        w.nested(attr::KEY, |w| self.flow_match.encode(w));
        w.nested(attr::ACTIONS, |w| encode_actions(&self.actions, w));
    }
}
