//! Flow actions (`OVS_ACTION_ATTR_*`).

use bytes::Bytes;
use vnet_wire::{Attr, AttrError, AttrWriter, Attributes};

use crate::key::FlowKey;

pub mod attr {
    pub const OUTPUT: u16 = 1;
    pub const USERSPACE: u16 = 2;
    pub const SET: u16 = 3;
    pub const PUSH_VLAN: u16 = 4;
    pub const POP_VLAN: u16 = 5;
}

pub mod userspace_attr {
    pub const PID: u16 = 1;
    pub const USERDATA: u16 = 2;
}

/// The 802.1Q tag protocol identifier.
pub const TPID_8021Q: u16 = 0x8100;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FlowAction {
    /// Send the packet out of a datapath port.
    Output(u32),
    /// Send the packet up to the netlink port `pid`.
    Userspace { pid: u32, userdata: Option<Bytes> },
    /// Overwrite the header fields of the key.
    Set(FlowKey),
    PushVlan { tpid: u16, tci: u16 },
    PopVlan,
    Unknown { ty: u16, value: Bytes },
}

impl FlowAction {
    pub fn push_vlan(tci: u16) -> Self {
        Self::PushVlan { tpid: TPID_8021Q, tci }
    }

    pub fn decode(attr: &Attr) -> Result<Self, AttrError> {
        Ok(match attr.kind() {
            attr::OUTPUT => Self::Output(attr.as_u32()?),
            attr::USERSPACE => {
                let nested = attr.as_nested()?;
                Self::Userspace {
                    pid: nested.u32(userspace_attr::PID)?,
                    userdata: nested.get(userspace_attr::USERDATA).map(|a| a.value().clone()),
                }
            }
            attr::SET => {
                let nested = attr.as_nested()?;
                let key = nested.iter().next().ok_or(AttrError::Missing(attr::SET))?;
                Self::Set(FlowKey::decode(key)?)
            }
            attr::PUSH_VLAN => {
                let value = attr.value();
                if value.len() != 4 {
                    return Err(AttrError::InvalidLength {
                        kind: attr::PUSH_VLAN,
                        expected: 4,
                        actual: value.len(),
                    });
                }
                Self::PushVlan {
                    tpid: u16::from_be_bytes([value[0], value[1]]),
                    tci: u16::from_be_bytes([value[2], value[3]]),
                }
            }
            attr::POP_VLAN => Self::PopVlan,
            ty => Self::Unknown { ty, value: attr.value().clone() },
        })
    }

    pub fn encode(&self, w: &mut AttrWriter<'_>) {
        match self {
            Self::Output(port) => {
                w.put_u32(attr::OUTPUT, *port);
            }
            Self::Userspace { pid, userdata } => {
                w.nested(attr::USERSPACE, |w| {
                    w.put_u32(userspace_attr::PID, *pid);
                    if let Some(data) = userdata {
                        w.put(userspace_attr::USERDATA, data);
                    }
                });
            }
            Self::Set(key) => {
                w.nested(attr::SET, |w| key.encode(w));
            }
            Self::PushVlan { tpid, tci } => {
                let [t0, t1] = tpid.to_be_bytes();
                let [c0, c1] = tci.to_be_bytes();
                w.put(attr::PUSH_VLAN, &[t0, t1, c0, c1]);
            }
            Self::PopVlan => {
                w.put_flag(attr::POP_VLAN);
            }
            Self::Unknown { ty, value } => {
                w.put(*ty, value);
            }
        }
    }
}

pub fn decode_actions(attrs: &Attributes) -> Result<Vec<FlowAction>, AttrError> {
    attrs.iter().map(FlowAction::decode).collect()
}

pub fn encode_actions(actions: &[FlowAction], w: &mut AttrWriter<'_>) {
    for action in actions {
        action.encode(w);
    }
}
