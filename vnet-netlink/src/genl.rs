//! The generic netlink controller: resolves family names to the ids the kernel assigned.

use rustc_hash::FxHashMap;
use vnet_wire::{msg_type, AttrError, Body, Message};

use crate::{ConnectionError, NetlinkConnection, Request};

pub const CTRL_CMD_GETFAMILY: u8 = 3;
pub const CTRL_VERSION: u8 = 1;

pub const CTRL_ATTR_FAMILY_ID: u16 = 1;
pub const CTRL_ATTR_FAMILY_NAME: u16 = 2;
pub const CTRL_ATTR_VERSION: u16 = 3;
pub const CTRL_ATTR_HDRSIZE: u16 = 4;
pub const CTRL_ATTR_MAXATTR: u16 = 5;
pub const CTRL_ATTR_MCAST_GROUPS: u16 = 7;

pub const CTRL_ATTR_MCAST_GRP_NAME: u16 = 1;
pub const CTRL_ATTR_MCAST_GRP_ID: u16 = 2;

/// A generic netlink family as registered in the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Family {
    pub name: String,
    pub id: u16,
    pub version: u32,
    /// Size of the family-specific header that precedes the attributes.
    pub hdr_size: u32,
    pub max_attr: u32,
    /// Multicast groups by name.
    pub mcast_groups: FxHashMap<String, u32>,
}

impl Family {
    /// Decodes a `CTRL_CMD_NEWFAMILY` reply.
    pub fn decode(msg: &Message) -> Result<Self, ConnectionError> {
        let (_, attrs) = msg.attributes(0)?;

        let mut mcast_groups = FxHashMap::default();
        if let Some(groups) = attrs.opt_nested(CTRL_ATTR_MCAST_GROUPS)? {
            for group in &groups {
                let group = group.as_nested()?;
                mcast_groups.insert(
                    group.string(CTRL_ATTR_MCAST_GRP_NAME)?.to_owned(),
                    group.u32(CTRL_ATTR_MCAST_GRP_ID)?,
                );
            }
        }

        Ok(Self {
            name: attrs.string(CTRL_ATTR_FAMILY_NAME)?.to_owned(),
            id: attrs.u16(CTRL_ATTR_FAMILY_ID)?,
            version: attrs.opt_u32(CTRL_ATTR_VERSION)?.unwrap_or_default(),
            hdr_size: attrs.opt_u32(CTRL_ATTR_HDRSIZE)?.unwrap_or_default(),
            max_attr: attrs.opt_u32(CTRL_ATTR_MAXATTR)?.unwrap_or_default(),
            mcast_groups,
        })
    }

    /// The id of the multicast group called `name`.
    pub fn mcast_group(&self, name: &str) -> Option<u32> {
        self.mcast_groups.get(name).copied()
    }
}

/// Builds the `CTRL_CMD_GETFAMILY` request for `name`.
pub fn get_family_request(name: &str) -> Result<Request, AttrError> {
    let mut body = Body::new();
    body.put_attrs(|w| {
        w.put_str(CTRL_ATTR_FAMILY_NAME, name);
    })?;

    Ok(Request::new(msg_type::GENL_ID_CTRL, CTRL_CMD_GETFAMILY, CTRL_VERSION).with_body(body.freeze()))
}

/// Looks up a generic netlink family by name. A family the kernel doesn't know fails with
/// `ENOENT`.
pub async fn resolve_family(
    conn: &NetlinkConnection,
    name: &str,
) -> Result<Family, ConnectionError> {
    conn.request_map(get_family_request(name)?, |replies| {
        let reply = replies.first().ok_or(ConnectionError::EmptyReply)?;
        Family::decode(reply)
    })
    .await
}

/// Encodes the attributes of a `CTRL_CMD_NEWFAMILY` reply. Useful for fake kernels.
pub fn encode_family(family: &Family, body: &mut Body) -> Result<(), AttrError> {
    body.put_attrs(|attrs| {
        attrs
            .put_str(CTRL_ATTR_FAMILY_NAME, &family.name)
            .put_u16(CTRL_ATTR_FAMILY_ID, family.id)
            .put_u32(CTRL_ATTR_VERSION, family.version)
            .put_u32(CTRL_ATTR_HDRSIZE, family.hdr_size)
            .put_u32(CTRL_ATTR_MAXATTR, family.max_attr);

        if !family.mcast_groups.is_empty() {
            attrs.nested(CTRL_ATTR_MCAST_GROUPS, |groups| {
                for (i, (name, id)) in family.mcast_groups.iter().enumerate() {
                    groups.nested(i as u16 + 1, |group| {
                        group.put_str(CTRL_ATTR_MCAST_GRP_NAME, name).put_u32(CTRL_ATTR_MCAST_GRP_ID, *id);
                    });
                }
            });
        }
    })
}
