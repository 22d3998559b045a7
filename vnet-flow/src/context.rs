//! Per-packet state carried through the virtual topology simulation.

use std::{
    fmt,
    hash::{Hash, Hasher},
    net::Ipv4Addr,
    time::Duration,
};

use derive_more::{Display, From};
use rustc_hash::{FxHashSet, FxHasher};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, trace};
use uuid::Uuid;
use vnet_common::Cache;
use vnet_packet::protocol::{ether_type, ip_proto};

use crate::wildcard::WildcardMatch;

/// Value stored under a connection key. Only the key's presence matters.
const CONNECTION_MARKER: &str = "r";

#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// The number of devices a packet may enter before the simulation gives up on it.
    pub max_devices_traversed: usize,
    /// How long an installed connection entry lets return traffic through.
    pub conntrack_ttl: Duration,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self { max_devices_traversed: 12, conntrack_ttl: Duration::from_secs(60) }
    }
}

impl ContextOptions {
    pub fn max_devices_traversed(mut self, max: usize) -> Self {
        self.max_devices_traversed = max;
        self
    }

    pub fn conntrack_ttl(mut self, ttl: Duration) -> Self {
        self.conntrack_ttl = ttl;
        self
    }
}

/// An opaque marker attached to the flows a simulation produces, so they can be
/// invalidated together when the state they depended on changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, From, Display)]
#[display(fmt = "{:#018x}", _0)]
pub struct FlowTag(u64);

impl FlowTag {
    /// The tag of flows that traversed `device`.
    pub fn for_device(device: Uuid) -> Self {
        let mut hasher = FxHasher::default();
        device.hash(&mut hasher);
        Self(hasher.finish())
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnTrackState {
    #[default]
    Unknown,
    Forward,
    Return,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SimulationError {
    #[error("packet traversed more than {limit} devices (last: {device})")]
    TraversalLimit { limit: usize, device: Uuid },
}

/// The 5-tuple plus device that identifies a tracked connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ConnectionKey {
    source: Ipv4Addr,
    source_port: u16,
    destination: Ipv4Addr,
    destination_port: u16,
    protocol: u8,
    device: Uuid,
}

impl ConnectionKey {
    /// Only IPv4 TCP and UDP flows with a full 5-tuple are tracked.
    fn of(m: &WildcardMatch, device: Uuid) -> Option<Self> {
        if m.ether_type() != Some(ether_type::IPV4) {
            return None;
        }
        let protocol = m.network_protocol().filter(|p| matches!(*p, ip_proto::TCP | ip_proto::UDP))?;

        Some(Self {
            source: m.network_source()?,
            source_port: m.transport_source()?,
            destination: m.network_destination()?,
            destination_port: m.transport_destination()?,
            protocol,
            device,
        })
    }

    fn reversed(self) -> Self {
        Self {
            source: self.destination,
            source_port: self.destination_port,
            destination: self.source,
            destination_port: self.source_port,
            ..self
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}|{}",
            self.source,
            self.source_port,
            self.destination,
            self.destination_port,
            self.protocol,
            self.device
        )
    }
}

/// State of one packet's trip through the virtual topology.
///
/// The original match is frozen at creation; devices rewrite the current one. Every
/// device the packet enters is recorded and tags the resulting flow.
#[derive(Debug)]
pub struct PacketContext {
    original: WildcardMatch,
    current: WildcardMatch,
    ingress: Uuid,
    cookie: Option<u32>,
    traversed: Vec<Uuid>,
    tags: FxHashSet<FlowTag>,
    conntrack: ConnTrackState,
    expires_at: Option<Instant>,
    options: ContextOptions,
}

impl PacketContext {
    pub fn new(packet_match: WildcardMatch, ingress: Uuid) -> Self {
        Self::with_options(packet_match, ingress, ContextOptions::default())
    }

    pub fn with_options(packet_match: WildcardMatch, ingress: Uuid, options: ContextOptions) -> Self {
        Self {
            current: packet_match.clone(),
            original: packet_match,
            ingress,
            cookie: None,
            traversed: Vec::new(),
            tags: FxHashSet::default(),
            conntrack: ConnTrackState::Unknown,
            expires_at: None,
            options,
        }
    }

    /// Identifies the upcall that started this simulation.
    pub fn with_cookie(mut self, cookie: u32) -> Self {
        self.cookie = Some(cookie);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.expires_at = Some(deadline);
        self
    }

    pub fn original_match(&self) -> &WildcardMatch {
        &self.original
    }

    pub fn current_match(&self) -> &WildcardMatch {
        &self.current
    }

    pub fn current_match_mut(&mut self) -> &mut WildcardMatch {
        &mut self.current
    }

    pub fn ingress_port(&self) -> Uuid {
        self.ingress
    }

    pub fn cookie(&self) -> Option<u32> {
        self.cookie
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.map_or(false, |deadline| Instant::now() >= deadline)
    }

    /// Records that the packet entered `device` and tags the flow with it. Fails once the
    /// packet has entered more devices than allowed, which catches forwarding loops.
    pub fn enter_device(&mut self, device: Uuid) -> Result<(), SimulationError> {
        if self.traversed.len() >= self.options.max_devices_traversed {
            debug!(%device, limit = self.options.max_devices_traversed, "Traversal limit reached");
            return Err(SimulationError::TraversalLimit {
                limit: self.options.max_devices_traversed,
                device,
            });
        }

        self.traversed.push(device);
        self.add_flow_tag(FlowTag::for_device(device));
        Ok(())
    }

    pub fn traversed_devices(&self) -> &[Uuid] {
        &self.traversed
    }

    pub fn add_flow_tag(&mut self, tag: FlowTag) {
        self.tags.insert(tag);
    }

    pub fn flow_tags(&self) -> impl Iterator<Item = FlowTag> + '_ {
        self.tags.iter().copied()
    }

    pub fn conntrack_state(&self) -> ConnTrackState {
        self.conntrack
    }

    /// Whether the packet belongs to the forward direction of its connection as seen by
    /// `device`. A packet is a return packet when a forward packet already installed an
    /// entry for its 5-tuple. Untracked traffic always counts as forward. The decision is
    /// made once per context.
    pub fn is_forward_flow(&mut self, device: Uuid, cache: &dyn Cache) -> bool {
        if self.conntrack != ConnTrackState::Unknown {
            return self.conntrack == ConnTrackState::Forward;
        }

        self.conntrack = match ConnectionKey::of(&self.current, device) {
            Some(key) => {
                let key = key.to_string();
                if cache.get(&key).is_some() {
                    trace!(%key, "Return flow");
                    ConnTrackState::Return
                } else {
                    ConnTrackState::Forward
                }
            }
            None => ConnTrackState::Forward,
        };

        self.conntrack == ConnTrackState::Forward
    }

    /// Lets the return traffic of this forward packet's connection through `device`.
    /// Does nothing for untracked traffic or return packets.
    pub fn install_connection_entry(&self, device: Uuid, cache: &dyn Cache) {
        if self.conntrack == ConnTrackState::Return {
            return;
        }
        if let Some(key) = ConnectionKey::of(&self.current, device) {
            let reverse = key.reversed().to_string();
            trace!(key = %reverse, ttl = ?self.options.conntrack_ttl, "Installing connection entry");
            cache.set_with_expiration(&reverse, CONNECTION_MARKER, self.options.conntrack_ttl);
        }
    }
}
