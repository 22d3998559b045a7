//! The flow model: exact datapath flow keys and actions, partial [`WildcardMatch`]es
//! with projection, and the per-packet [`PacketContext`] of the topology simulation.

pub mod action;
pub mod context;
mod field;
pub mod flow;
mod flow_match;
pub mod key;
mod wildcard;

pub use action::FlowAction;
pub use context::{ConnTrackState, ContextOptions, FlowTag, PacketContext, SimulationError};
pub use field::{Field, FieldSet};
pub use flow::{Flow, FlowStats};
pub use flow_match::FlowMatch;
pub use key::FlowKey;
pub use wildcard::{FieldError, WildcardMatch};
