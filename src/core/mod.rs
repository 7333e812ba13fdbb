//! Core logic: network registry, selection, event fan-out, bindings,
//! proxy resolution, traffic accounting.
//!
//! - [`registry::NetworkRegistry`] — copy-on-write table of known networks
//! - [`matcher`] — capability-based network selection
//! - [`hub::EventHub`] — bounded per-subscriber event fan-out
//! - [`bindings::ProcessBindingTable`] / [`bindings::NetSocket`] — process
//!   and socket network binding
//! - [`proxy::ProxyResolver`] — effective proxy with exclusion lists
//! - [`traffic::TrafficAccountant`] — per-interface and per-uid counters

pub mod bindings;
pub mod hub;
pub mod matcher;
pub mod proxy;
pub mod registry;
pub mod traffic;
pub mod types;

pub use bindings::{NetSocket, ProcessBindingTable};
pub use hub::{EventHub, NetConnection, NetEvent, SubscriptionId};
pub use proxy::ProxyResolver;
pub use registry::{NetworkRegistry, RegistryDiff, RegistrySnapshot};
pub use traffic::{IfaceTrafficSnapshot, TrafficAccountant, UidTrafficSnapshot};
