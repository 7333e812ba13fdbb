//! NetPilot: a control-plane manager for devices with multiple
//! concurrently-active networks.
//!
//! The manager tracks networks and their capability/property snapshots,
//! selects networks by capability, fans out ordered state-change events to
//! subscribers, binds processes and sockets to specific networks, resolves
//! effective proxies, and accounts traffic per interface and application.
//! Radio bring-up, packet forwarding, and policy evaluation live outside
//! this crate, behind the traits in [`link`].

pub mod config;
pub mod core;
pub mod error;
pub mod link;
pub mod manager;

pub use crate::core::bindings::NetSocket;
pub use crate::core::hub::{NetConnection, NetEvent, SubscriptionId};
pub use crate::core::types::{
    BackgroundPolicy, ConnectionProperties, HttpProxy, InterfaceConfiguration, IpSetMode,
    LinkAddress, NetAddress, NetBearType, NetCap, NetCapabilities, NetHandle, NetSpecifier,
    NetworkRecord, ProxyType, RouteInfo,
};
pub use error::NetError;
pub use link::{LinkEvent, LinkPump, LinkSource, NameResolver, SocketBinder};
pub use manager::{Caller, ConnectPlan, ConnectivityManager, Permission};

/// Initializes tracing with an env-filter default of `netpilot=info`.
/// Embedding applications that configure their own subscriber skip this.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "netpilot=info".into()),
        )
        .init();
}
