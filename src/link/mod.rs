//! Platform boundary: link events in, binding/resolution directives out.
//!
//! The platform radio/interface layer is the single source of truth for
//! network state. It feeds [`LinkEvent`]s through a bounded channel into
//! the [`LinkPump`], a single-writer task that applies them to the manager
//! in arrival order. The [`NameResolver`] and [`SocketBinder`] traits are
//! the contracts this core needs from the DNS and socket/transport layers;
//! the built-in implementations are inert defaults for embedding and tests.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::config;
use crate::core::types::{ConnectionProperties, NetAddress, NetCapabilities, NetHandle};
use crate::error::NetError;
use crate::manager::ConnectivityManager;

/// A raw signal from the platform radio/interface layer.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// A network came up. The registry allocates its handle.
    NetworkAppeared {
        capabilities: NetCapabilities,
        metered: bool,
        score: u32,
        properties: ConnectionProperties,
    },
    /// A network is gone. Terminal for the handle.
    NetworkGone { handle: NetHandle },
    /// A network will disappear within `max_ms_to_live` milliseconds.
    NetworkLosing { handle: NetHandle, max_ms_to_live: u32 },
    /// The capability snapshot changed.
    CapabilitiesChanged {
        handle: NetHandle,
        capabilities: NetCapabilities,
    },
    /// The link properties changed.
    PropertiesChanged {
        handle: NetHandle,
        properties: ConnectionProperties,
    },
    /// Access policy toggled for the network.
    BlockedStatusChanged { handle: NetHandle, blocked: bool },
    /// An internet probe succeeded.
    NetworkValidated { handle: NetHandle },
    /// An internet probe stopped succeeding.
    NetworkInvalidated { handle: NetHandle },
}

/// A producer of link events (one radio, one interface watcher, ...).
/// Implementors drive their signals into the supplied sender until it
/// closes.
pub trait LinkSource: Send + 'static {
    fn start(self: Box<Self>, events: mpsc::Sender<LinkEvent>) -> tokio::task::JoinHandle<()>;
}

/// Creates the bounded channel between platform sources and the pump.
pub fn link_channel() -> (mpsc::Sender<LinkEvent>, mpsc::Receiver<LinkEvent>) {
    mpsc::channel(config::LINK_EVENT_CHANNEL_CAPACITY)
}

/// Single-writer task applying link events to the manager in order.
///
/// Dropping the pump stops the task; in-flight events are abandoned, not
/// half-applied (each event is applied atomically by the manager).
pub struct LinkPump {
    task: Option<tokio::task::JoinHandle<()>>,
}

impl LinkPump {
    pub fn start(
        manager: Arc<ConnectivityManager>,
        mut events: mpsc::Receiver<LinkEvent>,
    ) -> Self {
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                manager.apply_link_event(event);
            }
            tracing::info!("link event channel closed, pump exiting");
        });
        tracing::info!("link pump started");
        Self { task: Some(task) }
    }

    /// Stops the pump without waiting for it.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for LinkPump {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Name-resolution contract: resolve `host` through the DNS servers of the
/// caller's effective network. Supplied by the transport layer.
pub trait NameResolver: Send + Sync {
    fn resolve(
        &self,
        host: &str,
        dns_servers: &[NetAddress],
    ) -> Result<Vec<NetAddress>, NetError>;
}

/// Static host table. The default resolver for embedding and tests; real
/// deployments plug in a platform resolver.
pub struct HostsResolver {
    hosts: DashMap<String, Vec<std::net::IpAddr>>,
}

impl HostsResolver {
    pub fn new() -> Self {
        Self {
            hosts: DashMap::new(),
        }
    }

    pub fn insert(&self, host: &str, addresses: Vec<std::net::IpAddr>) {
        self.hosts.insert(host.to_ascii_lowercase(), addresses);
    }

    pub fn remove(&self, host: &str) {
        self.hosts.remove(&host.to_ascii_lowercase());
    }
}

impl Default for HostsResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl NameResolver for HostsResolver {
    fn resolve(
        &self,
        host: &str,
        _dns_servers: &[NetAddress],
    ) -> Result<Vec<NetAddress>, NetError> {
        // An IP literal resolves to itself.
        if let Ok(ip) = host.parse::<std::net::IpAddr>() {
            return Ok(vec![NetAddress::from_ip(ip)]);
        }
        self.hosts
            .get(&host.to_ascii_lowercase())
            .map(|entry| entry.iter().map(|ip| NetAddress::from_ip(*ip)).collect())
            .ok_or_else(|| NetError::NotFound(format!("host {host:?} not resolvable")))
    }
}

/// Socket/transport contract: apply (and undo) an OS-level "bind this
/// socket to this interface" directive before connect.
pub trait SocketBinder: Send + Sync {
    fn bind_to_network(&self, socket_id: u64, iface: &str) -> anyhow::Result<()>;

    /// Releases a binding acquired by `bind_to_network`, e.g. when a
    /// connect is cancelled. Must be safe to call for unknown ids.
    fn release(&self, socket_id: u64);
}

/// Accepts every binding directive without touching the OS. Control-plane
/// only deployments and tests.
pub struct NoopSocketBinder;

impl SocketBinder for NoopSocketBinder {
    fn bind_to_network(&self, socket_id: u64, iface: &str) -> anyhow::Result<()> {
        tracing::debug!("socket {socket_id} bound to {iface:?} (noop)");
        Ok(())
    }

    fn release(&self, socket_id: u64) {
        tracing::debug!("socket {socket_id} binding released (noop)");
    }
}
