//! Connectivity manager facade and its operation surface.
//!
//! Operations are organized by functional domain:
//! - `connection`: subscriptions, network queries, process/socket binding,
//!   name resolution, proxy resolution, liveness reports
//! - `statistics`: traffic counter queries and attribution
//! - `ethernet`: managed-interface configuration
//! - `system`: privileged pass-through commands (airplane mode,
//!   distributed cellular data, default-network pinning)
//!
//! Every operation takes a pre-authorized [`Caller`] and checks the
//! permission the operation requires; policy evaluation itself lives
//! outside this crate.

mod connection;
mod ethernet;
mod statistics;
mod system;

pub use connection::ConnectPlan;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use dashmap::{DashMap, DashSet};

use crate::core::bindings::ProcessBindingTable;
use crate::core::hub::EventHub;
use crate::core::proxy::ProxyResolver;
use crate::core::registry::NetworkRegistry;
use crate::core::traffic::TrafficAccountant;
use crate::core::types::{
    BackgroundPolicy, InterfaceConfiguration, NetHandle, NetworkRecord,
};
use crate::error::NetError;
use crate::link::{HostsResolver, LinkEvent, NameResolver, NoopSocketBinder, SocketBinder};

/// Permissions an operation may require from its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Permission {
    /// Read network state, capabilities, and counters.
    GetNetworkInfo,
    /// Change network-wide settings (global proxy, background policy).
    SetNetworkInfo,
    /// Open connections and bind sockets.
    Internet,
    /// System-internal operations (interface config, airplane mode).
    ConnectivityInternal,
}

/// A pre-authorized caller identity. The permission set is established by
/// the platform's authorization layer before any call reaches the manager.
#[derive(Debug, Clone)]
pub struct Caller {
    pid: u32,
    uid: u32,
    permissions: BTreeSet<Permission>,
}

impl Caller {
    pub fn new(pid: u32, uid: u32, permissions: impl IntoIterator<Item = Permission>) -> Self {
        Self {
            pid,
            uid,
            permissions: permissions.into_iter().collect(),
        }
    }

    /// A caller holding every permission.
    pub fn system() -> Self {
        Self::new(
            0,
            0,
            [
                Permission::GetNetworkInfo,
                Permission::SetNetworkInfo,
                Permission::Internet,
                Permission::ConnectivityInternal,
            ],
        )
    }

    /// A caller holding no permissions.
    pub fn unprivileged(pid: u32, uid: u32) -> Self {
        Self::new(pid, uid, [])
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub(crate) fn require(&self, permission: Permission) -> Result<(), NetError> {
        if self.permissions.contains(&permission) {
            return Ok(());
        }
        Err(NetError::PermissionDenied(format!(
            "caller pid={} lacks {permission:?}",
            self.pid
        )))
    }
}

/// The connectivity control plane.
///
/// All state mutations (link events, bindings, counter attribution) are
/// serialized through one exclusive section; queries run lock-free against
/// immutable snapshots.
pub struct ConnectivityManager {
    registry: NetworkRegistry,
    hub: Arc<EventHub>,
    bindings: ProcessBindingTable,
    traffic: TrafficAccountant,
    proxy: ProxyResolver,
    resolver: Arc<dyn NameResolver>,
    binder: Arc<dyn SocketBinder>,
    /// The exclusive section ordering every mutation.
    write_section: Mutex<()>,
    airplane_mode: AtomicBool,
    distributed_cellular: AtomicBool,
    background_policy: RwLock<BackgroundPolicy>,
    metered_allowlist: DashSet<u32>,
    iface_configs: DashMap<String, InterfaceConfiguration>,
}

impl ConnectivityManager {
    /// Manager with inert platform collaborators (a static host table and a
    /// no-op socket binder). Real deployments use [`Self::with_platform`].
    pub fn new() -> Self {
        Self::with_platform(Arc::new(HostsResolver::new()), Arc::new(NoopSocketBinder))
    }

    pub fn with_platform(
        resolver: Arc<dyn NameResolver>,
        binder: Arc<dyn SocketBinder>,
    ) -> Self {
        Self {
            registry: NetworkRegistry::new(),
            hub: Arc::new(EventHub::new()),
            bindings: ProcessBindingTable::new(),
            traffic: TrafficAccountant::new(),
            proxy: ProxyResolver::new(),
            resolver,
            binder,
            write_section: Mutex::new(()),
            airplane_mode: AtomicBool::new(false),
            distributed_cellular: AtomicBool::new(false),
            background_policy: RwLock::new(BackgroundPolicy::Disable),
            metered_allowlist: DashSet::new(),
            iface_configs: DashMap::new(),
        }
    }

    /// Applies one platform signal. This is the single-writer mutation path:
    /// the registry change, binding cleanup, and event fan-out all happen
    /// inside one exclusive section, so subscribers observe transitions in
    /// application order.
    ///
    /// Returns the affected handle, or `None` when the event referenced a
    /// network that is no longer (or was never) registered.
    pub fn apply_link_event(&self, event: LinkEvent) -> Option<NetHandle> {
        let _guard = self.write_section.lock().unwrap();
        match event {
            LinkEvent::NetworkAppeared {
                capabilities,
                metered,
                score,
                properties,
            } => {
                let handle = self.registry.allocate_handle();
                let record = NetworkRecord {
                    handle,
                    capabilities,
                    metered,
                    blocked: false,
                    score,
                    validated_seq: 0,
                    properties,
                };
                let validated = record.is_validated();
                let iface = record.properties.interface_name.clone();
                let bearer = record.capabilities.bearer_types.iter().next().copied();
                let diff = self.registry.upsert(record);
                if validated {
                    // Stamp the validation recency for default tie-breaks.
                    let _ = self.registry.mark_validated(handle);
                }
                if !iface.is_empty() {
                    if let Some(bearer) = bearer {
                        self.traffic.register_iface(&iface, bearer);
                    }
                }
                let record = self.registry.get(handle).ok()?;
                self.hub.notify_record(&record, &diff);
                tracing::info!("network {handle} appeared on {iface:?}");
                Some(handle)
            }
            LinkEvent::NetworkGone { handle } => {
                if self.registry.remove(handle).is_err() {
                    tracing::warn!("gone signal for unknown network {handle}");
                    return None;
                }
                // Bindings revert to default-network behavior before the
                // removal is visible anywhere else.
                let affected = self.bindings.purge_handle(handle);
                if !affected.is_empty() {
                    tracing::info!(
                        "network {handle} lost, cleared bindings for pids {affected:?}"
                    );
                }
                self.hub.notify_removed(handle);
                tracing::info!("network {handle} gone");
                Some(handle)
            }
            LinkEvent::NetworkLosing {
                handle,
                max_ms_to_live,
            } => {
                if self.registry.get(handle).is_err() {
                    return None;
                }
                self.hub.notify_losing(handle, max_ms_to_live);
                Some(handle)
            }
            LinkEvent::CapabilitiesChanged {
                handle,
                capabilities,
            } => {
                let old = self.registry.get(handle).ok()?;
                let mut record = NetworkRecord::clone(&old);
                record.capabilities = capabilities;
                let diff = self.registry.upsert(record);
                let record = self.registry.get(handle).ok()?;
                self.hub.notify_record(&record, &diff);
                Some(handle)
            }
            LinkEvent::PropertiesChanged { handle, properties } => {
                let old = self.registry.get(handle).ok()?;
                let mut record = NetworkRecord::clone(&old);
                record.properties = properties;
                let iface = record.properties.interface_name.clone();
                let bearer = record.capabilities.bearer_types.iter().next().copied();
                let diff = self.registry.upsert(record);
                if !iface.is_empty() {
                    if let Some(bearer) = bearer {
                        self.traffic.register_iface(&iface, bearer);
                    }
                }
                let record = self.registry.get(handle).ok()?;
                self.hub.notify_record(&record, &diff);
                Some(handle)
            }
            LinkEvent::BlockedStatusChanged { handle, blocked } => {
                let old = self.registry.get(handle).ok()?;
                let mut record = NetworkRecord::clone(&old);
                record.blocked = blocked;
                let diff = self.registry.upsert(record);
                let record = self.registry.get(handle).ok()?;
                self.hub.notify_record(&record, &diff);
                Some(handle)
            }
            LinkEvent::NetworkValidated { handle } => {
                let diff = self.registry.mark_validated(handle).ok()?;
                let record = self.registry.get(handle).ok()?;
                self.hub.notify_record(&record, &diff);
                Some(handle)
            }
            LinkEvent::NetworkInvalidated { handle } => {
                let diff = self.registry.clear_validated(handle).ok()?;
                let record = self.registry.get(handle).ok()?;
                self.hub.notify_record(&record, &diff);
                Some(handle)
            }
        }
    }

    /// Events dropped across all subscriber queues. Diagnostic only.
    pub fn dropped_events(&self) -> u64 {
        self.hub.dropped_events()
    }
}

impl Default for ConnectivityManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hub::NetEvent;
    use crate::core::types::{
        ConnectionProperties, NetBearType, NetCap, NetCapabilities, NetSpecifier,
    };
    use std::time::Duration;

    fn appeared(bearer: NetBearType, caps: Vec<NetCap>, iface: &str, score: u32) -> LinkEvent {
        LinkEvent::NetworkAppeared {
            capabilities: NetCapabilities::new(bearer, caps),
            metered: bearer == NetBearType::Cellular,
            score,
            properties: ConnectionProperties {
                interface_name: iface.to_string(),
                ..ConnectionProperties::default()
            },
        }
    }

    #[test]
    fn test_permission_checks() {
        let caller = Caller::unprivileged(100, 1000);
        assert_eq!(
            caller
                .require(Permission::GetNetworkInfo)
                .unwrap_err()
                .kind(),
            "PermissionDenied"
        );
        assert!(Caller::system().require(Permission::ConnectivityInternal).is_ok());
    }

    #[test]
    fn test_gone_for_unknown_network_is_ignored() {
        let manager = ConnectivityManager::new();
        assert_eq!(
            manager.apply_link_event(LinkEvent::NetworkGone {
                handle: NetHandle(99)
            }),
            None
        );
    }

    #[test]
    fn test_appearance_registers_traffic_iface() {
        let manager = ConnectivityManager::new();
        manager
            .apply_link_event(appeared(
                NetBearType::Wifi,
                vec![NetCap::Internet],
                "wlan0",
                50,
            ))
            .unwrap();
        let system = Caller::system();
        assert_eq!(manager.get_iface_rx_bytes(&system, "wlan0").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_end_to_end_lifecycle() {
        let manager = ConnectivityManager::new();
        let system = Caller::system();
        let app = Caller::new(
            42,
            10042,
            [Permission::GetNetworkInfo, Permission::Internet],
        );

        // Wi-Fi network appears, validated, becomes the default.
        let h1 = manager
            .apply_link_event(appeared(
                NetBearType::Wifi,
                vec![NetCap::Internet, NetCap::Validated],
                "wlan0",
                70,
            ))
            .unwrap();
        assert_eq!(manager.get_default_net(&system).unwrap(), Some(h1));

        // Subscriber with an Internet specifier sees it immediately.
        let conn = manager
            .subscribe(&app, Some(NetSpecifier::require([NetCap::Internet])))
            .unwrap();
        assert_eq!(conn.recv().await, Some(NetEvent::Available(h1)));

        // Process binds to the network.
        manager.set_app_net(&app, Some(h1)).unwrap();
        assert_eq!(manager.get_app_net(&app).unwrap(), Some(h1));

        // Network disappears: subscriber told once, default gone, binding
        // cleared.
        manager
            .apply_link_event(LinkEvent::NetworkGone { handle: h1 })
            .unwrap();
        assert_eq!(conn.recv().await, Some(NetEvent::Lost(h1)));
        assert_eq!(conn.try_recv(), None);
        assert_eq!(manager.get_default_net(&system).unwrap(), None);
        assert_eq!(manager.get_app_net(&app).unwrap(), None);
    }

    #[tokio::test]
    async fn test_losing_then_gone_sequence() {
        let manager = ConnectivityManager::new();
        let app = Caller::new(7, 10007, [Permission::GetNetworkInfo]);

        let handle = manager
            .apply_link_event(appeared(
                NetBearType::Cellular,
                vec![NetCap::Internet],
                "rmnet0",
                40,
            ))
            .unwrap();
        let conn = manager.subscribe(&app, None).unwrap();
        assert_eq!(conn.recv().await, Some(NetEvent::Available(handle)));

        manager
            .apply_link_event(LinkEvent::NetworkLosing {
                handle,
                max_ms_to_live: 500,
            })
            .unwrap();
        manager
            .apply_link_event(LinkEvent::NetworkGone { handle })
            .unwrap();

        assert_eq!(
            conn.recv().await,
            Some(NetEvent::Losing {
                handle,
                max_ms_to_live: 500
            })
        );
        assert_eq!(conn.recv().await, Some(NetEvent::Lost(handle)));
    }

    #[tokio::test]
    async fn test_validation_events_flow_to_subscribers() {
        let manager = ConnectivityManager::new();
        let app = Caller::new(7, 10007, [Permission::GetNetworkInfo]);
        let system = Caller::system();

        let handle = manager
            .apply_link_event(appeared(
                NetBearType::Wifi,
                vec![NetCap::Internet],
                "wlan0",
                70,
            ))
            .unwrap();
        assert_eq!(manager.get_default_net(&system).unwrap(), None);

        let conn = manager
            .subscribe(&app, Some(NetSpecifier::require([NetCap::Validated])))
            .unwrap();
        assert_eq!(conn.try_recv(), None);

        manager
            .apply_link_event(LinkEvent::NetworkValidated { handle })
            .unwrap();
        assert_eq!(conn.recv().await, Some(NetEvent::Available(handle)));
        assert_eq!(manager.get_default_net(&system).unwrap(), Some(handle));

        manager
            .apply_link_event(LinkEvent::NetworkInvalidated { handle })
            .unwrap();
        assert_eq!(conn.recv().await, Some(NetEvent::Lost(handle)));
        assert_eq!(manager.get_default_net(&system).unwrap(), None);
    }

    #[tokio::test]
    async fn test_unavailable_subscription_recovers() {
        let manager = ConnectivityManager::new();
        let app = Caller::new(7, 10007, [Permission::GetNetworkInfo]);

        let conn = manager
            .subscribe_with_grace(
                &app,
                Some(NetSpecifier::require([NetCap::Internet])),
                Duration::from_millis(20),
            )
            .unwrap();
        assert_eq!(conn.recv().await, Some(NetEvent::Unavailable));

        let handle = manager
            .apply_link_event(appeared(
                NetBearType::Wifi,
                vec![NetCap::Internet],
                "wlan0",
                70,
            ))
            .unwrap();
        assert_eq!(conn.recv().await, Some(NetEvent::Available(handle)));
    }
}
