//! Subscription, query, binding, resolution, and proxy operations.

use std::time::Duration;

use crate::config;
use crate::core::bindings::NetSocket;
use crate::core::hub::{NetConnection, SubscriptionId};
use crate::core::matcher;
use crate::core::types::{
    BackgroundPolicy, ConnectionProperties, HttpProxy, NetAddress, NetCapabilities, NetHandle,
    NetSpecifier,
};
use crate::error::NetError;

use super::{Caller, ConnectivityManager, Permission};

/// Everything the transport layer needs to complete a connect on a specific
/// network: the bound socket, the resolved addresses (via that network's
/// DNS servers), the effective proxy, and the egress interface.
///
/// The socket is still unconnected; the transport calls
/// [`NetSocket::mark_connected`] once its connect completes.
#[derive(Debug)]
pub struct ConnectPlan {
    pub socket: NetSocket,
    pub addresses: Vec<NetAddress>,
    pub proxy: Option<HttpProxy>,
    pub interface: String,
}

impl ConnectivityManager {
    /// Registers a subscription with the default grace period.
    pub fn subscribe(
        &self,
        caller: &Caller,
        specifier: Option<NetSpecifier>,
    ) -> Result<NetConnection, NetError> {
        self.subscribe_with_grace(
            caller,
            specifier,
            Duration::from_millis(config::UNAVAILABLE_GRACE_MS),
        )
    }

    /// Registers a subscription with an explicit grace period for the
    /// `Unavailable` signal.
    pub fn subscribe_with_grace(
        &self,
        caller: &Caller,
        specifier: Option<NetSpecifier>,
        grace: Duration,
    ) -> Result<NetConnection, NetError> {
        caller.require(Permission::GetNetworkInfo)?;
        Ok(self
            .hub
            .subscribe(specifier, &self.registry.snapshot(), grace))
    }

    /// Cancels a subscription. Returns whether it was still registered.
    pub fn unsubscribe(&self, caller: &Caller, id: SubscriptionId) -> Result<bool, NetError> {
        caller.require(Permission::GetNetworkInfo)?;
        Ok(self.hub.unsubscribe(id))
    }

    /// The network currently holding the default slot.
    pub fn get_default_net(&self, caller: &Caller) -> Result<Option<NetHandle>, NetError> {
        caller.require(Permission::GetNetworkInfo)?;
        Ok(self.registry.default_handle())
    }

    pub fn has_default_net(&self, caller: &Caller) -> Result<bool, NetError> {
        Ok(self.get_default_net(caller)?.is_some())
    }

    /// Whether traffic on the default network counts against a data plan.
    /// `false` when no default network exists.
    pub fn is_default_net_metered(&self, caller: &Caller) -> Result<bool, NetError> {
        caller.require(Permission::GetNetworkInfo)?;
        let snapshot = self.registry.snapshot();
        Ok(snapshot
            .default_handle()
            .and_then(|handle| snapshot.get(handle))
            .map(|record| record.metered)
            .unwrap_or(false))
    }

    /// All registered networks, ascending by handle.
    pub fn get_all_nets(&self, caller: &Caller) -> Result<Vec<NetHandle>, NetError> {
        caller.require(Permission::GetNetworkInfo)?;
        Ok(self.registry.snapshot().handles())
    }

    pub fn get_net_capabilities(
        &self,
        caller: &Caller,
        handle: NetHandle,
    ) -> Result<NetCapabilities, NetError> {
        caller.require(Permission::GetNetworkInfo)?;
        Ok(self.registry.get(handle)?.capabilities.clone())
    }

    pub fn get_connection_properties(
        &self,
        caller: &Caller,
        handle: NetHandle,
    ) -> Result<ConnectionProperties, NetError> {
        caller.require(Permission::GetNetworkInfo)?;
        Ok(self.registry.get(handle)?.properties.clone())
    }

    /// Best network satisfying `specifier`, or `NoMatch`.
    pub fn match_network(
        &self,
        caller: &Caller,
        specifier: &NetSpecifier,
    ) -> Result<NetHandle, NetError> {
        caller.require(Permission::GetNetworkInfo)?;
        matcher::best_match(specifier, &self.registry.snapshot())
            .ok_or_else(|| NetError::NoMatch(format!("no network satisfies {specifier:?}")))
    }

    /// Binds (or with `None` unbinds) the caller's process to a network.
    /// Subsequently created sockets and name resolutions use that network;
    /// already-connected sockets are unaffected.
    pub fn set_app_net(
        &self,
        caller: &Caller,
        handle: Option<NetHandle>,
    ) -> Result<(), NetError> {
        caller.require(Permission::Internet)?;
        let _guard = self.write_section.lock().unwrap();
        match handle {
            Some(handle) => {
                // Binding must reference a currently registered network.
                self.registry.get(handle)?;
                self.bindings.bind(caller.pid(), handle);
                tracing::debug!("pid {} bound to {handle}", caller.pid());
            }
            None => {
                // Idempotent: clearing an absent binding succeeds.
                self.bindings.clear(caller.pid());
                tracing::debug!("pid {} unbound", caller.pid());
            }
        }
        Ok(())
    }

    /// The network the caller's process is bound to, if any.
    pub fn get_app_net(&self, caller: &Caller) -> Result<Option<NetHandle>, NetError> {
        Ok(self.bindings.get(caller.pid()))
    }

    /// Pins one unconnected socket to a network, bypassing any process
    /// binding. Fails with `AlreadyConnected` once the socket has completed
    /// a connect.
    pub fn bind_socket(
        &self,
        caller: &Caller,
        socket: &NetSocket,
        handle: NetHandle,
    ) -> Result<(), NetError> {
        caller.require(Permission::Internet)?;
        let _guard = self.write_section.lock().unwrap();
        let record = self.registry.get(handle)?;
        socket.bind(handle)?;
        if let Err(e) = self
            .binder
            .bind_to_network(socket.id(), &record.properties.interface_name)
        {
            // Roll back so the socket is reusable on another network.
            socket.release_binding();
            return Err(NetError::Io(format!("socket bind failed: {e}")));
        }
        Ok(())
    }

    /// Resolves `host` through the DNS servers of the caller's effective
    /// network: the process-bound network if any, else the default.
    pub fn get_addresses_by_name(
        &self,
        caller: &Caller,
        host: &str,
    ) -> Result<Vec<NetAddress>, NetError> {
        caller.require(Permission::Internet)?;
        let handle = self.effective_net(caller).ok_or_else(|| {
            NetError::NotFound("no bound or default network for resolution".into())
        })?;
        let record = self.registry.get(handle)?;
        self.resolver.resolve(host, &record.properties.dns_servers)
    }

    /// First address of [`Self::get_addresses_by_name`].
    pub fn get_address_by_name(&self, caller: &Caller, host: &str) -> Result<NetAddress, NetError> {
        self.get_addresses_by_name(caller, host)?
            .into_iter()
            .next()
            .ok_or_else(|| NetError::NotFound(format!("no addresses for host {host:?}")))
    }

    /// Prepares a connection to `host` over an explicit network: binds a
    /// fresh socket, resolves the host through that network's DNS servers,
    /// and reports the effective proxy. The whole operation is bounded by
    /// `timeout`; expiry rolls back the socket binding and yields
    /// `TimedOut`, leaving no partial state.
    pub async fn open_connection(
        &self,
        caller: &Caller,
        handle: NetHandle,
        host: &str,
        timeout: Duration,
    ) -> Result<ConnectPlan, NetError> {
        caller.require(Permission::Internet)?;
        let record = self.registry.get(handle)?;
        let socket = NetSocket::new();
        socket.bind(handle)?;
        if let Err(e) = self
            .binder
            .bind_to_network(socket.id(), &record.properties.interface_name)
        {
            socket.release_binding();
            return Err(NetError::Io(format!("socket bind failed: {e}")));
        }

        let resolver = self.resolver.clone();
        let dns_servers = record.properties.dns_servers.clone();
        let host_owned = host.to_string();
        let resolved = tokio::time::timeout(
            timeout,
            tokio::task::spawn_blocking(move || resolver.resolve(&host_owned, &dns_servers)),
        )
        .await;
        let addresses = match resolved {
            Err(_) => {
                self.binder.release(socket.id());
                socket.release_binding();
                return Err(NetError::TimedOut(format!(
                    "connect to {host:?} exceeded {}ms",
                    timeout.as_millis()
                )));
            }
            Ok(Err(join_err)) => {
                self.binder.release(socket.id());
                socket.release_binding();
                return Err(NetError::Io(format!("resolver task failed: {join_err}")));
            }
            Ok(Ok(result)) => match result {
                Ok(addresses) => addresses,
                Err(e) => {
                    self.binder.release(socket.id());
                    socket.release_binding();
                    return Err(e);
                }
            },
        };

        let proxy = self.proxy.resolve_for_host(
            caller.pid(),
            host,
            &self.bindings,
            &self.registry.snapshot(),
        );
        Ok(ConnectPlan {
            socket,
            addresses,
            proxy,
            interface: record.properties.interface_name.clone(),
        })
    }

    /// Effective proxy for the caller, before exclusion-list filtering.
    pub fn get_default_http_proxy(&self, caller: &Caller) -> Option<HttpProxy> {
        self.proxy
            .resolve(caller.pid(), &self.bindings, &self.registry.snapshot())
    }

    /// Effective proxy for the caller when connecting to `host`.
    pub fn get_http_proxy_for_host(&self, caller: &Caller, host: &str) -> Option<HttpProxy> {
        self.proxy.resolve_for_host(
            caller.pid(),
            host,
            &self.bindings,
            &self.registry.snapshot(),
        )
    }

    /// Installs or clears the system-wide proxy.
    pub fn set_global_http_proxy(
        &self,
        caller: &Caller,
        proxy: Option<HttpProxy>,
    ) -> Result<(), NetError> {
        caller.require(Permission::SetNetworkInfo)?;
        tracing::info!("global http proxy set to {proxy:?}");
        self.proxy.set_global(proxy);
        Ok(())
    }

    /// Effective background policy for the caller's uid.
    pub fn get_background_policy(&self, caller: &Caller) -> Result<BackgroundPolicy, NetError> {
        caller.require(Permission::GetNetworkInfo)?;
        let policy = *self.background_policy.read().unwrap();
        if policy == BackgroundPolicy::Enabled && self.metered_allowlist.contains(&caller.uid()) {
            return Ok(BackgroundPolicy::AllowListed);
        }
        Ok(policy)
    }

    pub fn set_background_policy(
        &self,
        caller: &Caller,
        policy: BackgroundPolicy,
    ) -> Result<(), NetError> {
        caller.require(Permission::SetNetworkInfo)?;
        *self.background_policy.write().unwrap() = policy;
        Ok(())
    }

    /// Adds or removes a uid from the metered-background allowlist.
    pub fn allow_metered_background(
        &self,
        caller: &Caller,
        uid: u32,
        allowed: bool,
    ) -> Result<(), NetError> {
        caller.require(Permission::SetNetworkInfo)?;
        if allowed {
            self.metered_allowlist.insert(uid);
        } else {
            self.metered_allowlist.remove(&uid);
        }
        Ok(())
    }

    /// Externally-observed connectivity report: marks the network validated.
    pub fn report_net_connected(&self, caller: &Caller, handle: NetHandle) -> Result<(), NetError> {
        caller.require(Permission::GetNetworkInfo)?;
        caller.require(Permission::Internet)?;
        let _guard = self.write_section.lock().unwrap();
        let diff = self.registry.mark_validated(handle)?;
        let record = self.registry.get(handle)?;
        self.hub.notify_record(&record, &diff);
        tracing::info!("network {handle} reported connected by pid {}", caller.pid());
        Ok(())
    }

    /// Externally-observed loss report: clears the validated state.
    pub fn report_net_disconnected(
        &self,
        caller: &Caller,
        handle: NetHandle,
    ) -> Result<(), NetError> {
        caller.require(Permission::GetNetworkInfo)?;
        caller.require(Permission::Internet)?;
        let _guard = self.write_section.lock().unwrap();
        let diff = self.registry.clear_validated(handle)?;
        let record = self.registry.get(handle)?;
        self.hub.notify_record(&record, &diff);
        tracing::info!(
            "network {handle} reported disconnected by pid {}",
            caller.pid()
        );
        Ok(())
    }

    /// The network serving this caller: its process binding, else the
    /// default.
    fn effective_net(&self, caller: &Caller) -> Option<NetHandle> {
        self.bindings
            .get(caller.pid())
            .or_else(|| self.registry.default_handle())
    }
}
