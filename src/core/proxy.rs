//! Effective proxy resolution.
//!
//! Precedence: the bound network's proxy for processes pinned with a
//! process binding, then the global proxy, then the default network's
//! proxy. A target host matching the winning proxy's exclusion list
//! (exact, `*.suffix` wildcard, or CIDR for IP literals) bypasses the
//! proxy entirely.

use std::net::IpAddr;
use std::sync::RwLock;

use crate::core::bindings::ProcessBindingTable;
use crate::core::registry::RegistrySnapshot;
use crate::core::types::HttpProxy;

pub struct ProxyResolver {
    global: RwLock<Option<HttpProxy>>,
}

impl ProxyResolver {
    pub fn new() -> Self {
        Self {
            global: RwLock::new(None),
        }
    }

    /// Installs or clears the system-wide proxy.
    pub fn set_global(&self, proxy: Option<HttpProxy>) {
        *self.global.write().unwrap() = proxy;
    }

    pub fn global(&self) -> Option<HttpProxy> {
        self.global.read().unwrap().clone()
    }

    /// Effective proxy for `pid`, ignoring any exclusion list.
    pub fn resolve(
        &self,
        pid: u32,
        bindings: &ProcessBindingTable,
        snapshot: &RegistrySnapshot,
    ) -> Option<HttpProxy> {
        if let Some(handle) = bindings.get(pid) {
            if let Some(record) = snapshot.get(handle) {
                if let Some(proxy) = &record.properties.http_proxy {
                    return Some(proxy.clone());
                }
            }
        }
        if let Some(proxy) = self.global() {
            return Some(proxy);
        }
        snapshot
            .default_handle()
            .and_then(|handle| snapshot.get(handle))
            .and_then(|record| record.properties.http_proxy.clone())
    }

    /// Effective proxy for `pid` when connecting to `host`. `None` when no
    /// proxy applies or `host` matches the exclusion list.
    pub fn resolve_for_host(
        &self,
        pid: u32,
        host: &str,
        bindings: &ProcessBindingTable,
        snapshot: &RegistrySnapshot,
    ) -> Option<HttpProxy> {
        let proxy = self.resolve(pid, bindings, snapshot)?;
        if host_excluded(host, &proxy.exclusion_list) {
            return None;
        }
        Some(proxy)
    }
}

impl Default for ProxyResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `host` matches any exclusion entry: exact name, `*.suffix`
/// wildcard, or CIDR block when `host` is an IP literal.
pub fn host_excluded(host: &str, exclusions: &[String]) -> bool {
    let host_ip: Option<IpAddr> = host.parse().ok();
    exclusions.iter().any(|entry| {
        let entry = entry.trim();
        if entry.is_empty() {
            return false;
        }
        if let Some(suffix) = entry.strip_prefix("*.") {
            let dotted = format!(".{}", suffix.to_ascii_lowercase());
            let host = host.to_ascii_lowercase();
            return host.len() > dotted.len() && host.ends_with(&dotted);
        }
        if entry.contains('/') {
            return match host_ip {
                Some(ip) => cidr_contains(entry, ip),
                None => false,
            };
        }
        host.eq_ignore_ascii_case(entry)
    })
}

/// CIDR membership for an IP literal. Malformed entries never match.
fn cidr_contains(cidr: &str, ip: IpAddr) -> bool {
    let Some((network, prefix)) = cidr.split_once('/') else {
        return false;
    };
    let Ok(network) = network.parse::<IpAddr>() else {
        return false;
    };
    let Ok(prefix) = prefix.parse::<u32>() else {
        return false;
    };
    match (network, ip) {
        (IpAddr::V4(net), IpAddr::V4(ip)) => {
            if prefix > 32 {
                return false;
            }
            if prefix == 0 {
                return true;
            }
            let shift = 32 - prefix;
            (u32::from(net) >> shift) == (u32::from(ip) >> shift)
        }
        (IpAddr::V6(net), IpAddr::V6(ip)) => {
            if prefix > 128 {
                return false;
            }
            if prefix == 0 {
                return true;
            }
            let shift = 128 - prefix;
            (u128::from(net) >> shift) == (u128::from(ip) >> shift)
        }
        _ => false,
    }
}
