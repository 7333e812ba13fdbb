//! Shared data model for the connectivity manager.
//!
//! Everything here is an immutable value type: registry mutations always
//! build a fresh snapshot rather than editing one in place, so records can
//! be handed to subscribers without copy-or-lock concerns.

use std::collections::BTreeSet;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Opaque identifier for one active network. Allocated monotonically by the
/// registry and never reissued for the lifetime of the manager.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NetHandle(pub u32);

impl std::fmt::Display for NetHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "net:{}", self.0)
    }
}

/// Boolean-valued network capability used for selection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum NetCap {
    /// Can reach the carrier's MMSC.
    Mms,
    /// Can reach the carrier's SUPL server.
    Supl,
    /// Can reach the carrier's DUN or tethering gateway.
    Dun,
    /// Can reach the FOTA upgrade server.
    Fota,
    /// Can reach the IMS server.
    Ims,
    /// Traffic on this network is not metered.
    NotMetered,
    /// General internet reachability.
    Internet,
    /// Usable by any application (not a system-restricted network).
    NotRestricted,
    /// The network is trusted.
    Trusted,
    /// The network does not run over a VPN.
    NotVpn,
    /// Confirmed reachable by an active probe.
    Validated,
    /// A captive portal was detected on the last probe.
    CaptivePortal,
    /// The network is not roaming.
    NotRoaming,
    /// Available only to foreground applications.
    Foreground,
    /// The network is not congested.
    NotCongested,
    /// The network is not suspended.
    NotSuspended,
    /// Reserved for system-internal default networks.
    InternalDefault,
}

/// Physical or logical transport class of a network.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum NetBearType {
    Cellular,
    Wifi,
    Bluetooth,
    Ethernet,
    Vpn,
    WifiAware,
    Lowpan,
}

/// Capability/bandwidth snapshot of one network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetCapabilities {
    /// Upstream link bandwidth estimate in kbps (0 = unknown).
    pub link_up_kbps: u32,
    /// Downstream link bandwidth estimate in kbps (0 = unknown).
    pub link_down_kbps: u32,
    pub caps: BTreeSet<NetCap>,
    pub bearer_types: BTreeSet<NetBearType>,
}

impl NetCapabilities {
    /// Capability snapshot for a single bearer with the given capability set.
    pub fn new(bearer: NetBearType, caps: impl IntoIterator<Item = NetCap>) -> Self {
        Self {
            link_up_kbps: 0,
            link_down_kbps: 0,
            caps: caps.into_iter().collect(),
            bearer_types: std::iter::once(bearer).collect(),
        }
    }

    pub fn has(&self, cap: NetCap) -> bool {
        self.caps.contains(&cap)
    }

    pub fn has_bearer(&self, bearer: NetBearType) -> bool {
        self.bearer_types.contains(&bearer)
    }

    /// Combined bandwidth score used for capability-match tie-breaking.
    pub fn bandwidth_score(&self) -> u64 {
        u64::from(self.link_up_kbps) + u64::from(self.link_down_kbps)
    }
}

/// An IP endpoint. `port` 0 means unspecified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetAddress {
    pub address: IpAddr,
    pub port: u16,
}

impl NetAddress {
    pub fn new(address: IpAddr, port: u16) -> Self {
        Self { address, port }
    }

    /// Address without a port.
    pub fn from_ip(address: IpAddr) -> Self {
        Self { address, port: 0 }
    }
}

/// An address with its on-link prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkAddress {
    pub address: NetAddress,
    pub prefix_len: u8,
}

/// One routing-table entry of a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteInfo {
    pub interface: String,
    pub destination: LinkAddress,
    pub gateway: Option<NetAddress>,
    pub is_default: bool,
}

/// Proxy protocol class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyType {
    /// High-level protocols such as HTTP or FTP.
    Http,
    /// SOCKS (V4 or V5).
    Socks,
}

/// An HTTP/SOCKS proxy endpoint with its bypass list.
///
/// Exclusion entries are matched against target hosts as exact names,
/// `*.suffix` wildcards, or CIDR blocks for IP-literal targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpProxy {
    pub host: String,
    pub port: u16,
    pub proxy_type: ProxyType,
    pub exclusion_list: Vec<String>,
}

impl HttpProxy {
    pub fn http(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            proxy_type: ProxyType::Http,
            exclusion_list: Vec::new(),
        }
    }
}

/// Link-layer connection properties of one network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProperties {
    pub interface_name: String,
    /// DNS search domains, space separated ("" = none).
    pub domains: String,
    /// Resolution order is significant.
    pub dns_servers: Vec<NetAddress>,
    pub routes: Vec<RouteInfo>,
    pub link_addresses: Vec<LinkAddress>,
    pub http_proxy: Option<HttpProxy>,
    pub mtu: u32,
}

/// One registered network as tracked by the registry. Snapshots are
/// immutable; every update replaces the whole record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub handle: NetHandle,
    pub capabilities: NetCapabilities,
    /// Traffic on this network counts against a data plan.
    pub metered: bool,
    /// Access policy currently blocks application traffic on this network.
    pub blocked: bool,
    /// Platform-assigned selection priority (higher wins the default slot).
    pub score: u32,
    /// Sequence number of the most recent validation; breaks default-slot
    /// ties in favor of the most recently validated network.
    pub validated_seq: u64,
    pub properties: ConnectionProperties,
}

impl NetworkRecord {
    pub fn is_validated(&self) -> bool {
        self.capabilities.has(NetCap::Validated)
    }

    /// Whether this network may hold the default slot: validated, not a VPN,
    /// and not reserved for system-internal use.
    pub fn default_eligible(&self) -> bool {
        self.is_validated()
            && !self.capabilities.has_bearer(NetBearType::Vpn)
            && !self.capabilities.has(NetCap::InternalDefault)
    }
}

/// A capability query used to request a matching network.
///
/// An empty bearer set means any bearer is acceptable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetSpecifier {
    pub capabilities: BTreeSet<NetCap>,
    pub bearer_types: BTreeSet<NetBearType>,
}

impl NetSpecifier {
    pub fn require(caps: impl IntoIterator<Item = NetCap>) -> Self {
        Self {
            capabilities: caps.into_iter().collect(),
            bearer_types: BTreeSet::new(),
        }
    }

    pub fn with_bearer(mut self, bearer: NetBearType) -> Self {
        self.bearer_types.insert(bearer);
        self
    }

    /// A record matches if its capability set is a superset of the required
    /// capabilities and (when a bearer filter is given) it has a bearer in
    /// the filter.
    pub fn matches(&self, record: &NetworkRecord) -> bool {
        if !self.capabilities.is_subset(&record.capabilities.caps) {
            return false;
        }
        self.bearer_types.is_empty()
            || !self.bearer_types.is_disjoint(&record.capabilities.bearer_types)
    }
}

/// IP assignment mode for a configured interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpSetMode {
    Static,
    Dhcp,
}

/// Static configuration for a managed (ethernet-class) interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfiguration {
    pub mode: IpSetMode,
    pub ip_addr: String,
    pub route: String,
    pub gateway: String,
    pub net_mask: String,
    /// Comma-separated resolver list.
    pub dns_servers: String,
    pub domain: String,
}

impl InterfaceConfiguration {
    /// Checks that the address-valued fields parse. DHCP mode skips the
    /// static address fields since the lease supplies them.
    pub fn validate(&self) -> Result<(), crate::error::NetError> {
        use crate::error::NetError;

        if self.mode == IpSetMode::Dhcp {
            return Ok(());
        }
        for (name, value) in [
            ("ipAddr", &self.ip_addr),
            ("gateway", &self.gateway),
            ("netMask", &self.net_mask),
        ] {
            if value.parse::<IpAddr>().is_err() {
                return Err(NetError::InvalidInput(format!(
                    "invalid {name}: {value:?}"
                )));
            }
        }
        for server in self
            .dns_servers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            if server.parse::<IpAddr>().is_err() {
                return Err(NetError::InvalidInput(format!(
                    "invalid dnsServers entry: {server:?}"
                )));
            }
        }
        Ok(())
    }
}

/// Background data-usage policy over metered networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackgroundPolicy {
    /// Applications can use metered networks in the background.
    Disable,
    /// Only allowlisted applications can use metered networks.
    AllowListed,
    /// Applications cannot use metered networks in the background.
    Enabled,
}
