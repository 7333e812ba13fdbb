//! Traffic accounting using DashMap for lock-free concurrent access.
//!
//! Monotonic rx/tx byte counters in two dimensions: per interface and per
//! application uid, plus aggregate and cellular rollups. Attribution to an
//! interface that was never registered fails with `NotFound` instead of
//! creating a phantom entry.

use std::sync::Mutex;

use dashmap::DashMap;
use serde::Serialize;

use crate::core::types::NetBearType;
use crate::error::NetError;

#[derive(Debug)]
struct IfaceCounters {
    bearer: NetBearType,
    rx_bytes: u64,
    tx_bytes: u64,
}

#[derive(Debug, Default)]
struct UidCounters {
    rx_bytes: u64,
    tx_bytes: u64,
}

#[derive(Debug, Default)]
struct Totals {
    rx_bytes: u64,
    tx_bytes: u64,
}

/// Per-interface traffic state, serializable for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct IfaceTrafficSnapshot {
    pub iface: String,
    pub bearer: NetBearType,
    /// Cumulative bytes received since registration.
    pub rx_bytes: u64,
    /// Cumulative bytes sent since registration.
    pub tx_bytes: u64,
}

/// Per-application traffic state, serializable for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct UidTrafficSnapshot {
    pub uid: u32,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Thread-safe traffic accountant. Counters only increase; queries read an
/// atomic per-entry snapshot.
pub struct TrafficAccountant {
    ifaces: DashMap<String, IfaceCounters>,
    uids: DashMap<u32, UidCounters>,
    totals: Mutex<Totals>,
}

impl TrafficAccountant {
    pub fn new() -> Self {
        Self {
            ifaces: DashMap::new(),
            uids: DashMap::new(),
            totals: Mutex::new(Totals::default()),
        }
    }

    /// Makes an interface attributable. Idempotent; re-registering updates
    /// the bearer class but keeps accumulated counters (an interface that
    /// was once registered stays attributable after its network is gone).
    pub fn register_iface(&self, iface: &str, bearer: NetBearType) {
        self.ifaces
            .entry(iface.to_string())
            .and_modify(|c| c.bearer = bearer)
            .or_insert(IfaceCounters {
                bearer,
                rx_bytes: 0,
                tx_bytes: 0,
            });
    }

    /// Attributes a traffic delta to an interface and optionally to an
    /// application uid. Fails with `NotFound` for an interface that was
    /// never registered.
    pub fn record(
        &self,
        iface: &str,
        uid: Option<u32>,
        rx_bytes: u64,
        tx_bytes: u64,
    ) -> Result<(), NetError> {
        {
            let mut entry = self
                .ifaces
                .get_mut(iface)
                .ok_or_else(|| NetError::unknown_iface(iface))?;
            entry.rx_bytes = entry.rx_bytes.saturating_add(rx_bytes);
            entry.tx_bytes = entry.tx_bytes.saturating_add(tx_bytes);
        }
        if let Some(uid) = uid {
            let mut entry = self.uids.entry(uid).or_default();
            entry.rx_bytes = entry.rx_bytes.saturating_add(rx_bytes);
            entry.tx_bytes = entry.tx_bytes.saturating_add(tx_bytes);
        }
        let mut totals = self.totals.lock().unwrap();
        totals.rx_bytes = totals.rx_bytes.saturating_add(rx_bytes);
        totals.tx_bytes = totals.tx_bytes.saturating_add(tx_bytes);
        Ok(())
    }

    pub fn iface_rx_bytes(&self, iface: &str) -> Result<u64, NetError> {
        self.ifaces
            .get(iface)
            .map(|c| c.rx_bytes)
            .ok_or_else(|| NetError::unknown_iface(iface))
    }

    pub fn iface_tx_bytes(&self, iface: &str) -> Result<u64, NetError> {
        self.ifaces
            .get(iface)
            .map(|c| c.tx_bytes)
            .ok_or_else(|| NetError::unknown_iface(iface))
    }

    /// Bytes received by `uid`. An application with no recorded traffic
    /// reads as zero.
    pub fn uid_rx_bytes(&self, uid: u32) -> u64 {
        self.uids.get(&uid).map(|c| c.rx_bytes).unwrap_or(0)
    }

    pub fn uid_tx_bytes(&self, uid: u32) -> u64 {
        self.uids.get(&uid).map(|c| c.tx_bytes).unwrap_or(0)
    }

    pub fn all_rx_bytes(&self) -> u64 {
        self.totals.lock().unwrap().rx_bytes
    }

    pub fn all_tx_bytes(&self) -> u64 {
        self.totals.lock().unwrap().tx_bytes
    }

    /// Rollup over interfaces registered with the cellular bearer.
    pub fn cellular_rx_bytes(&self) -> u64 {
        self.ifaces
            .iter()
            .filter(|entry| entry.bearer == NetBearType::Cellular)
            .map(|entry| entry.rx_bytes)
            .sum()
    }

    pub fn cellular_tx_bytes(&self) -> u64 {
        self.ifaces
            .iter()
            .filter(|entry| entry.bearer == NetBearType::Cellular)
            .map(|entry| entry.tx_bytes)
            .sum()
    }

    /// Diagnostic snapshot of all interface counters, sorted by name.
    pub fn snapshot_ifaces(&self) -> Vec<IfaceTrafficSnapshot> {
        let mut snapshot: Vec<IfaceTrafficSnapshot> = self
            .ifaces
            .iter()
            .map(|entry| IfaceTrafficSnapshot {
                iface: entry.key().clone(),
                bearer: entry.bearer,
                rx_bytes: entry.rx_bytes,
                tx_bytes: entry.tx_bytes,
            })
            .collect();
        snapshot.sort_by(|a, b| a.iface.cmp(&b.iface));
        snapshot
    }

    /// Diagnostic snapshot of all uid counters, sorted by uid.
    pub fn snapshot_uids(&self) -> Vec<UidTrafficSnapshot> {
        let mut snapshot: Vec<UidTrafficSnapshot> = self
            .uids
            .iter()
            .map(|entry| UidTrafficSnapshot {
                uid: *entry.key(),
                rx_bytes: entry.rx_bytes,
                tx_bytes: entry.tx_bytes,
            })
            .collect();
        snapshot.sort_by_key(|s| s.uid);
        snapshot
    }
}

impl Default for TrafficAccountant {
    fn default() -> Self {
        Self::new()
    }
}
