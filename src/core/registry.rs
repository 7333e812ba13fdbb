//! Authoritative table of known networks.
//!
//! All mutations run under a single exclusive section; readers clone an
//! `Arc` snapshot and never observe a half-applied update. Every mutation
//! publishes a fresh snapshot, so records handed out are immutable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::core::types::{NetCap, NetHandle, NetworkRecord};
use crate::error::NetError;

/// Immutable view of the registry at one instant.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    records: HashMap<NetHandle, Arc<NetworkRecord>>,
    default_handle: Option<NetHandle>,
}

impl RegistrySnapshot {
    pub fn get(&self, handle: NetHandle) -> Option<&Arc<NetworkRecord>> {
        self.records.get(&handle)
    }

    /// All registered handles, ascending. No duplicates, no torn records.
    pub fn handles(&self) -> Vec<NetHandle> {
        let mut handles: Vec<NetHandle> = self.records.keys().copied().collect();
        handles.sort();
        handles
    }

    pub fn records(&self) -> impl Iterator<Item = &Arc<NetworkRecord>> {
        self.records.values()
    }

    pub fn default_handle(&self) -> Option<NetHandle> {
        self.default_handle
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Which parts of a record changed in an `upsert`. Drives event emission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryDiff {
    pub added: bool,
    pub capabilities_changed: bool,
    pub properties_changed: bool,
    pub metered_changed: bool,
    pub blocked_changed: bool,
}

impl RegistryDiff {
    pub fn any(&self) -> bool {
        self.added
            || self.capabilities_changed
            || self.properties_changed
            || self.metered_changed
            || self.blocked_changed
    }
}

struct Inner {
    records: HashMap<NetHandle, Arc<NetworkRecord>>,
    default_override: Option<NetHandle>,
}

/// Network table with copy-on-write snapshot reads.
pub struct NetworkRegistry {
    inner: Mutex<Inner>,
    snapshot: RwLock<Arc<RegistrySnapshot>>,
    next_handle: AtomicU32,
    validation_seq: AtomicU64,
}

impl NetworkRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                records: HashMap::new(),
                default_override: None,
            }),
            snapshot: RwLock::new(Arc::new(RegistrySnapshot::default())),
            next_handle: AtomicU32::new(1),
            validation_seq: AtomicU64::new(1),
        }
    }

    /// Issues a fresh handle. Handles are never reused.
    pub fn allocate_handle(&self) -> NetHandle {
        NetHandle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    /// Inserts or replaces the record for `record.handle` and reports which
    /// fields changed relative to the previous snapshot.
    pub fn upsert(&self, record: NetworkRecord) -> RegistryDiff {
        let mut inner = self.inner.lock().unwrap();
        let diff = match inner.records.get(&record.handle) {
            None => RegistryDiff {
                added: true,
                ..RegistryDiff::default()
            },
            Some(old) => RegistryDiff {
                added: false,
                capabilities_changed: old.capabilities != record.capabilities,
                properties_changed: old.properties != record.properties,
                metered_changed: old.metered != record.metered,
                blocked_changed: old.blocked != record.blocked,
            },
        };
        inner.records.insert(record.handle, Arc::new(record));
        self.publish(&inner);
        diff
    }

    /// Removes a network. Terminal for the handle: later `get` calls fail
    /// with `NotFound`.
    pub fn remove(&self, handle: NetHandle) -> Result<Arc<NetworkRecord>, NetError> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner
            .records
            .remove(&handle)
            .ok_or_else(|| NetError::unknown_handle(handle))?;
        if inner.default_override == Some(handle) {
            inner.default_override = None;
        }
        self.publish(&inner);
        Ok(record)
    }

    /// Marks a network validated (external probe succeeded), stamping it as
    /// the most recently validated for default-slot tie-breaking.
    pub fn mark_validated(&self, handle: NetHandle) -> Result<RegistryDiff, NetError> {
        self.update_validation(handle, true)
    }

    /// Clears the validated state (external probe reported loss).
    pub fn clear_validated(&self, handle: NetHandle) -> Result<RegistryDiff, NetError> {
        self.update_validation(handle, false)
    }

    fn update_validation(
        &self,
        handle: NetHandle,
        validated: bool,
    ) -> Result<RegistryDiff, NetError> {
        let mut inner = self.inner.lock().unwrap();
        let old = inner
            .records
            .get(&handle)
            .ok_or_else(|| NetError::unknown_handle(handle))?;

        let mut record = NetworkRecord::clone(old);
        let changed = if validated {
            let newly = record.capabilities.caps.insert(NetCap::Validated);
            record.validated_seq = self.validation_seq.fetch_add(1, Ordering::Relaxed);
            newly
        } else {
            record.capabilities.caps.remove(&NetCap::Validated)
        };
        inner.records.insert(handle, Arc::new(record));
        self.publish(&inner);
        Ok(RegistryDiff {
            capabilities_changed: changed,
            ..RegistryDiff::default()
        })
    }

    /// Pins (or unpins) the default slot to an explicit network.
    pub fn set_default_override(&self, handle: Option<NetHandle>) -> Result<(), NetError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(h) = handle {
            if !inner.records.contains_key(&h) {
                return Err(NetError::unknown_handle(h));
            }
        }
        inner.default_override = handle;
        self.publish(&inner);
        Ok(())
    }

    pub fn get(&self, handle: NetHandle) -> Result<Arc<NetworkRecord>, NetError> {
        self.snapshot()
            .get(handle)
            .cloned()
            .ok_or_else(|| NetError::unknown_handle(handle))
    }

    /// Current immutable view. Cheap: clones one `Arc`.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.read().unwrap().clone()
    }

    pub fn default_handle(&self) -> Option<NetHandle> {
        self.snapshot().default_handle()
    }

    /// Rebuilds and swaps in the published snapshot. Callers hold the inner
    /// lock, so publishes are totally ordered.
    fn publish(&self, inner: &Inner) {
        let default_handle = Self::compute_default(inner);
        let snapshot = RegistrySnapshot {
            records: inner.records.clone(),
            default_handle,
        };
        *self.snapshot.write().unwrap() = Arc::new(snapshot);
    }

    /// Default slot: explicit override if still registered, else the
    /// highest-score eligible network, ties to the most recently validated.
    fn compute_default(inner: &Inner) -> Option<NetHandle> {
        if let Some(handle) = inner.default_override {
            if inner.records.contains_key(&handle) {
                return Some(handle);
            }
        }
        inner
            .records
            .values()
            .filter(|r| r.default_eligible())
            .max_by_key(|r| (r.score, r.validated_seq))
            .map(|r| r.handle)
    }
}

impl Default for NetworkRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ConnectionProperties, NetBearType, NetCapabilities};

    fn make_record(registry: &NetworkRegistry, bearer: NetBearType, score: u32) -> NetworkRecord {
        NetworkRecord {
            handle: registry.allocate_handle(),
            capabilities: NetCapabilities::new(bearer, [NetCap::Internet]),
            metered: false,
            blocked: false,
            score,
            validated_seq: 0,
            properties: ConnectionProperties::default(),
        }
    }

    #[test]
    fn test_upsert_reports_added_then_changes() {
        let registry = NetworkRegistry::new();
        let record = make_record(&registry, NetBearType::Wifi, 50);
        let handle = record.handle;

        let diff = registry.upsert(record.clone());
        assert!(diff.added);
        assert!(!diff.capabilities_changed);

        let mut updated = record;
        updated.capabilities.link_down_kbps = 50_000;
        updated.metered = true;
        let diff = registry.upsert(updated);
        assert!(!diff.added);
        assert!(diff.capabilities_changed);
        assert!(diff.metered_changed);
        assert!(!diff.properties_changed);

        assert!(registry.get(handle).is_ok());
    }

    #[test]
    fn test_remove_is_terminal() {
        let registry = NetworkRegistry::new();
        let record = make_record(&registry, NetBearType::Wifi, 50);
        let handle = record.handle;
        registry.upsert(record);

        assert!(registry.remove(handle).is_ok());
        assert_eq!(registry.get(handle).unwrap_err().kind(), "NotFound");
        assert_eq!(registry.remove(handle).unwrap_err().kind(), "NotFound");
    }

    #[test]
    fn test_handles_never_duplicated_or_resurrected() {
        let registry = NetworkRegistry::new();
        let mut live = Vec::new();
        for i in 0..10 {
            let record = make_record(&registry, NetBearType::Cellular, i);
            live.push(record.handle);
            registry.upsert(record);
        }
        // Re-upsert half, remove the other half.
        for (i, handle) in live.clone().into_iter().enumerate() {
            if i % 2 == 0 {
                let record = registry.get(handle).unwrap();
                registry.upsert(NetworkRecord::clone(&record));
            } else {
                registry.remove(handle).unwrap();
            }
        }
        let handles = registry.snapshot().handles();
        let expected: Vec<NetHandle> = live
            .iter()
            .enumerate()
            .filter(|(i, _)| i % 2 == 0)
            .map(|(_, h)| *h)
            .collect();
        assert_eq!(handles, expected);
        let mut dedup = handles.clone();
        dedup.dedup();
        assert_eq!(dedup, handles, "snapshot contained a duplicate handle");
    }

    #[test]
    fn test_default_prefers_score_then_recency() {
        let registry = NetworkRegistry::new();
        let wifi = make_record(&registry, NetBearType::Wifi, 70);
        let cell = make_record(&registry, NetBearType::Cellular, 40);
        let (wifi_h, cell_h) = (wifi.handle, cell.handle);
        registry.upsert(wifi);
        registry.upsert(cell);

        // Nothing validated yet: no default.
        assert_eq!(registry.default_handle(), None);

        registry.mark_validated(cell_h).unwrap();
        assert_eq!(registry.default_handle(), Some(cell_h));

        // Higher score wins once validated.
        registry.mark_validated(wifi_h).unwrap();
        assert_eq!(registry.default_handle(), Some(wifi_h));

        // Equal scores: most recently validated wins.
        let mut cell_up = NetworkRecord::clone(&registry.get(cell_h).unwrap());
        cell_up.score = 70;
        registry.upsert(cell_up);
        registry.mark_validated(cell_h).unwrap();
        assert_eq!(registry.default_handle(), Some(cell_h));
    }

    #[test]
    fn test_vpn_never_takes_default_slot() {
        let registry = NetworkRegistry::new();
        let vpn = make_record(&registry, NetBearType::Vpn, 200);
        let vpn_h = vpn.handle;
        registry.upsert(vpn);
        registry.mark_validated(vpn_h).unwrap();
        assert_eq!(registry.default_handle(), None);
    }

    #[test]
    fn test_default_override_and_clearing_on_removal() {
        let registry = NetworkRegistry::new();
        let wifi = make_record(&registry, NetBearType::Wifi, 70);
        let cell = make_record(&registry, NetBearType::Cellular, 40);
        let (wifi_h, cell_h) = (wifi.handle, cell.handle);
        registry.upsert(wifi);
        registry.upsert(cell);
        registry.mark_validated(wifi_h).unwrap();

        registry.set_default_override(Some(cell_h)).unwrap();
        assert_eq!(registry.default_handle(), Some(cell_h));

        // Removing the pinned network falls back to automatic selection.
        registry.remove(cell_h).unwrap();
        assert_eq!(registry.default_handle(), Some(wifi_h));

        assert_eq!(
            registry
                .set_default_override(Some(NetHandle(999)))
                .unwrap_err()
                .kind(),
            "NotFound"
        );
    }

    #[test]
    fn test_clear_validated_vacates_default() {
        let registry = NetworkRegistry::new();
        let wifi = make_record(&registry, NetBearType::Wifi, 70);
        let wifi_h = wifi.handle;
        registry.upsert(wifi);
        registry.mark_validated(wifi_h).unwrap();
        assert_eq!(registry.default_handle(), Some(wifi_h));

        registry.clear_validated(wifi_h).unwrap();
        assert_eq!(registry.default_handle(), None);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_mutations() {
        let registry = NetworkRegistry::new();
        let record = make_record(&registry, NetBearType::Wifi, 50);
        let handle = record.handle;
        registry.upsert(record);

        let before = registry.snapshot();
        registry.remove(handle).unwrap();
        assert!(before.get(handle).is_some(), "old snapshot must be stable");
        assert!(registry.snapshot().get(handle).is_none());
    }
}
