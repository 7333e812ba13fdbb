//! Capability-based network selection.
//!
//! Pure functions over a registry snapshot, kept free of shared state so
//! the selection rules can be unit-tested in isolation.

use std::sync::Arc;

use crate::core::registry::RegistrySnapshot;
use crate::core::types::{NetHandle, NetSpecifier, NetworkRecord};

/// Picks the best network satisfying `specifier`, or `None` if nothing
/// matches.
///
/// Preference order: the default network if it matches, else the highest
/// combined bandwidth score, else the lowest handle (a deterministic
/// tie-break).
pub fn best_match(specifier: &NetSpecifier, snapshot: &RegistrySnapshot) -> Option<NetHandle> {
    if let Some(default) = snapshot.default_handle() {
        if let Some(record) = snapshot.get(default) {
            if specifier.matches(record) {
                return Some(default);
            }
        }
    }
    snapshot
        .records()
        .filter(|r| specifier.matches(r))
        .max_by_key(|r| (r.capabilities.bandwidth_score(), std::cmp::Reverse(r.handle)))
        .map(|r| r.handle)
}

/// All records satisfying `specifier`, ascending by handle.
pub fn matching_records<'a>(
    specifier: &NetSpecifier,
    snapshot: &'a RegistrySnapshot,
) -> Vec<&'a Arc<NetworkRecord>> {
    let mut records: Vec<_> = snapshot
        .records()
        .filter(|r| specifier.matches(r))
        .collect();
    records.sort_by_key(|r| r.handle);
    records
}
