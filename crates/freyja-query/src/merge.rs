//! Result merging for federated queries.
//!
//! When a resource has been migrated, both backends can return it. The
//! primary copy is authoritative, so the merged set keeps primary results in
//! their original order, then appends legacy results whose ids the primary
//! did not return. Any id repeated within one backend's results is kept once.

use std::collections::{HashMap, HashSet};

use freyja_core::{Resource, ResourceId};

/// Counts describing one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Results kept from the primary backend.
    pub primary: usize,
    /// Results kept from the legacy backend.
    pub legacy_only: usize,
    /// Legacy results dropped because the primary returned the same id.
    pub shadowed: usize,
    /// Results dropped because their id repeated within one backend.
    pub duplicates: usize,
}

/// Merge primary and legacy results; primary wins.
pub fn merge_results(primary: Vec<Resource>, legacy: Vec<Resource>) -> Vec<Resource> {
    merge_with_stats(primary, legacy).0
}

/// Like [`merge_results`], also reporting what was dropped.
pub fn merge_with_stats(
    primary: Vec<Resource>,
    legacy: Vec<Resource>,
) -> (Vec<Resource>, MergeStats) {
    let mut stats = MergeStats::default();
    let mut seen: HashSet<ResourceId> = HashSet::with_capacity(primary.len() + legacy.len());
    let mut merged = Vec::with_capacity(primary.len() + legacy.len());

    for resource in primary {
        if seen.insert(resource.id.clone()) {
            stats.primary += 1;
            merged.push(resource);
        } else {
            stats.duplicates += 1;
        }
    }

    let primary_ids = seen.clone();
    for resource in legacy {
        if primary_ids.contains(&resource.id) {
            stats.shadowed += 1;
        } else if seen.insert(resource.id.clone()) {
            stats.legacy_only += 1;
            merged.push(resource);
        } else {
            stats.duplicates += 1;
        }
    }

    (merged, stats)
}

/// Reorder `resources` to follow `order`; ids missing from `order` go last,
/// keeping their relative order.
/// An id listed twice sorts by its first position.
pub fn order_by_ids(mut resources: Vec<Resource>, order: &[ResourceId]) -> Vec<Resource> {
    let mut rank: HashMap<&ResourceId, usize> = HashMap::with_capacity(order.len());
    for (position, id) in order.iter().enumerate() {
        rank.entry(id).or_insert(position);
    }
    resources.sort_by_cached_key(|r| rank.get(&r.id).copied().unwrap_or(usize::MAX));
    resources
}
