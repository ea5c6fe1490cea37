//! Merged-descriptor arithmetic.

use spanbase_types::{unix_millis, RegionDescriptor};
use tracing::warn;

/// Compute the descriptor of the region produced by merging `a` and `b`,
/// stamped against the current wall clock.
///
/// Commutative in its arguments.
#[must_use]
pub fn merged_region_descriptor(a: &RegionDescriptor, b: &RegionDescriptor) -> RegionDescriptor {
    merged_region_descriptor_at(a, b, unix_millis())
}

/// [`merged_region_descriptor`] with an explicit clock reading.
///
/// The merged region id must never be less than either input id, else the
/// merged row would sort before its parents in the catalog. The id is
/// `max(now, a.id + 1, b.id + 1)`; a wall clock behind the input ids is
/// clock skew and gets a warning.
///
/// Key span is the union of the inputs: the smaller start key and the
/// larger end key, where an empty key is unbounded and wins.
#[must_use]
pub fn merged_region_descriptor_at(
    a: &RegionDescriptor,
    b: &RegionDescriptor,
    now_ms: u64,
) -> RegionDescriptor {
    debug_assert_eq!(a.table(), b.table(), "merging across tables");

    if now_ms < a.region_id() || now_ms < b.region_id() {
        warn!(
            a_id = a.region_id(),
            b_id = b.region_id(),
            now_ms,
            "clock skew: merging region ids are ahead of the wall clock"
        );
    }
    let floor = a.region_id().max(b.region_id()).saturating_add(1);
    let region_id = now_ms.max(floor);

    let start_key = if a.start_key().is_empty() || b.start_key().is_empty() {
        Vec::new()
    } else {
        a.start_key().min(b.start_key()).to_vec()
    };
    let end_key = if a.end_key().is_empty() || b.end_key().is_empty() {
        Vec::new()
    } else {
        a.end_key().max(b.end_key()).to_vec()
    };

    RegionDescriptor::new(a.table().clone(), start_key, end_key, region_id)
}
