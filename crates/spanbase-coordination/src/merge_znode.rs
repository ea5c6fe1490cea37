//! Merge-node protocol: the coordination-service choreography for a region
//! merge.
//!
//! All operations target a single node keyed by the merged region's encoded
//! name under `<root>/region-in-transition/`. The node is created ephemeral
//! in the MERGING state, CAS-transitioned to MERGE when the merge commits,
//! and then repeatedly "tickled" (MERGE to MERGE self-transitions) so the
//! controller sees a change event even if it missed earlier ones. Every
//! transition is compare-and-swap on version; a lost race reports `-1`
//! rather than an error, and the caller treats that as lost ownership (or,
//! in the tickle loop, as the controller having consumed the node).

use spanbase_error::{Result, SpanError};
use spanbase_types::transition::write_delimited;
use spanbase_types::{RegionDescriptor, RegionEventType, RegionTransition, ServerName};
use tracing::{debug, warn};

use crate::CoordinationClient;

/// Returned by transitions when the node is gone, in a foreign state, or
/// the version moved: the caller no longer owns the node.
pub const LOST_OWNERSHIP: i32 = -1;

/// Path of the region-in-transition node for an encoded region name.
#[must_use]
pub fn region_transition_path(root: &str, encoded_name: &str) -> String {
    format!("{root}/region-in-transition/{encoded_name}")
}

/// Create the ephemeral MERGING node for the merged region.
///
/// Ephemeral so the claim evaporates if this node's session dies mid-merge.
/// Fails with `NodeExists` when another server already claimed this merge
/// (or a stale claim has not yet expired).
pub fn create_node_merging(
    client: &dyn CoordinationClient,
    root: &str,
    merged: &RegionDescriptor,
    origin: &ServerName,
) -> Result<()> {
    let path = region_transition_path(root, &merged.encoded_name());
    debug!(%merged, %path, "creating ephemeral node in MERGING state");
    let record = RegionTransition::new(
        RegionEventType::RegionMerging,
        merged.region_name(),
        origin.clone(),
    );
    client.create_ephemeral(&path, &record.to_bytes())
}

/// MERGING to MERGING self-transition.
///
/// Creation does not return a version suitable for later CAS; this picks up
/// a fresh version the caller records for the rest of the transaction, and
/// raises a change event for the controller.
pub fn transition_node_merging(
    client: &dyn CoordinationClient,
    root: &str,
    merged: &RegionDescriptor,
    origin: &ServerName,
    expected_version: i32,
) -> Result<i32> {
    transition_node(
        client,
        root,
        merged,
        RegionEventType::RegionMerging,
        RegionEventType::RegionMerging,
        origin,
        expected_version,
        Vec::new(),
    )
}

/// MERGING to MERGE: announce the committed merge to the controller.
///
/// Payload carries the delimited `(merged, a, b)` descriptors the controller
/// needs to finish roll-forward.
pub fn transition_node_merge(
    client: &dyn CoordinationClient,
    root: &str,
    merged: &RegionDescriptor,
    a: &RegionDescriptor,
    b: &RegionDescriptor,
    origin: &ServerName,
    expected_version: i32,
) -> Result<i32> {
    let payload = write_delimited(&[merged.clone(), a.clone(), b.clone()]);
    transition_node(
        client,
        root,
        merged,
        RegionEventType::RegionMerging,
        RegionEventType::RegionMerge,
        origin,
        expected_version,
        payload,
    )
}

/// MERGE to MERGE self-transition ("tickle").
///
/// Returns [`LOST_OWNERSHIP`] once the controller has deleted the node,
/// which is the signal that it processed the merge.
pub fn tickle_node_merge(
    client: &dyn CoordinationClient,
    root: &str,
    merged: &RegionDescriptor,
    a: &RegionDescriptor,
    b: &RegionDescriptor,
    origin: &ServerName,
    expected_version: i32,
) -> Result<i32> {
    let payload = write_delimited(&[a.clone(), b.clone()]);
    transition_node(
        client,
        root,
        merged,
        RegionEventType::RegionMerge,
        RegionEventType::RegionMerge,
        origin,
        expected_version,
        payload,
    )
}

/// Delete the merge node iff it is still in the MERGING state.
///
/// Tolerates an already-gone node. A node found in a foreign state was
/// hijacked by another actor and is left alone. Any other coordination
/// fault propagates for the caller to escalate.
pub fn delete_merging_node(
    client: &dyn CoordinationClient,
    root: &str,
    merged: &RegionDescriptor,
) -> Result<()> {
    let path = region_transition_path(root, &merged.encoded_name());
    let (data, version) = match client.get_data(&path) {
        Ok(found) => found,
        Err(SpanError::NoNode { .. }) => {
            warn!(%merged, %path, "merge node already gone, nothing to clean");
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    let record = RegionTransition::from_bytes(&data)
        .ok_or_else(|| SpanError::corrupt(format!("transition record at {path}")))?;
    if record.event() != RegionEventType::RegionMerging {
        warn!(%merged, %path, event = ?record.event(), "merge node not in MERGING state, leaving it");
        return Ok(());
    }
    match client.delete(&path, version) {
        Ok(()) | Err(SpanError::NoNode { .. }) => Ok(()),
        Err(e) => Err(e),
    }
}

#[allow(clippy::too_many_arguments)]
fn transition_node(
    client: &dyn CoordinationClient,
    root: &str,
    region: &RegionDescriptor,
    from: RegionEventType,
    to: RegionEventType,
    origin: &ServerName,
    expected_version: i32,
    payload: Vec<u8>,
) -> Result<i32> {
    let path = region_transition_path(root, &region.encoded_name());
    let (data, version) = match client.get_data(&path) {
        Ok(found) => found,
        Err(SpanError::NoNode { .. }) => return Ok(LOST_OWNERSHIP),
        Err(e) => return Err(e),
    };
    let current = RegionTransition::from_bytes(&data)
        .ok_or_else(|| SpanError::corrupt(format!("transition record at {path}")))?;
    if current.event() != from {
        warn!(
            %region, %path, expected = ?from, found = ?current.event(),
            "node not in expected state, cannot transition"
        );
        return Ok(LOST_OWNERSHIP);
    }
    if expected_version != -1 && version != expected_version {
        warn!(
            %region, %path, expected_version, actual = version,
            "node version moved, cannot transition"
        );
        return Ok(LOST_OWNERSHIP);
    }

    let record = RegionTransition::new(to, region.region_name(), origin.clone())
        .with_payload(payload);
    match client.compare_and_set(&path, version, &record.to_bytes()) {
        Ok(new_version) => Ok(new_version),
        Err(SpanError::NoNode { .. } | SpanError::BadVersion { .. }) => Ok(LOST_OWNERSHIP),
        Err(e) => Err(e),
    }
}
