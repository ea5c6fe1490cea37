//! End-to-end merge transaction tests against a standalone host: in-memory
//! coordination and catalog, real region directories on a temp filesystem,
//! and a test thread playing the controller.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use spanbase_catalog::Catalog;
use spanbase_coordination::merge_znode::{create_node_merging, region_transition_path};
use spanbase_coordination::CoordinationClient;
use spanbase_error::SpanError;
use spanbase_merge::{JournalEntry, MergeTransaction};
use spanbase_server::{HostLifecycle, HostedRegion, LocalHost, RegionRegistry, ServerConfig};
use spanbase_types::{RegionDescriptor, RegionEventType, RegionTransition, ServerName, TableName};
use tempfile::TempDir;

const FULL_JOURNAL: [JournalEntry; 8] = [
    JournalEntry::SetMergingInCoordination,
    JournalEntry::CreatedMergeDir,
    JournalEntry::ClosedRegionA,
    JournalEntry::OfflinedRegionA,
    JournalEntry::ClosedRegionB,
    JournalEntry::OfflinedRegionB,
    JournalEntry::StartedMergedRegionCreation,
    JournalEntry::PointOfNoReturn,
];

struct Cluster {
    _tmp: TempDir,
    root: PathBuf,
    host: Arc<LocalHost>,
    region_a: Arc<HostedRegion>,
    region_b: Arc<HostedRegion>,
}

fn cluster(config: ServerConfig) -> Cluster {
    cluster_with_ranges(config, (b"a", b"m"), (b"m", b"z"))
}

fn cluster_with_ranges(
    config: ServerConfig,
    (a_start, a_end): (&[u8], &[u8]),
    (b_start, b_end): (&[u8], &[u8]),
) -> Cluster {
    let tmp = tempfile::tempdir().expect("tempdir");
    let root = tmp.path().to_path_buf();
    let host = Arc::new(LocalHost::new(
        ServerName::new("node-1", 16020, 7),
        config,
    ));

    let desc_a = RegionDescriptor::new(TableName::new("t"), a_start, a_end, 10);
    let desc_b = RegionDescriptor::new(TableName::new("t"), b_start, b_end, 20);

    let region_a = HostedRegion::create(&root, desc_a.clone()).expect("create region a");
    region_a
        .filesystem()
        .write_store_file("cf1", "sf-a1", b"a-one")
        .expect("store file");
    region_a
        .filesystem()
        .write_store_file("cf1", "sf-a2", b"a-two")
        .expect("store file");
    region_a
        .filesystem()
        .write_store_file("cf2", "sf-a3", b"a-three")
        .expect("store file");

    let region_b = HostedRegion::create(&root, desc_b.clone()).expect("create region b");
    region_b
        .filesystem()
        .write_store_file("cf1", "sf-b1", b"b-one")
        .expect("store file");

    host.add_online(Arc::clone(&region_a));
    host.add_online(Arc::clone(&region_b));
    let catalog = host.catalog_handle();
    catalog
        .put_region(&desc_a, Some(host.server_name()))
        .expect("catalog row a");
    catalog
        .put_region(&desc_b, Some(host.server_name()))
        .expect("catalog row b");

    Cluster {
        _tmp: tmp,
        root,
        host,
        region_a,
        region_b,
    }
}

/// Play the controller: wait for the MERGE announcement, then consume the
/// node by deleting it.
fn spawn_controller(host: &LocalHost, merged: &RegionDescriptor) -> thread::JoinHandle<()> {
    let coord = host.coordination_handle();
    let path = region_transition_path(&host.config().coordination_root, &merged.encoded_name());
    thread::spawn(move || {
        for _ in 0..1_000 {
            if let Ok((data, _)) = coord.get_data(&path) {
                let record = RegionTransition::from_bytes(&data).expect("transition record");
                if record.event() == RegionEventType::RegionMerge {
                    coord.delete(&path, -1).expect("consume merge node");
                    return;
                }
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("controller never observed the merge announcement");
    })
}

fn use_host(host: &Arc<LocalHost>) -> &LocalHost {
    host.as_ref()
}

#[test]
fn happy_path_merges_adjacent_regions() {
    let c = cluster(ServerConfig::default());
    let mut txn = MergeTransaction::new(Arc::clone(&c.region_a), Arc::clone(&c.region_b), false);
    assert!(txn.prepare(use_host(&c.host)));

    let merged_desc = txn.merged_descriptor().cloned().expect("prepared");
    assert_eq!(merged_desc.start_key(), b"a");
    assert_eq!(merged_desc.end_key(), b"z");
    assert!(merged_desc.region_id() > 20);

    let controller = spawn_controller(&c.host, &merged_desc);
    let merged_region = txn
        .execute(use_host(&c.host), use_host(&c.host))
        .expect("execute");
    controller.join().expect("controller");

    assert_eq!(txn.journal(), FULL_JOURNAL.as_slice());

    // Registry: merged online, parents gone.
    let online = c.host.online_regions();
    assert_eq!(online.len(), 1);
    assert!(online.contains(&merged_desc.encoded_name()));
    assert!(!online.contains(&c.region_a.encoded_name()));
    assert!(!online.contains(&c.region_b.encoded_name()));
    assert!(merged_region.is_mergeable());
    assert!(c.region_a.is_closed());
    assert!(c.region_b.is_closed());

    // Catalog: lineage on the merged row, merged-into pointers on parents.
    let catalog = c.host.catalog_handle();
    let merged_row = catalog
        .get_region(&merged_desc.region_name())
        .expect("read")
        .expect("merged row");
    assert_eq!(merged_row.merge_a.as_ref(), Some(c.region_a.descriptor()));
    assert_eq!(merged_row.merge_b.as_ref(), Some(c.region_b.descriptor()));
    for parent in [&c.region_a, &c.region_b] {
        let row = catalog
            .get_region(&parent.descriptor().region_name())
            .expect("read")
            .expect("parent row");
        assert_eq!(row.merged_into.as_ref(), Some(&merged_desc));
    }

    // Coordination: the controller consumed the node.
    assert!(c.host.coordination_handle().is_empty());

    // Filesystem: one reference per source store file, in the final
    // location; the staging dir is left for the catalog janitor.
    let files = merged_region.filesystem().store_files().expect("files");
    assert_eq!(files["cf1"].len(), 3);
    assert_eq!(files["cf2"].len(), 1);
    assert!(txn.merges_dir().exists());
}

#[test]
fn forcible_merge_spans_the_gap() {
    let c = cluster_with_ranges(ServerConfig::default(), (b"a", b"c"), (b"m", b"z"));
    let mut txn = MergeTransaction::new(Arc::clone(&c.region_a), Arc::clone(&c.region_b), true);
    assert!(txn.prepare(use_host(&c.host)));

    let merged_desc = txn.merged_descriptor().cloned().expect("prepared");
    assert_eq!(merged_desc.start_key(), b"a");
    assert_eq!(merged_desc.end_key(), b"z");

    let controller = spawn_controller(&c.host, &merged_desc);
    txn.execute(use_host(&c.host), use_host(&c.host))
        .expect("execute");
    controller.join().expect("controller");

    assert_eq!(txn.journal(), FULL_JOURNAL.as_slice());
    assert!(c.host.online_regions().contains(&merged_desc.encoded_name()));
}

#[test]
fn non_adjacent_regions_are_rejected_without_forcible() {
    let c = cluster_with_ranges(ServerConfig::default(), (b"a", b"c"), (b"m", b"z"));
    let mut txn = MergeTransaction::new(Arc::clone(&c.region_a), Arc::clone(&c.region_b), false);

    assert!(!txn.prepare(use_host(&c.host)));
    assert!(txn.merged_descriptor().is_none());

    // Nothing moved.
    assert_eq!(c.host.online_regions().len(), 2);
    assert!(c.region_a.is_mergeable());
    assert!(c.region_b.is_mergeable());
}

#[test]
fn prepare_rejects_bad_pairs() {
    let c = cluster(ServerConfig::default());

    // A region cannot merge with itself.
    let mut txn = MergeTransaction::new(Arc::clone(&c.region_a), Arc::clone(&c.region_a), true);
    assert!(!txn.prepare(use_host(&c.host)));

    // Different tables never merge, forcible or not.
    let other = HostedRegion::create(
        &c.root,
        RegionDescriptor::new(TableName::new("u"), b"m".to_vec(), b"z".to_vec(), 20),
    )
    .expect("create");
    let mut txn = MergeTransaction::new(Arc::clone(&c.region_a), other, true);
    assert!(!txn.prepare(use_host(&c.host)));

    // A closed region is not mergeable.
    c.region_b.close(false).expect("close").expect("own close");
    let mut txn = MergeTransaction::new(Arc::clone(&c.region_a), Arc::clone(&c.region_b), false);
    assert!(!txn.prepare(use_host(&c.host)));
}

#[test]
fn prepare_rejects_unreaped_merge_parents() {
    let c = cluster(ServerConfig::default());

    // Make region A look like the product of an earlier merge the janitor
    // has not reaped yet.
    let old_a = RegionDescriptor::new(TableName::new("t"), b"a".to_vec(), b"f".to_vec(), 1);
    let old_b = RegionDescriptor::new(TableName::new("t"), b"f".to_vec(), b"m".to_vec(), 2);
    c.host
        .catalog_handle()
        .merge_regions(c.region_a.descriptor(), &old_a, &old_b, c.host.server_name())
        .expect("lineage");

    let mut txn = MergeTransaction::new(Arc::clone(&c.region_a), Arc::clone(&c.region_b), false);
    assert!(!txn.prepare(use_host(&c.host)));
}

#[test]
fn prepare_reports_false_on_catalog_read_failure() {
    let c = cluster(ServerConfig::default());
    c.host.catalog_handle().inject_read_failure(true);

    let mut txn = MergeTransaction::new(Arc::clone(&c.region_a), Arc::clone(&c.region_b), false);
    assert!(!txn.prepare(use_host(&c.host)));
    assert!(txn.merged_descriptor().is_none());
}

#[test]
fn contended_merge_node_fails_with_empty_journal() {
    let c = cluster(ServerConfig::default());
    let mut txn = MergeTransaction::new(Arc::clone(&c.region_a), Arc::clone(&c.region_b), false);
    assert!(txn.prepare(use_host(&c.host)));
    let merged_desc = txn.merged_descriptor().cloned().expect("prepared");

    // Another server already holds the merge node.
    let coord = c.host.coordination_handle();
    create_node_merging(
        &*coord,
        &c.host.config().coordination_root,
        &merged_desc,
        &ServerName::new("node-2", 16020, 8),
    )
    .expect("foreign claim");

    let err = txn
        .execute(use_host(&c.host), use_host(&c.host))
        .expect_err("contended");
    assert!(matches!(err, SpanError::NodeExists { .. }));
    assert!(txn.journal().is_empty());

    assert!(txn
        .rollback(use_host(&c.host), use_host(&c.host))
        .expect("rollback"));

    // Nothing changed, and the foreign claim is untouched.
    assert_eq!(c.host.online_regions().len(), 2);
    assert!(c.region_a.is_mergeable());
    assert!(c.region_b.is_mergeable());
    let path = region_transition_path(
        &c.host.config().coordination_root,
        &merged_desc.encoded_name(),
    );
    assert!(coord.exists(&path).expect("exists"));
}

#[test]
fn concurrent_close_of_region_b_rolls_back_cleanly() {
    let c = cluster(ServerConfig::default());
    let mut txn = MergeTransaction::new(Arc::clone(&c.region_a), Arc::clone(&c.region_b), false);
    assert!(txn.prepare(use_host(&c.host)));

    // Some other actor closes B between prepare and execute.
    c.region_b
        .close(false)
        .expect("close")
        .expect("external close");

    let err = txn
        .execute(use_host(&c.host), use_host(&c.host))
        .expect_err("close beaten");
    assert!(matches!(err, SpanError::RegionAlreadyClosed { .. }));

    // B's close is not ours, so it is not journaled.
    assert_eq!(
        txn.journal(),
        [
            JournalEntry::SetMergingInCoordination,
            JournalEntry::CreatedMergeDir,
            JournalEntry::ClosedRegionA,
            JournalEntry::OfflinedRegionA,
        ]
        .as_slice()
    );

    assert!(txn
        .rollback(use_host(&c.host), use_host(&c.host))
        .expect("rollback"));

    // A is back online and mergeable; the staging dir and the merge node
    // are gone. B stays as the other actor left it.
    assert!(c.host.online_regions().contains(&c.region_a.encoded_name()));
    assert!(c.region_a.is_mergeable());
    assert!(!txn.merges_dir().exists());
    assert!(c.host.coordination_handle().is_empty());
    assert!(c.region_b.is_closed());

    // Rolling back again is a no-op with the same outcome.
    assert!(txn
        .rollback(use_host(&c.host), use_host(&c.host))
        .expect("second rollback"));
    assert!(c.host.online_regions().contains(&c.region_a.encoded_name()));
    assert!(c.region_a.is_mergeable());
}

#[test]
fn rollback_escalates_when_an_undo_step_fails() {
    let c = cluster(ServerConfig::default());
    let mut txn = MergeTransaction::new(Arc::clone(&c.region_a), Arc::clone(&c.region_b), false);
    assert!(txn.prepare(use_host(&c.host)));
    c.region_b
        .close(false)
        .expect("close")
        .expect("external close");
    txn.execute(use_host(&c.host), use_host(&c.host))
        .expect_err("close beaten");

    // Region A's directory vanishes before rollback re-initializes it.
    std::fs::remove_dir_all(c.region_a.filesystem().region_dir()).expect("remove");

    let err = txn
        .rollback(use_host(&c.host), use_host(&c.host))
        .expect_err("reinit fails");
    assert!(matches!(err, SpanError::Io(_)));
}

#[test]
fn catalog_failure_after_point_of_no_return_demands_host_abort() {
    let c = cluster(ServerConfig::default());
    let mut txn = MergeTransaction::new(Arc::clone(&c.region_a), Arc::clone(&c.region_b), false);
    assert!(txn.prepare(use_host(&c.host)));
    let merged_desc = txn.merged_descriptor().cloned().expect("prepared");

    c.host.catalog_handle().inject_merge_failure(true);
    let err = txn
        .execute(use_host(&c.host), use_host(&c.host))
        .expect_err("catalog down");
    assert!(matches!(err, SpanError::Catalog { .. }));
    assert_eq!(txn.journal(), FULL_JOURNAL.as_slice());

    // Past the point of no return nothing is undone: rollback refuses.
    assert!(!txn
        .rollback(use_host(&c.host), use_host(&c.host))
        .expect("rollback decision"));

    // The merged region directory and the claim survive for the controller
    // to roll forward after the host aborts.
    let merged_dir = c
        .root
        .join(merged_desc.table().as_str())
        .join(merged_desc.encoded_name());
    assert!(merged_dir.exists());
    let path = region_transition_path(
        &c.host.config().coordination_root,
        &merged_desc.encoded_name(),
    );
    assert!(c
        .host
        .coordination_handle()
        .exists(&path)
        .expect("exists"));
}

#[test]
fn testing_mode_runs_without_cluster_side_effects() {
    let c = cluster(ServerConfig::testing());
    let mut txn = MergeTransaction::new(Arc::clone(&c.region_a), Arc::clone(&c.region_b), false);
    assert!(txn.prepare(use_host(&c.host)));
    let merged_desc = txn.merged_descriptor().cloned().expect("prepared");

    // No controller thread: the handshake is skipped entirely.
    let merged_region = txn
        .execute(use_host(&c.host), use_host(&c.host))
        .expect("execute");

    assert_eq!(txn.journal(), FULL_JOURNAL.as_slice());
    assert!(merged_region.is_mergeable());
    assert!(c.host.coordination_handle().is_empty());
    assert!(c
        .host
        .catalog_handle()
        .get_region(&merged_desc.region_name())
        .expect("read")
        .is_none());

    // Offlining is skipped in testing mode, so the parents stay in the
    // registry alongside the merged region.
    assert_eq!(c.host.online_regions().len(), 3);
}

#[test]
fn stopped_host_refuses_to_start_a_merge() {
    let c = cluster(ServerConfig::default());
    let mut txn = MergeTransaction::new(Arc::clone(&c.region_a), Arc::clone(&c.region_b), false);
    assert!(txn.prepare(use_host(&c.host)));

    c.host.stop("shutting down");
    let err = txn
        .execute(use_host(&c.host), use_host(&c.host))
        .expect_err("stopped");
    assert!(matches!(err, SpanError::ServerStopped));
    assert!(txn.journal().is_empty());

    assert!(txn
        .rollback(use_host(&c.host), use_host(&c.host))
        .expect("rollback"));
    assert_eq!(c.host.online_regions().len(), 2);
}
