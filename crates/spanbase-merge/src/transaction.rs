//! The merge transaction: staged executor, journal, and rollback.
//!
//! # Protocol
//!
//! 1. Claim the merge in the coordination service (ephemeral MERGING node,
//!    then a MERGING to MERGING CAS to pick up a version).
//! 2. Create the merge staging directory under region A.
//! 3. Close and offline A, then B. A close beaten by a concurrent actor
//!    aborts the transaction without journaling that close as ours.
//! 4. Materialize reference files for every store file of both regions.
//! 5. Assemble the merged region and move it to its final location.
//! 6. Point of no return.
//! 7. Atomic catalog update: parents marked merged-into, merged row added.
//! 8. Open the merged region and run the post-open deploy hook.
//! 9. Announce MERGE to the controller and tickle the node until the
//!    controller deletes it.
//!
//! # Failure handling
//!
//! Each stage appends its journal entry only after the recorded effect.
//! On failure the caller runs [`MergeTransaction::rollback`], which undoes
//! journaled stages in reverse. Once `PointOfNoReturn` is journaled,
//! rollback refuses (returns `Ok(false)`) and the caller must abort the
//! host; the controller rolls the merge forward from the MERGE node and
//! the catalog row. The staging directory is deliberately left in place
//! after a successful merge; the catalog janitor reaps it with region A.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use spanbase_coordination::merge_znode::{
    create_node_merging, delete_merging_node, tickle_node_merge, transition_node_merge,
    transition_node_merging, LOST_OWNERSHIP,
};
use spanbase_error::{Result, SpanError};
use spanbase_server::{HostLifecycle, HostedRegion, RegionRegistry};
use spanbase_types::RegionDescriptor;
use tracing::{debug, error, info, warn};

use crate::descriptor::merged_region_descriptor;
use crate::progress::LoggingProgress;

/// Sleep between coordination-node tickles while waiting on the controller.
const TICKLE_INTERVAL: Duration = Duration::from_millis(100);

/// Emit a waiting log line every this many tickle spins.
const SPINS_PER_DEBUG_LINE: u32 = 10;

/// Steps of the merge transaction, in forward order. Appended to the
/// journal as each completes; rollback reads the journal in reverse to
/// figure out how much to undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalEntry {
    /// The merge is claimed in the coordination service (MERGING node up).
    SetMergingInCoordination,
    /// The merge staging directory exists.
    CreatedMergeDir,
    /// Region A closed by this transaction.
    ClosedRegionA,
    /// Region A taken out of the online-region registry.
    OfflinedRegionA,
    /// Region B closed by this transaction.
    ClosedRegionB,
    /// Region B taken out of the online-region registry.
    OfflinedRegionB,
    /// Creation of the merged region directory has started. Journaled
    /// before the effect, so cleanup can find a half-created directory.
    StartedMergedRegionCreation,
    /// Point of no return: past this, failures cannot be undone locally
    /// and the host must be aborted.
    PointOfNoReturn,
}

/// Which of the pair a stage is operating on.
#[derive(Debug, Clone, Copy)]
enum Half {
    A,
    B,
}

/// Executes a region merge as a transaction.
///
/// Construct with the two regions and a `forcible` flag, call
/// [`prepare`](Self::prepare), then [`execute`](Self::execute); if execute
/// fails, call [`rollback`](Self::rollback). Not reentrant and not thread
/// safe: the caller serializes merges touching a given region.
pub struct MergeTransaction {
    // region_a sorts before region_b.
    region_a: Arc<HostedRegion>,
    region_b: Arc<HostedRegion>,
    // Only adjacent regions merge unless forcible.
    forcible: bool,
    merged: Option<RegionDescriptor>,
    journal: Vec<JournalEntry>,
    znode_version: i32,
}

impl MergeTransaction {
    /// Create a transaction over two regions.
    ///
    /// The pair is normalized so that region A sorts before region B in
    /// descriptor order; everything downstream (the staging directory
    /// lives under A) relies on this.
    #[must_use]
    pub fn new(a: Arc<HostedRegion>, b: Arc<HostedRegion>, forcible: bool) -> Self {
        let (region_a, region_b) = if a.descriptor() <= b.descriptor() {
            (a, b)
        } else {
            (b, a)
        };
        Self {
            region_a,
            region_b,
            forcible,
            merged: None,
            journal: Vec::new(),
            znode_version: -1,
        }
    }

    /// The first region of the normalized pair.
    #[must_use]
    pub fn region_a(&self) -> &Arc<HostedRegion> {
        &self.region_a
    }

    /// The second region of the normalized pair.
    #[must_use]
    pub fn region_b(&self) -> &Arc<HostedRegion> {
        &self.region_b
    }

    /// Descriptor of the merged region; `None` until `prepare` succeeds.
    #[must_use]
    pub fn merged_descriptor(&self) -> Option<&RegionDescriptor> {
        self.merged.as_ref()
    }

    /// The journal of completed stages.
    #[must_use]
    pub fn journal(&self) -> &[JournalEntry] {
        &self.journal
    }

    /// The merge staging directory (under region A).
    #[must_use]
    pub fn merges_dir(&self) -> PathBuf {
        self.region_a.filesystem().merges_dir()
    }

    /// Validate the merge inputs.
    ///
    /// Returns `true` iff the regions belong to the same table, are
    /// distinct, are adjacent (unless forcible), both report mergeable,
    /// and neither still carries a merge qualifier in the catalog. A
    /// catalog read failure is reported as `false` with a warning, never
    /// an error. On success the merged descriptor is computed and stored.
    /// No side effects on the coordination service or the filesystem.
    pub fn prepare(&mut self, host: &dyn HostLifecycle) -> bool {
        let a = self.region_a.descriptor().clone();
        let b = self.region_b.descriptor().clone();

        if a.table() != b.table() {
            info!(%a, %b, "cannot merge regions of different tables");
            return false;
        }
        if a == b {
            info!(%a, "cannot merge a region with itself");
            return false;
        }
        if !self.forcible && !RegionDescriptor::are_adjacent(&a, &b) {
            info!(%a, %b, "skipping merge, regions are not adjacent");
            return false;
        }
        if !self.region_a.is_mergeable() || !self.region_b.is_mergeable() {
            debug!(%a, %b, "at least one region is not mergeable");
            return false;
        }
        if !host.config().testing_no_cluster {
            for region in [&a, &b] {
                match Self::has_merge_qualifier(host, region) {
                    Ok(false) => {}
                    Ok(true) => {
                        debug!(
                            %region,
                            "region not mergeable, it still carries a merge qualifier in the catalog"
                        );
                        return false;
                    }
                    Err(e) => {
                        warn!(%a, %b, error = %e, "failed judging whether the merge is available");
                        return false;
                    }
                }
            }
        }

        self.merged = Some(merged_region_descriptor(&a, &b));
        true
    }

    /// Run the transaction. On error the journal records how far it got;
    /// call [`rollback`](Self::rollback).
    pub fn execute(
        &mut self,
        host: &dyn HostLifecycle,
        services: &dyn RegionRegistry,
    ) -> Result<Arc<HostedRegion>> {
        let merged_region = self.create_merged_region(host, services)?;
        self.open_merged_region(host, services, &merged_region)?;
        self.transition_coordination_node(host, services)?;
        Ok(merged_region)
    }

    /// Undo journaled stages in reverse.
    ///
    /// Returns `Ok(true)` when the pre-merge state is restored, `Ok(false)`
    /// when the journal reached the point of no return (the host must be
    /// aborted), and an error when an undo step itself failed (likewise
    /// abort). Safe to call again on the same unfinished transaction: each
    /// undo action is idempotent.
    pub fn rollback(
        &mut self,
        host: &dyn HostLifecycle,
        services: &dyn RegionRegistry,
    ) -> Result<bool> {
        let merged = self
            .merged
            .clone()
            .ok_or_else(|| SpanError::internal("rollback without a prepared transaction"))?;
        let testing = host.config().testing_no_cluster;

        for entry in self.journal.iter().rev() {
            debug!(?entry, "rolling back merge stage");
            match entry {
                JournalEntry::SetMergingInCoordination => {
                    if !testing {
                        delete_merging_node(
                            host.coordination(),
                            &host.config().coordination_root,
                            &merged,
                        )?;
                    }
                }
                JournalEntry::CreatedMergeDir => {
                    self.region_a.enable_writes();
                    self.region_b.enable_writes();
                    self.region_a.filesystem().cleanup_merges_dir()?;
                }
                JournalEntry::ClosedRegionA => {
                    if let Err(e) = self.region_a.initialize() {
                        error!(
                            region = %self.region_a.descriptor(),
                            error = %e,
                            "failed rolling back close of region A"
                        );
                        return Err(e);
                    }
                }
                JournalEntry::OfflinedRegionA => {
                    services.add_online(Arc::clone(&self.region_a));
                }
                JournalEntry::ClosedRegionB => {
                    if let Err(e) = self.region_b.initialize() {
                        error!(
                            region = %self.region_b.descriptor(),
                            error = %e,
                            "failed rolling back close of region B"
                        );
                        return Err(e);
                    }
                }
                JournalEntry::OfflinedRegionB => {
                    services.add_online(Arc::clone(&self.region_b));
                }
                JournalEntry::StartedMergedRegionCreation => {
                    self.region_a.filesystem().cleanup_merged_region(&merged)?;
                }
                JournalEntry::PointOfNoReturn => {
                    // Do not undo anything earlier; the controller owns the
                    // merge from here.
                    error!(
                        region = %merged,
                        "merge rollback reached the point of no return, host must abort"
                    );
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    // -- execute stages ----------------------------------------------------

    fn create_merged_region(
        &mut self,
        host: &dyn HostLifecycle,
        services: &dyn RegionRegistry,
    ) -> Result<Arc<HostedRegion>> {
        info!(
            a = %self.region_a.descriptor(),
            b = %self.region_b.descriptor(),
            forcible = self.forcible,
            "starting region merge"
        );
        if host.is_stopped() || services.is_stopping() {
            return Err(SpanError::ServerStopped);
        }
        let merged = self
            .merged
            .clone()
            .ok_or_else(|| SpanError::internal("execute without a prepared transaction"))?;
        let testing = host.config().testing_no_cluster;
        let root = host.config().coordination_root.clone();

        if !testing {
            create_node_merging(host.coordination(), &root, &merged, host.server_name())?;
        }
        self.journal.push(JournalEntry::SetMergingInCoordination);
        if !testing {
            // Self-transition to pick up the version rollback needs for a
            // safe delete; also raises the controller's change callback.
            self.znode_version = transition_node_merging(
                host.coordination(),
                &root,
                &merged,
                host.server_name(),
                -1,
            )?;
        }

        self.region_a.filesystem().create_merges_dir()?;
        self.journal.push(JournalEntry::CreatedMergeDir);

        let files_a = self.close_and_offline(services, Half::A, testing)?;
        let files_b = self.close_and_offline(services, Half::B, testing)?;

        // Reference files land under the staging dir; nothing to journal,
        // the CreatedMergeDir cleanup covers them.
        self.merge_store_files(&merged, &files_a, &files_b)?;

        self.journal.push(JournalEntry::StartedMergedRegionCreation);
        self.region_a.filesystem().commit_merged_region(&merged)?;
        let merged_region =
            HostedRegion::assemble(self.region_a.filesystem().root(), merged.clone());

        self.journal.push(JournalEntry::PointOfNoReturn);

        // The catalog update decides the merge's fate after a crash: row
        // present means the controller rolls forward, absent means it rolls
        // back.
        if !testing {
            host.catalog().merge_regions(
                &merged,
                self.region_a.descriptor(),
                self.region_b.descriptor(),
                host.server_name(),
            )?;
        }
        Ok(merged_region)
    }

    fn close_and_offline(
        &mut self,
        services: &dyn RegionRegistry,
        half: Half,
        testing: bool,
    ) -> Result<BTreeMap<String, Vec<PathBuf>>> {
        let (region, closed_entry, offlined_entry) = match half {
            Half::A => (
                Arc::clone(&self.region_a),
                JournalEntry::ClosedRegionA,
                JournalEntry::OfflinedRegionA,
            ),
            Half::B => (
                Arc::clone(&self.region_b),
                JournalEntry::ClosedRegionB,
                JournalEntry::OfflinedRegionB,
            ),
        };

        let files = match region.close(false) {
            Ok(Some(files)) => {
                self.journal.push(closed_entry);
                files
            }
            Ok(None) => {
                // A concurrent actor closed the region; the merge must be
                // abandoned, and this close is not ours to undo.
                return Err(SpanError::RegionAlreadyClosed {
                    region: region.descriptor().region_name_as_string(),
                });
            }
            Err(e) => {
                // A failed close may have gotten partway; journal it so
                // rollback re-initializes the region.
                self.journal.push(closed_entry);
                return Err(e);
            }
        };

        if !testing {
            services.remove_from_online(&region.encoded_name());
        }
        self.journal.push(offlined_entry);
        Ok(files)
    }

    fn merge_store_files(
        &self,
        merged: &RegionDescriptor,
        files_a: &BTreeMap<String, Vec<PathBuf>>,
        files_b: &BTreeMap<String, Vec<PathBuf>>,
    ) -> Result<()> {
        let merges_dir = self.merges_dir();
        for (region, files) in [(&self.region_a, files_a), (&self.region_b, files_b)] {
            for (family, store_files) in files {
                for store_file in store_files {
                    region
                        .filesystem()
                        .merge_store_file(merged, family, store_file, &merges_dir)?;
                }
            }
        }
        Ok(())
    }

    fn open_merged_region(
        &self,
        host: &dyn HostLifecycle,
        services: &dyn RegionRegistry,
        merged_region: &Arc<HostedRegion>,
    ) -> Result<()> {
        let stopped = host.is_stopped();
        let stopping = services.is_stopping();
        if stopped || stopping {
            info!(
                region = %merged_region.descriptor(),
                stopped,
                stopping,
                "not opening merged region, host is shutting down"
            );
            return Ok(());
        }

        let reporter = LoggingProgress::new(
            merged_region.descriptor(),
            host.config().merge_open_log_interval_ms,
        );
        merged_region.open(Some(&reporter))?;

        if !host.config().testing_no_cluster {
            services.post_open_deploy(merged_region)?;
        }
        services.add_online(Arc::clone(merged_region));
        Ok(())
    }

    fn transition_coordination_node(
        &mut self,
        host: &dyn HostLifecycle,
        services: &dyn RegionRegistry,
    ) -> Result<()> {
        if host.config().testing_no_cluster {
            return Ok(());
        }
        let merged = self
            .merged
            .clone()
            .ok_or_else(|| SpanError::internal("execute without a prepared transaction"))?;
        let root = host.config().coordination_root.clone();
        let a = self.region_a.descriptor().clone();
        let b = self.region_b.descriptor().clone();

        self.znode_version = transition_node_merge(
            host.coordination(),
            &root,
            &merged,
            &a,
            &b,
            host.server_name(),
            self.znode_version,
        )?;

        // Wait for the controller to process the merge; it is done when it
        // deletes the node. The tickling guards against the controller
        // missing a change event.
        let started = Instant::now();
        let mut spins: u32 = 0;
        loop {
            if spins % SPINS_PER_DEBUG_LINE == 0 {
                debug!(
                    region = %merged.encoded_name(),
                    waited_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "still waiting on the controller to process the merge"
                );
            }
            thread::sleep(TICKLE_INTERVAL);
            self.znode_version = tickle_node_merge(
                host.coordination(),
                &root,
                &merged,
                &a,
                &b,
                host.server_name(),
                self.znode_version,
            )?;
            spins += 1;
            if self.znode_version == LOST_OWNERSHIP
                || host.is_stopped()
                || services.is_stopping()
            {
                return Ok(());
            }
        }
    }

    fn has_merge_qualifier(host: &dyn HostLifecycle, region: &RegionDescriptor) -> Result<bool> {
        let parents = host
            .catalog()
            .regions_from_merge_qualifier(&region.region_name())?;
        Ok(parents.is_some_and(|(a, b)| a.is_some() || b.is_some()))
    }
}
