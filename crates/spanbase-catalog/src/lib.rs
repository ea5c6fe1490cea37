//! Catalog seam: the authoritative table mapping each region to its owning
//! server and its merge lineage.
//!
//! The one structural guarantee the merge transaction needs from the
//! catalog is atomicity of [`Catalog::merge_regions`]: either all three
//! rows reflect the new topology (the pair carries "merged into" pointers
//! and the merged row exists with its lineage qualifiers) or none do.
//! [`MemoryCatalog`] realizes that with a single lock; a remote catalog
//! realizes it with a multi-row atomic batch.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use spanbase_error::{Result, SpanError};
use spanbase_types::{RegionDescriptor, ServerName};
use tracing::{debug, info};

/// One catalog row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRow {
    /// The region this row describes.
    pub descriptor: RegionDescriptor,
    /// Current owning server, if assigned.
    pub server: Option<ServerName>,
    /// Lineage: first parent, set on the product of a merge until the
    /// janitor reaps the parents.
    pub merge_a: Option<RegionDescriptor>,
    /// Lineage: second parent.
    pub merge_b: Option<RegionDescriptor>,
    /// Set on a parent region once it has been merged away.
    pub merged_into: Option<RegionDescriptor>,
}

impl CatalogRow {
    fn new(descriptor: RegionDescriptor, server: Option<ServerName>) -> Self {
        Self {
            descriptor,
            server,
            merge_a: None,
            merge_b: None,
            merged_into: None,
        }
    }

    /// Whether this region is the unreaped product of a merge.
    #[must_use]
    pub const fn has_merge_qualifier(&self) -> bool {
        self.merge_a.is_some() || self.merge_b.is_some()
    }
}

/// Catalog access used by the region server.
pub trait Catalog: Send + Sync {
    /// Insert or replace a region row.
    fn put_region(&self, desc: &RegionDescriptor, server: Option<&ServerName>) -> Result<()>;

    /// Read a region row by its binary region name.
    fn get_region(&self, region_name: &[u8]) -> Result<Option<CatalogRow>>;

    /// Atomically record a merge: mark `a` and `b` merged into `merged`,
    /// insert the merged row with its lineage qualifiers, and stamp the
    /// originating server. Partial updates must not be observable.
    fn merge_regions(
        &self,
        merged: &RegionDescriptor,
        a: &RegionDescriptor,
        b: &RegionDescriptor,
        origin: &ServerName,
    ) -> Result<()>;

    /// If the named region is the product of a merge, return its recorded
    /// parents. `None` means no merge qualifier (or no such row).
    #[allow(clippy::type_complexity)]
    fn regions_from_merge_qualifier(
        &self,
        region_name: &[u8],
    ) -> Result<Option<(Option<RegionDescriptor>, Option<RegionDescriptor>)>>;
}

/// In-memory [`Catalog`] used by tests and the standalone host.
///
/// One `RwLock` over the row map makes the merge update a single critical
/// section. Fault injection flags let tests exercise the transaction's
/// failure paths without a remote catalog.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    rows: RwLock<BTreeMap<Vec<u8>, CatalogRow>>,
    fail_merges: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Whether the catalog has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Fault injection: make the next `merge_regions` calls fail.
    pub fn inject_merge_failure(&self, fail: bool) {
        self.fail_merges.store(fail, Ordering::SeqCst);
    }

    /// Fault injection: make qualifier reads fail.
    pub fn inject_read_failure(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
}

impl Catalog for MemoryCatalog {
    fn put_region(&self, desc: &RegionDescriptor, server: Option<&ServerName>) -> Result<()> {
        let mut rows = self.rows.write();
        rows.insert(
            desc.region_name(),
            CatalogRow::new(desc.clone(), server.cloned()),
        );
        debug!(region = %desc, "catalog row written");
        Ok(())
    }

    fn get_region(&self, region_name: &[u8]) -> Result<Option<CatalogRow>> {
        Ok(self.rows.read().get(region_name).cloned())
    }

    fn merge_regions(
        &self,
        merged: &RegionDescriptor,
        a: &RegionDescriptor,
        b: &RegionDescriptor,
        origin: &ServerName,
    ) -> Result<()> {
        if self.fail_merges.load(Ordering::SeqCst) {
            return Err(SpanError::catalog("injected merge_regions failure"));
        }
        let mut rows = self.rows.write();
        for parent in [a, b] {
            rows.entry(parent.region_name())
                .or_insert_with(|| CatalogRow::new(parent.clone(), None))
                .merged_into = Some(merged.clone());
        }
        let mut row = CatalogRow::new(merged.clone(), Some(origin.clone()));
        row.merge_a = Some(a.clone());
        row.merge_b = Some(b.clone());
        rows.insert(merged.region_name(), row);
        info!(%merged, %a, %b, %origin, "catalog updated for merge");
        Ok(())
    }

    fn regions_from_merge_qualifier(
        &self,
        region_name: &[u8],
    ) -> Result<Option<(Option<RegionDescriptor>, Option<RegionDescriptor>)>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(SpanError::catalog("injected qualifier read failure"));
        }
        let rows = self.rows.read();
        let Some(row) = rows.get(region_name) else {
            return Ok(None);
        };
        if row.has_merge_qualifier() {
            Ok(Some((row.merge_a.clone(), row.merge_b.clone())))
        } else {
            Ok(None)
        }
    }
}
