//! Region filesystem layout on the shared store.
//!
//! One region owns `<root>/<table>/<encoded-name>/` with one subdirectory
//! per column family holding store files. A merge works inside a `.merges`
//! staging directory under the *first* region of the pair; the assembled
//! merged region is renamed into its final location in one move.
//!
//! Reference files are small JSON documents pointing at a source store
//! file. They are metadata only (no data copy) and survive process crashes;
//! the catalog janitor reaps them together with the parent region.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use spanbase_error::Result;
use spanbase_types::RegionDescriptor;
use tracing::debug;

/// Name of the merge staging directory under a region directory.
pub const MERGES_DIR: &str = ".merges";

/// Filesystem view of one region.
#[derive(Debug, Clone)]
pub struct RegionFileSystem {
    root: PathBuf,
    desc: RegionDescriptor,
}

impl RegionFileSystem {
    /// Create a view rooted at the store root for the given region.
    pub fn new(root: impl Into<PathBuf>, desc: RegionDescriptor) -> Self {
        Self {
            root: root.into(),
            desc,
        }
    }

    /// The store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The region this view belongs to.
    #[must_use]
    pub const fn descriptor(&self) -> &RegionDescriptor {
        &self.desc
    }

    /// Directory holding all regions of this region's table.
    #[must_use]
    pub fn table_dir(&self) -> PathBuf {
        self.root.join(self.desc.table().as_str())
    }

    /// This region's directory.
    #[must_use]
    pub fn region_dir(&self) -> PathBuf {
        self.table_dir().join(self.desc.encoded_name())
    }

    /// The merge staging directory under this region.
    #[must_use]
    pub fn merges_dir(&self) -> PathBuf {
        self.region_dir().join(MERGES_DIR)
    }

    /// Staging directory for an assembling merged region.
    #[must_use]
    pub fn merged_region_staging_dir(&self, merged: &RegionDescriptor) -> PathBuf {
        self.merges_dir().join(merged.encoded_name())
    }

    /// Create this region's directory tree.
    pub fn create_region_dir(&self) -> Result<()> {
        fs::create_dir_all(self.region_dir())?;
        Ok(())
    }

    /// Create a fresh merge staging directory, discarding any leftovers
    /// from an earlier aborted merge.
    pub fn create_merges_dir(&self) -> Result<()> {
        let dir = self.merges_dir();
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;
        debug!(region = %self.desc, dir = %dir.display(), "created merges dir");
        Ok(())
    }

    /// Remove the merge staging directory and everything under it.
    pub fn cleanup_merges_dir(&self) -> Result<()> {
        let dir = self.merges_dir();
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
            debug!(region = %self.desc, dir = %dir.display(), "cleaned merges dir");
        }
        Ok(())
    }

    /// Remove an in-progress merged region directory at its final location.
    pub fn cleanup_merged_region(&self, merged: &RegionDescriptor) -> Result<()> {
        let dir = self.table_dir().join(merged.encoded_name());
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
            debug!(region = %merged, dir = %dir.display(), "cleaned merged region dir");
        }
        Ok(())
    }

    /// Create a reference file for `store_file` in the merged region's
    /// staging area under `merges_dir`. Metadata only; the store file
    /// itself is not touched.
    pub fn merge_store_file(
        &self,
        merged: &RegionDescriptor,
        family: &str,
        store_file: &Path,
        merges_dir: &Path,
    ) -> Result<PathBuf> {
        let family_dir = merges_dir.join(merged.encoded_name()).join(family);
        fs::create_dir_all(&family_dir)?;

        let file_name = store_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let reference_path = family_dir.join(format!("{file_name}.{}", self.desc.encoded_name()));
        let reference = StoreFileReference {
            referred_path: store_file.to_path_buf(),
            family: family.to_owned(),
            source_region: self.desc.encoded_name(),
        };
        reference.write(&reference_path)?;
        Ok(reference_path)
    }

    /// Move the assembled merged region from the staging area to its final
    /// location under the table directory.
    pub fn commit_merged_region(&self, merged: &RegionDescriptor) -> Result<PathBuf> {
        let staging = self.merged_region_staging_dir(merged);
        let final_dir = self.table_dir().join(merged.encoded_name());
        // A pair with no store files never materialized the staging dir.
        fs::create_dir_all(&staging)?;
        fs::create_dir_all(self.table_dir())?;
        fs::rename(&staging, &final_dir)?;
        debug!(region = %merged, dir = %final_dir.display(), "committed merged region dir");
        Ok(final_dir)
    }

    /// Enumerate store files by family.
    ///
    /// Dot-directories (the merge staging area included) are skipped.
    pub fn store_files(&self) -> Result<BTreeMap<String, Vec<PathBuf>>> {
        let mut families = BTreeMap::new();
        for entry in fs::read_dir(self.region_dir())? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !entry.file_type()?.is_dir() || name.starts_with('.') {
                continue;
            }
            let mut files = Vec::new();
            for file in fs::read_dir(entry.path())? {
                let file = file?;
                if file.file_type()?.is_file() {
                    files.push(file.path());
                }
            }
            files.sort();
            families.insert(name, files);
        }
        Ok(families)
    }

    /// Materialize a store file with the given content.
    ///
    /// Used by loaders and tests; flush paths produce store files the same
    /// way.
    pub fn write_store_file(&self, family: &str, name: &str, data: &[u8]) -> Result<PathBuf> {
        let family_dir = self.region_dir().join(family);
        fs::create_dir_all(&family_dir)?;
        let path = family_dir.join(name);
        fs::write(&path, data)?;
        Ok(path)
    }
}

/// A reference file: a durable metadata pointer at a parent store file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreFileReference {
    referred_path: PathBuf,
    family: String,
    source_region: String,
}

impl StoreFileReference {
    /// Path of the store file this reference points at.
    #[must_use]
    pub fn referred_path(&self) -> &Path {
        &self.referred_path
    }

    /// Column family the store file belongs to.
    #[must_use]
    pub fn family(&self) -> &str {
        &self.family
    }

    /// Encoded name of the region the store file came from.
    #[must_use]
    pub fn source_region(&self) -> &str {
        &self.source_region
    }

    /// Write the reference document.
    pub fn write(&self, path: &Path) -> Result<()> {
        let body = serde_json::to_vec(self)
            .map_err(|e| spanbase_error::SpanError::corrupt(e.to_string()))?;
        fs::write(path, body)?;
        Ok(())
    }

    /// Read a reference document.
    pub fn read(path: &Path) -> Result<Self> {
        let body = fs::read(path)?;
        serde_json::from_slice(&body)
            .map_err(|e| spanbase_error::SpanError::corrupt(format!("{}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use spanbase_types::TableName;

    use super::*;

    fn desc(start: &[u8], end: &[u8], id: u64) -> RegionDescriptor {
        RegionDescriptor::new(TableName::new("t"), start, end, id)
    }

    #[test]
    fn store_file_enumeration_skips_staging_dir() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let fs_a = RegionFileSystem::new(tmp.path(), desc(b"a", b"m", 10));
        fs_a.create_region_dir().expect("region dir");
        fs_a.write_store_file("cf1", "sf-1", b"one").expect("sf-1");
        fs_a.write_store_file("cf1", "sf-2", b"two").expect("sf-2");
        fs_a.write_store_file("cf2", "sf-3", b"three").expect("sf-3");
        fs_a.create_merges_dir().expect("merges dir");

        let files = fs_a.store_files().expect("enumerate");
        assert_eq!(files.len(), 2);
        assert_eq!(files["cf1"].len(), 2);
        assert_eq!(files["cf2"].len(), 1);
    }

    #[test]
    fn create_merges_dir_is_fresh() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let fs_a = RegionFileSystem::new(tmp.path(), desc(b"a", b"m", 10));
        fs_a.create_region_dir().expect("region dir");

        fs_a.create_merges_dir().expect("first create");
        let leftover = fs_a.merges_dir().join("stale");
        fs::create_dir_all(&leftover).expect("leftover");

        fs_a.create_merges_dir().expect("recreate");
        assert!(fs_a.merges_dir().exists());
        assert!(!leftover.exists(), "leftovers are discarded");

        fs_a.cleanup_merges_dir().expect("cleanup");
        assert!(!fs_a.merges_dir().exists());
        fs_a.cleanup_merges_dir().expect("cleanup is idempotent");
    }

    #[test]
    fn reference_file_roundtrip() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let a = desc(b"a", b"m", 10);
        let merged = desc(b"a", b"z", 30);
        let fs_a = RegionFileSystem::new(tmp.path(), a.clone());
        fs_a.create_region_dir().expect("region dir");
        let sf = fs_a.write_store_file("cf1", "sf-1", b"data").expect("sf");
        fs_a.create_merges_dir().expect("merges dir");

        let ref_path = fs_a
            .merge_store_file(&merged, "cf1", &sf, &fs_a.merges_dir())
            .expect("reference");
        assert!(ref_path.starts_with(fs_a.merged_region_staging_dir(&merged)));

        let reference = StoreFileReference::read(&ref_path).expect("read back");
        assert_eq!(reference.referred_path(), sf.as_path());
        assert_eq!(reference.family(), "cf1");
        assert_eq!(reference.source_region(), a.encoded_name());
    }

    #[test]
    fn commit_moves_staging_to_final_location() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let a = desc(b"a", b"m", 10);
        let merged = desc(b"a", b"z", 30);
        let fs_a = RegionFileSystem::new(tmp.path(), a);
        fs_a.create_region_dir().expect("region dir");
        let sf = fs_a.write_store_file("cf1", "sf-1", b"data").expect("sf");
        fs_a.create_merges_dir().expect("merges dir");
        fs_a.merge_store_file(&merged, "cf1", &sf, &fs_a.merges_dir())
            .expect("reference");

        let final_dir = fs_a.commit_merged_region(&merged).expect("commit");
        assert_eq!(final_dir, fs_a.table_dir().join(merged.encoded_name()));
        assert!(final_dir.join("cf1").exists());
        assert!(!fs_a.merged_region_staging_dir(&merged).exists());

        fs_a.cleanup_merged_region(&merged).expect("cleanup");
        assert!(!final_dir.exists());
        fs_a.cleanup_merged_region(&merged).expect("idempotent");
    }
}
