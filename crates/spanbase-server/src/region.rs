//! A live region mounted on this node.
//!
//! Close protocol: mark closing, disable writes, inventory store files,
//! mark closed. A region that finds itself already closed reports `None`
//! so the caller can tell "someone else closed it" apart from its own
//! close.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use spanbase_error::Result;
use spanbase_fs::RegionFileSystem;
use spanbase_types::RegionDescriptor;
use tracing::{debug, info};

/// Callback ticked while a long-running region open makes progress.
pub trait Progressable: Send + Sync {
    /// Report liveness.
    fn progress(&self);
}

#[derive(Debug, Clone, Copy)]
struct WriteState {
    closed: bool,
    closing: bool,
    writes_enabled: bool,
}

/// A live, mounted region: an immutable descriptor plus an attached
/// filesystem view and open/close lifecycle state.
#[derive(Debug)]
pub struct HostedRegion {
    fs: RegionFileSystem,
    state: Mutex<WriteState>,
}

impl HostedRegion {
    /// Create the region's directory tree and mount it open.
    pub fn create(root: &Path, desc: RegionDescriptor) -> Result<Arc<Self>> {
        let fs = RegionFileSystem::new(root, desc);
        fs.create_region_dir()?;
        Ok(Arc::new(Self {
            fs,
            state: Mutex::new(WriteState {
                closed: false,
                closing: false,
                writes_enabled: true,
            }),
        }))
    }

    /// Mount an already-assembled region directory, closed. The region is
    /// brought online with [`open`](Self::open).
    #[must_use]
    pub fn assemble(root: &Path, desc: RegionDescriptor) -> Arc<Self> {
        Arc::new(Self {
            fs: RegionFileSystem::new(root, desc),
            state: Mutex::new(WriteState {
                closed: true,
                closing: false,
                writes_enabled: false,
            }),
        })
    }

    /// The region's descriptor.
    #[must_use]
    pub const fn descriptor(&self) -> &RegionDescriptor {
        self.fs.descriptor()
    }

    /// The region's encoded name.
    #[must_use]
    pub fn encoded_name(&self) -> String {
        self.descriptor().encoded_name()
    }

    /// The region's filesystem view.
    #[must_use]
    pub const fn filesystem(&self) -> &RegionFileSystem {
        &self.fs
    }

    /// Whether this region can take part in a merge right now: open, not
    /// mid-close, and accepting writes.
    #[must_use]
    pub fn is_mergeable(&self) -> bool {
        let st = self.state.lock();
        !st.closed && !st.closing && st.writes_enabled
    }

    /// Whether the region is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Whether writes are currently enabled.
    #[must_use]
    pub fn writes_enabled(&self) -> bool {
        self.state.lock().writes_enabled
    }

    /// Re-enable writes after an abandoned operation.
    pub fn enable_writes(&self) {
        self.state.lock().writes_enabled = true;
    }

    /// Close the region and return its store files by family.
    ///
    /// Returns `Ok(None)` when another actor already closed (or is closing)
    /// this region; the caller must not treat that close as its own.
    /// `abort` skips flushing in-memory state; store files already on disk
    /// are inventoried either way.
    pub fn close(&self, abort: bool) -> Result<Option<BTreeMap<String, Vec<PathBuf>>>> {
        {
            let mut st = self.state.lock();
            if st.closed || st.closing {
                info!(region = %self.descriptor(), "close requested but region already closed");
                return Ok(None);
            }
            st.closing = true;
            st.writes_enabled = false;
        }
        let files = self.fs.store_files()?;
        let mut st = self.state.lock();
        st.closed = true;
        st.closing = false;
        debug!(region = %self.descriptor(), abort, families = files.len(), "region closed");
        Ok(Some(files))
    }

    /// Open (or reopen) the region from its directory.
    ///
    /// A no-op on an already-open region, which makes rollback of a close
    /// idempotent. Fails with an I/O error when the region directory is
    /// gone.
    pub fn open(&self, reporter: Option<&dyn Progressable>) -> Result<()> {
        {
            let st = self.state.lock();
            if !st.closed && !st.closing {
                return Ok(());
            }
        }
        let families = self.fs.store_files()?;
        if let Some(reporter) = reporter {
            for _ in &families {
                reporter.progress();
            }
            reporter.progress();
        }
        let mut st = self.state.lock();
        st.closed = false;
        st.closing = false;
        st.writes_enabled = true;
        info!(region = %self.descriptor(), families = families.len(), "region opened");
        Ok(())
    }

    /// Re-initialize a region this node closed itself.
    pub fn initialize(&self) -> Result<()> {
        self.open(None)
    }
}
