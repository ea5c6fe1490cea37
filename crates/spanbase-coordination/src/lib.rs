//! Coordination-service seam: a small client trait over a hierarchical node
//! tree with ephemeral nodes and versioned compare-and-swap updates, plus
//! the merge-node protocol built on top of it.
//!
//! The trait abstracts the strongly-consistent coordination service so the
//! transaction core can run against an in-memory tree in tests and a real
//! ensemble in production.

pub mod memory;
pub mod merge_znode;

use spanbase_error::Result;

pub use memory::InMemoryCoordination;

/// Client for the coordination service.
///
/// All mutations are versioned: `compare_and_set` and `delete` succeed only
/// if the caller-supplied version matches the node's current version
/// (`-1` means "any version"). Implementations must be safe to share across
/// threads.
pub trait CoordinationClient: Send + Sync {
    /// Create a persistent node carrying `data`.
    ///
    /// Fails with `NodeExists` if the path is occupied.
    fn create(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Create an ephemeral node carrying `data`.
    ///
    /// The node is deleted automatically when the creating session dies.
    /// Fails with `NodeExists` if the path is occupied.
    fn create_ephemeral(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Read a node's data and current version.
    ///
    /// Fails with `NoNode` if the path is absent.
    fn get_data(&self, path: &str) -> Result<(Vec<u8>, i32)>;

    /// Replace a node's data iff its version equals `expected_version`
    /// (`-1` matches any). Returns the node's new version.
    ///
    /// Fails with `NoNode` or `BadVersion`.
    fn compare_and_set(&self, path: &str, expected_version: i32, data: &[u8]) -> Result<i32>;

    /// Delete a node iff its version equals `expected_version` (`-1`
    /// matches any).
    ///
    /// Fails with `NoNode` or `BadVersion`.
    fn delete(&self, path: &str, expected_version: i32) -> Result<()>;

    /// Whether a node exists at `path`.
    fn exists(&self, path: &str) -> Result<bool>;
}
