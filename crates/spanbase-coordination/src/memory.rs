//! In-memory coordination tree.
//!
//! A mutex-guarded node map implementing [`CoordinationClient`] with the
//! same version discipline as the real service. Ephemeral nodes record the
//! flag but session expiry is not simulated; the merge protocol relies only
//! on create-exclusion and versioned CAS.

use std::collections::HashMap;

use parking_lot::Mutex;
use spanbase_error::{Result, SpanError};
use tracing::trace;

use crate::CoordinationClient;

#[derive(Debug, Clone)]
struct Node {
    data: Vec<u8>,
    version: i32,
    ephemeral: bool,
}

/// In-memory [`CoordinationClient`] used by tests and the standalone host.
#[derive(Debug, Default)]
pub struct InMemoryCoordination {
    nodes: Mutex<HashMap<String, Node>>,
}

impl InMemoryCoordination {
    /// Create an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes currently in the tree.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    /// Whether the tree is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.lock().is_empty()
    }

    /// Whether the node at `path` was created ephemeral.
    #[must_use]
    pub fn is_ephemeral(&self, path: &str) -> bool {
        self.nodes.lock().get(path).is_some_and(|n| n.ephemeral)
    }

    fn insert_node(&self, path: &str, data: &[u8], ephemeral: bool) -> Result<()> {
        let mut nodes = self.nodes.lock();
        if nodes.contains_key(path) {
            return Err(SpanError::NodeExists {
                path: path.to_owned(),
            });
        }
        nodes.insert(
            path.to_owned(),
            Node {
                data: data.to_vec(),
                version: 0,
                ephemeral,
            },
        );
        trace!(path, ephemeral, "created node");
        Ok(())
    }
}

impl CoordinationClient for InMemoryCoordination {
    fn create(&self, path: &str, data: &[u8]) -> Result<()> {
        self.insert_node(path, data, false)
    }

    fn create_ephemeral(&self, path: &str, data: &[u8]) -> Result<()> {
        self.insert_node(path, data, true)
    }

    fn get_data(&self, path: &str) -> Result<(Vec<u8>, i32)> {
        let nodes = self.nodes.lock();
        let node = nodes.get(path).ok_or_else(|| SpanError::NoNode {
            path: path.to_owned(),
        })?;
        Ok((node.data.clone(), node.version))
    }

    fn compare_and_set(&self, path: &str, expected_version: i32, data: &[u8]) -> Result<i32> {
        let mut nodes = self.nodes.lock();
        let node = nodes.get_mut(path).ok_or_else(|| SpanError::NoNode {
            path: path.to_owned(),
        })?;
        if expected_version != -1 && node.version != expected_version {
            return Err(SpanError::BadVersion {
                path: path.to_owned(),
                expected: expected_version,
                actual: node.version,
            });
        }
        node.data = data.to_vec();
        node.version += 1;
        trace!(path, version = node.version, "node updated");
        Ok(node.version)
    }

    fn delete(&self, path: &str, expected_version: i32) -> Result<()> {
        let mut nodes = self.nodes.lock();
        let version = nodes
            .get(path)
            .map(|n| n.version)
            .ok_or_else(|| SpanError::NoNode {
                path: path.to_owned(),
            })?;
        if expected_version != -1 && version != expected_version {
            return Err(SpanError::BadVersion {
                path: path.to_owned(),
                expected: expected_version,
                actual: version,
            });
        }
        nodes.remove(path);
        trace!(path, "node deleted");
        Ok(())
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.nodes.lock().contains_key(path))
    }
}
