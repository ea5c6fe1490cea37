//! Online-region registry: the set of regions this node currently serves.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::region::HostedRegion;

/// Map of online regions keyed by encoded name.
#[derive(Debug, Default)]
pub struct OnlineRegions {
    regions: RwLock<HashMap<String, Arc<HostedRegion>>>,
}

impl OnlineRegions {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a region. Re-adding an online region is a no-op replace.
    pub fn add(&self, region: Arc<HostedRegion>) {
        let encoded = region.encoded_name();
        debug!(region = %region.descriptor(), "region online");
        self.regions.write().insert(encoded, region);
    }

    /// Remove a region by encoded name.
    pub fn remove(&self, encoded_name: &str) -> Option<Arc<HostedRegion>> {
        let removed = self.regions.write().remove(encoded_name);
        if let Some(region) = &removed {
            debug!(region = %region.descriptor(), "region offline");
        }
        removed
    }

    /// Look up a region by encoded name.
    #[must_use]
    pub fn get(&self, encoded_name: &str) -> Option<Arc<HostedRegion>> {
        self.regions.read().get(encoded_name).cloned()
    }

    /// Whether a region is online.
    #[must_use]
    pub fn contains(&self, encoded_name: &str) -> bool {
        self.regions.read().contains_key(encoded_name)
    }

    /// Number of online regions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.read().len()
    }

    /// Whether no regions are online.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.read().is_empty()
    }
}
