//! Standalone host: the in-memory backends wired behind the capability
//! traits.
//!
//! Serves two purposes: a single-node deployment of the region server
//! machinery, and the dependency-injected fixture tests use instead of a
//! process-wide "last constructed server" hook.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use spanbase_catalog::{Catalog, MemoryCatalog};
use spanbase_coordination::{CoordinationClient, InMemoryCoordination};
use spanbase_error::Result;
use spanbase_types::ServerName;
use tracing::info;

use crate::config::ServerConfig;
use crate::host::{HostLifecycle, RegionRegistry};
use crate::region::HostedRegion;
use crate::registry::OnlineRegions;

/// A self-contained host over in-memory coordination and catalog backends.
#[derive(Debug)]
pub struct LocalHost {
    name: ServerName,
    config: ServerConfig,
    coordination: Arc<InMemoryCoordination>,
    catalog: Arc<MemoryCatalog>,
    online: OnlineRegions,
    stopped: AtomicBool,
    stopping: AtomicBool,
}

impl LocalHost {
    /// Create a host with the given identity and configuration.
    #[must_use]
    pub fn new(name: ServerName, config: ServerConfig) -> Self {
        Self {
            name,
            config,
            coordination: Arc::new(InMemoryCoordination::new()),
            catalog: Arc::new(MemoryCatalog::new()),
            online: OnlineRegions::new(),
            stopped: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
        }
    }

    /// Shared handle to the coordination backend.
    #[must_use]
    pub fn coordination_handle(&self) -> Arc<InMemoryCoordination> {
        Arc::clone(&self.coordination)
    }

    /// Shared handle to the catalog backend.
    #[must_use]
    pub fn catalog_handle(&self) -> Arc<MemoryCatalog> {
        Arc::clone(&self.catalog)
    }

    /// The online-region registry.
    #[must_use]
    pub const fn online_regions(&self) -> &OnlineRegions {
        &self.online
    }

    /// Mark the host stopped.
    pub fn stop(&self, reason: &str) {
        info!(server = %self.name, reason, "host stopped");
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Mark the host as shutting down.
    pub fn set_stopping(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }
}

impl HostLifecycle for LocalHost {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn server_name(&self) -> &ServerName {
        &self.name
    }

    fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn coordination(&self) -> &dyn CoordinationClient {
        self.coordination.as_ref()
    }

    fn catalog(&self) -> &dyn Catalog {
        self.catalog.as_ref()
    }
}

impl RegionRegistry for LocalHost {
    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    fn add_online(&self, region: Arc<HostedRegion>) {
        self.online.add(region);
    }

    fn remove_from_online(&self, encoded_name: &str) {
        self.online.remove(encoded_name);
    }

    fn post_open_deploy(&self, region: &HostedRegion) -> Result<()> {
        self.catalog
            .put_region(region.descriptor(), Some(&self.name))
    }
}
