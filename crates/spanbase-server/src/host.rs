//! The two capability sets the merge transaction consumes from its host.
//!
//! Kept narrow on purpose: the transaction holds them by reference and must
//! not be able to reach the rest of the server through them.

use std::sync::Arc;

use spanbase_catalog::Catalog;
use spanbase_coordination::CoordinationClient;
use spanbase_error::Result;
use spanbase_types::ServerName;

use crate::config::ServerConfig;
use crate::region::HostedRegion;

/// Host process lifecycle and shared clients.
pub trait HostLifecycle: Send + Sync {
    /// Whether the host has stopped.
    fn is_stopped(&self) -> bool;

    /// This server's identity.
    fn server_name(&self) -> &ServerName;

    /// Server configuration.
    fn config(&self) -> &ServerConfig;

    /// Coordination-service client.
    fn coordination(&self) -> &dyn CoordinationClient;

    /// Catalog client.
    fn catalog(&self) -> &dyn Catalog;
}

/// Region bookkeeping services of the host.
pub trait RegionRegistry: Send + Sync {
    /// Whether the host is shutting down.
    fn is_stopping(&self) -> bool;

    /// Put a region into the online set.
    fn add_online(&self, region: Arc<HostedRegion>);

    /// Take a region out of the online set.
    fn remove_from_online(&self, encoded_name: &str);

    /// Post-open deploy hook: publish a freshly opened region (catalog
    /// assignment, controller notification).
    fn post_open_deploy(&self, region: &HostedRegion) -> Result<()>;
}
