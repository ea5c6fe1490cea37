//! Region server host: configuration, the two narrow capability sets the
//! merge transaction consumes ([`HostLifecycle`], [`RegionRegistry`]), the
//! live region lifecycle, the online-region registry, and a standalone
//! [`LocalHost`] wiring the in-memory backends together.

pub mod config;
pub mod host;
pub mod localhost;
pub mod region;
pub mod registry;

pub use config::ServerConfig;
pub use host::{HostLifecycle, RegionRegistry};
pub use localhost::LocalHost;
pub use region::{HostedRegion, Progressable};
pub use registry::OnlineRegions;
