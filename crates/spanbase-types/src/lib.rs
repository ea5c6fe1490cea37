//! Core identifier types for Spanbase: tables, servers, and region
//! descriptors.
//!
//! A [`RegionDescriptor`] identifies one contiguous key-range partition of a
//! table. Descriptors are immutable; the encoded name and the binary region
//! name are derived deterministically from (table, start key, id).

pub mod transition;

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use transition::{RegionEventType, RegionTransition};

/// Milliseconds since the Unix epoch.
///
/// Region ids and transition timestamps are wall-clock millis; callers that
/// need determinism pass an explicit value instead.
#[must_use]
pub fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

// ---------------------------------------------------------------------------
// TableName
// ---------------------------------------------------------------------------

/// Name of a user table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableName(String);

impl TableName {
    /// Create a table name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// ServerName
// ---------------------------------------------------------------------------

/// Identity of one data-node process: host, port, and the start code that
/// distinguishes restarts of the same host:port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerName {
    host: String,
    port: u16,
    start_code: u64,
}

impl ServerName {
    /// Create a server name.
    pub fn new(host: impl Into<String>, port: u16, start_code: u64) -> Self {
        Self {
            host: host.into(),
            port,
            start_code,
        }
    }

    /// The host name.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The listening port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Process start code.
    #[must_use]
    pub const fn start_code(&self) -> u64 {
        self.start_code
    }
}

impl fmt::Display for ServerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.host, self.port, self.start_code)
    }
}

// ---------------------------------------------------------------------------
// RegionDescriptor
// ---------------------------------------------------------------------------

/// Identifies one region: a contiguous key-range partition of a table.
///
/// The start key is inclusive and the end key exclusive; an empty start key
/// means unbounded below and an empty end key unbounded above. The region id
/// is a creation timestamp in millis; together with table and start key it
/// pins the descriptor's place in the catalog sort order.
///
/// Descriptors are immutable. Derived identifiers:
/// - the *region name*, the binary catalog row key
///   (`<table>,<start-key-hex>,<id>`), and
/// - the *encoded name*, a short filesystem-safe hash of the region name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionDescriptor {
    table: TableName,
    start_key: Vec<u8>,
    end_key: Vec<u8>,
    region_id: u64,
}

impl RegionDescriptor {
    /// Create a descriptor.
    pub fn new(
        table: TableName,
        start_key: impl Into<Vec<u8>>,
        end_key: impl Into<Vec<u8>>,
        region_id: u64,
    ) -> Self {
        Self {
            table,
            start_key: start_key.into(),
            end_key: end_key.into(),
            region_id,
        }
    }

    /// The owning table.
    #[must_use]
    pub const fn table(&self) -> &TableName {
        &self.table
    }

    /// Inclusive start key; empty means unbounded below.
    #[must_use]
    pub fn start_key(&self) -> &[u8] {
        &self.start_key
    }

    /// Exclusive end key; empty means unbounded above.
    #[must_use]
    pub fn end_key(&self) -> &[u8] {
        &self.end_key
    }

    /// Region id (creation timestamp in millis).
    #[must_use]
    pub const fn region_id(&self) -> u64 {
        self.region_id
    }

    /// Whether the end key is unbounded above.
    #[must_use]
    pub fn is_end_unbounded(&self) -> bool {
        self.end_key.is_empty()
    }

    /// The binary region name used as the catalog row key.
    #[must_use]
    pub fn region_name(&self) -> Vec<u8> {
        self.region_name_as_string().into_bytes()
    }

    /// The region name as a printable string.
    #[must_use]
    pub fn region_name_as_string(&self) -> String {
        format!(
            "{},{},{}",
            self.table,
            hex_of(&self.start_key),
            self.region_id
        )
    }

    /// Short, stable, filesystem-safe identifier derived from the region
    /// name. Used for directory names and coordination node paths.
    #[must_use]
    pub fn encoded_name(&self) -> String {
        let digest = Sha256::digest(self.region_name());
        digest.iter().take(16).fold(String::new(), |mut acc, b| {
            use fmt::Write;
            let _ = write!(acc, "{b:02x}");
            acc
        })
    }

    /// Whether two regions of the same table share a boundary: the lower
    /// region's end key equals the upper region's start key.
    #[must_use]
    pub fn are_adjacent(a: &Self, b: &Self) -> bool {
        if a.table != b.table {
            return false;
        }
        let (lower, upper) = if a.start_key <= b.start_key {
            (a, b)
        } else {
            (b, a)
        };
        !lower.end_key.is_empty() && lower.end_key == upper.start_key
    }
}

impl Ord for RegionDescriptor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.table
            .cmp(&other.table)
            .then_with(|| self.start_key.cmp(&other.start_key))
            .then_with(|| self.region_id.cmp(&other.region_id))
            .then_with(|| self.end_key.cmp(&other.end_key))
    }
}

impl PartialOrd for RegionDescriptor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RegionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.region_name_as_string())
    }
}

fn hex_of(bytes: &[u8]) -> String {
    bytes.iter().fold(String::new(), |mut acc, b| {
        use fmt::Write;
        let _ = write!(acc, "{b:02x}");
        acc
    })
}
