//! Replication peer bookkeeping.
//!
//! A [`ReplicationPeer`] wraps everything needed to identify a remote peer
//! cluster: its cluster key, its id, the list of its region servers, and an
//! enabled/disabled flag backed by a coordination node. The peer owns a
//! [`PeerStateTracker`] observing that node; the tracker holds only the
//! shared flag and a client handle, never a reference back to the peer, so
//! there is no ownership cycle. Watch dispatch hands node-change events to
//! the tracker through the [`NodeObserver`] capability.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use spanbase_coordination::CoordinationClient;
use spanbase_error::{Result, SpanError};
use spanbase_types::ServerName;
use tracing::{debug, warn};

/// Magic bytes identifying a serialized peer state.
pub const PEER_STATE_MAGIC: [u8; 4] = *b"SBPS";

/// Enabled/disabled state of a replication peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Replication to this peer is active.
    Enabled,
    /// Replication to this peer is paused.
    Disabled,
}

impl PeerState {
    /// Serialize for storage in the peer-state node.
    #[must_use]
    pub fn to_bytes(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(5);
        buf.extend_from_slice(&PEER_STATE_MAGIC);
        buf.push(match self {
            Self::Enabled => 1,
            Self::Disabled => 0,
        });
        buf
    }

    /// Deserialize a peer state.
    ///
    /// Returns `None` on bad magic, truncation, or an unknown flag byte.
    #[must_use]
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() != 5 || data[..4] != PEER_STATE_MAGIC {
            return None;
        }
        match data[4] {
            1 => Some(Self::Enabled),
            0 => Some(Self::Disabled),
            _ => None,
        }
    }
}

/// Capability handed to watch dispatch: something that wants to hear about
/// node data changes.
pub trait NodeObserver: Send + Sync {
    /// The data of the node at `path` changed.
    fn node_data_changed(&self, path: &str);
}

/// Observes the peer-state node and mirrors it into a shared flag.
pub struct PeerStateTracker {
    path: String,
    client: Arc<dyn CoordinationClient>,
    enabled: Arc<AtomicBool>,
}

impl PeerStateTracker {
    fn new(path: String, client: Arc<dyn CoordinationClient>, enabled: Arc<AtomicBool>) -> Self {
        Self {
            path,
            client,
            enabled,
        }
    }

    /// The node this tracker observes.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    fn refresh(&self) -> Result<()> {
        let (data, _version) = self.client.get_data(&self.path)?;
        let state = PeerState::from_bytes(&data)
            .ok_or_else(|| SpanError::corrupt(format!("peer state at {}", self.path)))?;
        self.enabled
            .store(state == PeerState::Enabled, Ordering::SeqCst);
        debug!(path = %self.path, ?state, "peer state refreshed");
        Ok(())
    }
}

impl NodeObserver for PeerStateTracker {
    fn node_data_changed(&self, path: &str) {
        if path != self.path {
            return;
        }
        if let Err(e) = self.refresh() {
            warn!(path, error = %e, "failed refreshing peer state");
        }
    }
}

/// A remote peer cluster replication targets.
pub struct ReplicationPeer {
    cluster_key: String,
    id: String,
    enabled: Arc<AtomicBool>,
    region_servers: RwLock<Arc<[ServerName]>>,
    tracker: Option<PeerStateTracker>,
}

impl ReplicationPeer {
    /// Create a peer with no state tracker running yet.
    #[must_use]
    pub fn new(cluster_key: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            cluster_key: cluster_key.into(),
            id: id.into(),
            enabled: Arc::new(AtomicBool::new(false)),
            region_servers: RwLock::new(Arc::from(Vec::new())),
            tracker: None,
        }
    }

    /// Cluster key locating the peer (ensemble addresses plus root path).
    #[must_use]
    pub fn cluster_key(&self) -> &str {
        &self.cluster_key
    }

    /// Short identifier of this peer.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether replication to this peer is currently enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Snapshot of the peer's region servers.
    ///
    /// Copy-on-write: the returned slice never changes under the caller;
    /// [`set_region_servers`](Self::set_region_servers) swaps in a new
    /// snapshot.
    #[must_use]
    pub fn region_servers(&self) -> Arc<[ServerName]> {
        Arc::clone(&self.region_servers.read())
    }

    /// Replace the region-server snapshot.
    pub fn set_region_servers(&self, servers: Vec<ServerName>) {
        *self.region_servers.write() = Arc::from(servers);
    }

    /// Start tracking the peer-state node.
    ///
    /// If the node does not exist yet it is created as ENABLED (a new peer
    /// starts enabled); the race with a concurrent creator is benign. The
    /// current state is read once here; later changes arrive through the
    /// tracker's [`NodeObserver`] callback.
    pub fn start_state_tracker(
        &mut self,
        client: Arc<dyn CoordinationClient>,
        peer_state_path: &str,
    ) -> Result<()> {
        if !client.exists(peer_state_path)? {
            match client.create(peer_state_path, &PeerState::Enabled.to_bytes()) {
                Ok(()) | Err(SpanError::NodeExists { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        let tracker = PeerStateTracker::new(
            peer_state_path.to_owned(),
            client,
            Arc::clone(&self.enabled),
        );
        tracker.refresh()?;
        self.tracker = Some(tracker);
        Ok(())
    }

    /// The observer to hand to watch dispatch, once tracking started.
    #[must_use]
    pub fn tracker(&self) -> Option<&PeerStateTracker> {
        self.tracker.as_ref()
    }
}
