//! Shared per-replica state handed to every request handler.

use std::sync::Arc;

use dashmap::DashMap;
use pylon_core::{StoreConfig, SyncMode};

use crate::peer::{HttpPeer, NotePeer};
use crate::storage::NoteStore;

/// How this process identifies itself within the replica set.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    /// Whether this process is `replicas[0]`, the fixed primary under
    /// remote-write.
    pub is_replica0: bool,
    /// This replica's own entry in the configured replica list; sent
    /// as the `primary` header under local-write.
    pub replica_id: String,
}

/// Request-handler state: storage, peers, and the primary map.
///
/// The primary map is only consulted under local-write; it is never
/// persisted and rebuilds implicitly through write traffic.
#[derive(Clone)]
pub struct AppState {
    /// Local note storage.
    pub store: Arc<NoteStore>,
    /// Replication mode, fixed at startup.
    pub mode: SyncMode,
    /// Clients for the fixed, ordered replica set (self included).
    pub peers: Vec<Arc<dyn NotePeer>>,
    /// noteId → identifier of its most recent writer.
    pub primary_map: Arc<DashMap<i64, String>>,
    /// This replica's identity.
    pub node: NodeIdentity,
}

impl AppState {
    /// Builds the state for a configured replica set, with one HTTP
    /// client per replica.
    #[must_use]
    pub fn new(store: Arc<NoteStore>, config: &StoreConfig, node: NodeIdentity) -> Self {
        let peers = config
            .replicas
            .iter()
            .map(|address| Arc::new(HttpPeer::new(address)) as Arc<dyn NotePeer>)
            .collect();
        Self::with_peers(store, config.sync, peers, node)
    }

    /// Builds the state around pre-constructed peers (used by tests).
    #[must_use]
    pub fn with_peers(
        store: Arc<NoteStore>,
        mode: SyncMode,
        peers: Vec<Arc<dyn NotePeer>>,
        node: NodeIdentity,
    ) -> Self {
        Self { store, mode, peers, primary_map: Arc::new(DashMap::new()), node }
    }

    /// The fan-out targets of the fixed primary: every replica but
    /// `replicas[0]`.
    pub fn backup_peers(&self) -> impl Iterator<Item = &Arc<dyn NotePeer>> {
        self.peers.iter().skip(1)
    }

    /// The fan-out targets under local-write: every replica but this
    /// one.
    pub fn other_peers(&self) -> impl Iterator<Item = &Arc<dyn NotePeer>> {
        self.peers.iter().filter(|peer| peer.address() != self.node.replica_id)
    }
}
