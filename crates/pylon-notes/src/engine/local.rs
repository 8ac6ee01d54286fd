// Copyright 2026 The Pylon Authors
// SPDX-License-Identifier: Apache-2.0

//! Local-write: the primary migrates to the writing replica.
//!
//! The replica that receives a client write applies it locally,
//! points its own primary map at itself, and acknowledges the client.
//! Propagation happens afterwards: each other replica gets the
//! applied state on `/backup` followed by a `GET /primary/{id}`
//! carrying the `primary` header, sequentially in list order. Writes
//! to the same id from different replicas are not totally ordered;
//! the primary map converges to the most recent writer per key.

use metrics::counter;
use pylon_core::{Note, Result};
use tracing::{debug, info, warn};

use crate::state::AppState;

use super::{apply_write, WriteMethod};

/// Applies a client `/note` write on this replica and schedules the
/// fan-out. The returned note is final from the client's point of
/// view before any peer has seen it.
///
/// # Errors
///
/// Fails only on the local apply; propagation failures are logged,
/// not surfaced.
pub async fn client_write(state: &AppState, method: WriteMethod, note: Note) -> Result<Note> {
    let applied = apply_write(&state.store, method, note).await?;
    take_ownership(state, applied.id);

    let fanout_state = state.clone();
    let fanout_note = applied.clone();
    tokio::spawn(async move { fanout_write(&fanout_state, method, &fanout_note).await });

    Ok(applied)
}

/// Applies a client `/note/{id}` delete on this replica and schedules
/// the fan-out of `DELETE /backup/{id}`.
///
/// # Errors
///
/// Fails only on the local delete.
pub async fn client_delete(state: &AppState, id: i64) -> Result<()> {
    state.store.delete(id).await?;

    let fanout_state = state.clone();
    tokio::spawn(async move { fanout_delete(&fanout_state, id).await });

    Ok(())
}

/// Points this replica's primary map at itself for `id`.
fn take_ownership(state: &AppState, id: i64) {
    let new_primary = state.node.replica_id.clone();
    match state.primary_map.insert(id, new_primary.clone()) {
        Some(old) if old != new_primary => {
            info!(id, from = %old, to = %new_primary, "moving item to new primary");
        }
        Some(_) => {}
        None => info!(id, primary = %new_primary, "moving item to new primary"),
    }
}

/// Propagates an applied write: `/backup` then `/primary/{id}` per
/// peer, in list order, stopping at the first failure.
pub(crate) async fn fanout_write(state: &AppState, method: WriteMethod, note: &Note) {
    for peer in state.other_peers() {
        if let Err(e) = peer.send_backup(method, note).await {
            counter!("pylon_notes_fanout_failures_total").increment(1);
            warn!(peer = peer.address(), id = note.id, error = %e, "backup propagation failed");
            return;
        }
        if let Err(e) = peer.announce_primary(note.id, &state.node.replica_id).await {
            counter!("pylon_notes_fanout_failures_total").increment(1);
            warn!(peer = peer.address(), id = note.id, error = %e, "primary update failed");
            return;
        }
        debug!(peer = peer.address(), id = note.id, "propagated write");
    }
}

/// Propagates a delete to every other replica, in list order,
/// stopping at the first failure.
pub(crate) async fn fanout_delete(state: &AppState, id: i64) {
    for peer in state.other_peers() {
        if let Err(e) = peer.delete_backup(id).await {
            counter!("pylon_notes_fanout_failures_total").increment(1);
            warn!(peer = peer.address(), id, error = %e, "delete propagation failed");
            return;
        }
        debug!(peer = peer.address(), id, "propagated delete");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use pylon_core::SyncMode;

    use crate::engine::testing::MockPeer;
    use crate::peer::NotePeer;
    use crate::state::NodeIdentity;
    use crate::storage::NoteStore;

    use super::*;

    struct Harness {
        _dir: tempfile::TempDir,
        state: AppState,
        others: Vec<Arc<MockPeer>>,
    }

    /// A three-replica set where this process is `10.0.0.3:8080`
    /// (the last entry).
    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(NoteStore::new(dir.path().to_path_buf()).await.unwrap());

        let others =
            vec![Arc::new(MockPeer::new("10.0.0.1:8080")), Arc::new(MockPeer::new("10.0.0.2:8080"))];
        let self_peer = Arc::new(MockPeer::new("10.0.0.3:8080"));

        let peers: Vec<Arc<dyn NotePeer>> = vec![
            others[0].clone(),
            others[1].clone(),
            self_peer,
        ];
        let node =
            NodeIdentity { is_replica0: false, replica_id: "10.0.0.3:8080".to_string() };
        let state = AppState::with_peers(store, SyncMode::LocalWrite, peers, node);
        Harness { _dir: dir, state, others }
    }

    #[tokio::test]
    async fn test_post_applies_locally_and_takes_ownership() {
        let h = harness().await;

        let applied =
            client_write(&h.state, WriteMethod::Post, Note::new(0, "t", "b")).await.unwrap();

        // The client-visible state is final before any peer was told.
        assert_eq!(applied.id, 0);
        assert_eq!(h.state.store.read_one(0).await.unwrap(), applied);
        assert_eq!(h.state.primary_map.get(&0).unwrap().value(), "10.0.0.3:8080");
    }

    #[tokio::test]
    async fn test_fanout_sends_backup_then_primary_update() {
        let h = harness().await;
        let note = Note::new(7, "x", "z");
        h.state.store.create(&note).await.unwrap();

        fanout_write(&h.state, WriteMethod::Patch, &note).await;

        for peer in &h.others {
            let backups = peer.backups.lock().unwrap();
            assert_eq!(*backups, vec![(WriteMethod::Patch, note.clone())]);
            let updates = peer.primary_updates.lock().unwrap();
            assert_eq!(*updates, vec![(7, "10.0.0.3:8080".to_string())]);
        }
    }

    #[tokio::test]
    async fn test_fanout_stops_at_first_failing_peer() {
        let h = harness().await;
        h.others[0].fail_backup.store(true, Ordering::SeqCst);

        fanout_write(&h.state, WriteMethod::Post, &Note::new(0, "t", "b")).await;

        assert!(h.others[0].backups.lock().unwrap().is_empty());
        // List order: the second peer is never reached.
        assert!(h.others[1].backups.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_propagation_failure_is_invisible_to_the_client() {
        let h = harness().await;
        h.others[0].fail_backup.store(true, Ordering::SeqCst);
        h.others[1].fail_backup.store(true, Ordering::SeqCst);

        let applied =
            client_write(&h.state, WriteMethod::Post, Note::new(0, "t", "b")).await.unwrap();
        assert_eq!(applied.id, 0);
        assert_eq!(h.state.store.read_one(0).await.unwrap(), applied);
    }

    #[tokio::test]
    async fn test_patch_on_missing_note_fails_without_fanout() {
        let h = harness().await;
        assert!(
            client_write(&h.state, WriteMethod::Patch, Note::new(9, "t", "b")).await.is_err()
        );
        assert!(h.state.primary_map.get(&9).is_none());
    }

    #[tokio::test]
    async fn test_delete_fans_out_backup_deletes_only() {
        let h = harness().await;
        h.state.store.create(&Note::new(4, "t", "b")).await.unwrap();

        client_delete(&h.state, 4).await.unwrap();
        fanout_delete(&h.state, 4).await;

        assert!(h.state.store.read_one(4).await.is_err());
        for peer in &h.others {
            assert!(peer.backup_deletes.lock().unwrap().contains(&4));
            // Deletes never move primaries.
            assert!(peer.primary_updates.lock().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_rewriting_replica_overwrites_old_primary() {
        let h = harness().await;
        h.state.primary_map.insert(7, "10.0.0.1:8080".to_string());
        h.state.store.create(&Note::new(7, "x", "y")).await.unwrap();

        client_write(&h.state, WriteMethod::Patch, Note::new(7, "", "z")).await.unwrap();
        assert_eq!(h.state.primary_map.get(&7).unwrap().value(), "10.0.0.3:8080");
    }
}
