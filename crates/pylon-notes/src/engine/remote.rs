// Copyright 2026 The Pylon Authors
// SPDX-License-Identifier: Apache-2.0

//! Remote-write: a fixed primary serializes all writes.
//!
//! A client write arriving on a non-primary replica is forwarded to
//! `replicas[0]` and the primary's response is relayed verbatim. The
//! primary applies the write locally and then propagates the applied
//! state to every backup in list order, waiting for each 200 before
//! moving on. A single failing backup fails the whole operation;
//! nothing is rolled back.

use pylon_core::{Note, Result};
use tracing::{debug, info};

use crate::peer::PeerResponse;
use crate::state::AppState;

use super::{apply_write, WriteMethod};

/// What happened to a client write on this replica.
#[derive(Debug)]
pub enum WriteOutcome {
    /// This replica is the primary; the note was applied and fanned
    /// out.
    Applied(Note),
    /// The write was forwarded; the primary's response is relayed
    /// verbatim.
    Forwarded(PeerResponse),
}

/// What happened to a client delete on this replica.
#[derive(Debug)]
pub enum DeleteOutcome {
    /// Applied and fanned out on the primary.
    Applied,
    /// Forwarded to the primary.
    Forwarded(PeerResponse),
}

/// Dispatches a client `/note` write under remote-write.
///
/// # Errors
///
/// On the primary, fails if the local apply or any backup fails; on a
/// non-primary, fails only when the primary is unreachable.
pub async fn client_write(
    state: &AppState,
    method: WriteMethod,
    note: Note,
) -> Result<WriteOutcome> {
    if state.node.is_replica0 {
        return Ok(WriteOutcome::Applied(apply_and_fanout(state, method, note).await?));
    }

    info!(%method, "forwarding request to primary");
    let response = state.peers[0].forward_write(method, &note).await?;
    Ok(WriteOutcome::Forwarded(response))
}

/// Dispatches a client `/note/{id}` delete under remote-write.
///
/// # Errors
///
/// Same failure modes as [`client_write`].
pub async fn client_delete(state: &AppState, id: i64) -> Result<DeleteOutcome> {
    if state.node.is_replica0 {
        delete_and_fanout(state, id).await?;
        return Ok(DeleteOutcome::Applied);
    }

    info!("forwarding delete to primary");
    let response = state.peers[0].forward_delete(id).await?;
    Ok(DeleteOutcome::Forwarded(response))
}

/// Primary-side write: apply locally, then propagate to every backup
/// sequentially.
///
/// # Errors
///
/// Fails on the local apply or on the first backup that does not
/// answer 200. Backups already updated stay updated.
pub async fn apply_and_fanout(state: &AppState, method: WriteMethod, note: Note) -> Result<Note> {
    let applied = apply_write(&state.store, method, note).await?;

    for peer in state.backup_peers() {
        let stored = peer.send_backup(method, &applied).await?;
        debug!(peer = peer.address(), id = stored.id, "backup applied");
    }

    Ok(applied)
}

/// Primary-side delete: remove locally, then propagate to every
/// backup sequentially.
///
/// # Errors
///
/// Same failure modes as [`apply_and_fanout`].
pub async fn delete_and_fanout(state: &AppState, id: i64) -> Result<()> {
    state.store.delete(id).await?;

    for peer in state.backup_peers() {
        peer.delete_backup(id).await?;
        debug!(peer = peer.address(), id, "backup delete applied");
    }

    Ok(())
}
