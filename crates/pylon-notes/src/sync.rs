//! Startup synchronization with the fixed primary.

use std::time::Duration;

use pylon_core::Result;
use tracing::{info, warn};

use crate::peer::NotePeer;
use crate::storage::NoteStore;

/// How often the initial sync is retried before giving up.
pub const SYNC_ATTEMPTS: u32 = 5;

/// Gap between sync attempts.
const RETRY_GAP: Duration = Duration::from_secs(1);

/// Populates the local directory from `replicas[0]` before the API
/// listener starts accepting.
///
/// Retries up to [`SYNC_ATTEMPTS`] times with one-second gaps. Notes
/// that fail to write locally are logged and skipped; the dump does
/// not consider partial failure.
///
/// # Errors
///
/// Returns the last fetch error once every attempt has failed.
pub async fn startup_sync(store: &NoteStore, primary: &dyn NotePeer) -> Result<()> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match primary.fetch_notes().await {
            Ok(notes) => {
                let count = notes.len();
                for note in &notes {
                    if let Err(e) = store.write(note).await {
                        warn!(id = note.id, error = %e, "could not dump note during sync");
                    }
                }
                info!(primary = primary.address(), count, "synchronized with primary");
                return Ok(());
            }
            Err(e) => {
                warn!(
                    primary = primary.address(),
                    attempt,
                    max_attempts = SYNC_ATTEMPTS,
                    error = %e,
                    "sync with primary failed"
                );
                if attempt >= SYNC_ATTEMPTS {
                    return Err(e);
                }
                tokio::time::sleep(RETRY_GAP).await;
            }
        }
    }
}
