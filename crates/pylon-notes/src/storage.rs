// Copyright 2026 The Pylon Authors
// SPDX-License-Identifier: Apache-2.0

//! Directory-backed note storage.
//!
//! One pretty-printed JSON file per note, named `<id>.json`. Files
//! whose name is not `<integer>.json` are ignored. Writes within this
//! process are serialized by a single gate; cross-replica ordering is
//! the protocol engine's concern.

use std::path::{Path, PathBuf};

use pylon_core::{Error, Note, Result};
use tokio::fs;
use tracing::warn;

/// Directory of `<id>.json` files with atomic single-file operations.
pub struct NoteStore {
    data_dir: PathBuf,
    write_gate: tokio::sync::Mutex<()>,
}

impl NoteStore {
    /// Opens (creating if needed) the storage directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn new(data_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&data_dir).await?;
        Ok(Self { data_dir, write_gate: tokio::sync::Mutex::new(()) })
    }

    /// The storage directory.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Reads every note in the directory, in unspecified order.
    ///
    /// Unreadable or unparsable note files are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error only if the directory itself cannot be read.
    pub async fn read_all(&self) -> Result<Vec<Note>> {
        let mut entries = fs::read_dir(&self.data_dir).await?;
        let mut notes = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if note_id_from_path(&path).is_none() {
                continue;
            }
            match read_note_file(&path).await {
                Ok(note) => notes.push(note),
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "skipping unreadable note file");
                }
            }
        }

        Ok(notes)
    }

    /// Reads the note stored under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoteNotFound`] when no such file exists.
    pub async fn read_one(&self, id: i64) -> Result<Note> {
        let path = self.note_path(id);
        match read_note_file(&path).await {
            Ok(note) => Ok(note),
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NoteNotFound(id))
            }
            Err(e) => Err(e),
        }
    }

    /// Writes a new note file for `note.id`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub async fn create(&self, note: &Note) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        self.write_file(note).await
    }

    /// Overwrites an existing note file. The file must already exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoteNotFound`] when the note does not exist.
    pub async fn update(&self, note: &Note) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        if fs::metadata(self.note_path(note.id)).await.is_err() {
            return Err(Error::NoteNotFound(note.id));
        }
        self.write_file(note).await
    }

    /// Force-writes a note, creating or overwriting as needed. Used
    /// by the startup dump.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub async fn write(&self, note: &Note) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        self.write_file(note).await
    }

    /// Deletes the note stored under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoteNotFound`] when no such file exists.
    pub async fn delete(&self, id: i64) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        match fs::remove_file(self.note_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::NoteNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Next free id: one past the largest id on disk, `0` for an
    /// empty directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub async fn allocate_id(&self) -> Result<i64> {
        let mut entries = fs::read_dir(&self.data_dir).await?;
        let mut last = -1;

        while let Some(entry) = entries.next_entry().await? {
            if let Some(id) = note_id_from_path(&entry.path()) {
                last = last.max(id);
            }
        }

        Ok(last + 1)
    }

    /// Allocates an id for `note` and creates it, atomically with
    /// respect to other writers in this process.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation or the write fails.
    pub async fn create_next(&self, mut note: Note) -> Result<Note> {
        let _gate = self.write_gate.lock().await;
        note.id = self.allocate_id().await?;
        self.write_file(&note).await?;
        Ok(note)
    }

    fn note_path(&self, id: i64) -> PathBuf {
        self.data_dir.join(format!("{id}.json"))
    }

    async fn write_file(&self, note: &Note) -> Result<()> {
        let payload = serde_json::to_vec_pretty(note)?;
        fs::write(self.note_path(note.id), payload).await?;
        Ok(())
    }
}

/// Extracts the note id from a `<id>.json` path, if it is one.
fn note_id_from_path(path: &Path) -> Option<i64> {
    if path.extension()?.to_str()? != "json" {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

async fn read_note_file(path: &Path) -> Result<Note> {
    let raw = fs::read(path).await?;
    Ok(serde_json::from_slice(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn empty_store() -> (tempfile::TempDir, NoteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = NoteStore::new(dir.path().to_path_buf()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_create_then_read_round_trip() {
        let (_dir, store) = empty_store().await;
        let note = Note::new(3, "title", "body");

        store.create(&note).await.unwrap();
        assert_eq!(store.read_one(3).await.unwrap(), note);
    }

    #[tokio::test]
    async fn test_read_after_delete_errors() {
        let (_dir, store) = empty_store().await;
        store.create(&Note::new(1, "t", "b")).await.unwrap();

        store.delete(1).await.unwrap();
        assert!(matches!(store.read_one(1).await, Err(Error::NoteNotFound(1))));
    }

    #[tokio::test]
    async fn test_delete_missing_note_errors() {
        let (_dir, store) = empty_store().await;
        assert!(matches!(store.delete(9).await, Err(Error::NoteNotFound(9))));
    }

    #[tokio::test]
    async fn test_allocate_id_starts_at_zero() {
        let (_dir, store) = empty_store().await;
        assert_eq!(store.allocate_id().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_allocate_id_is_max_plus_one() {
        let (_dir, store) = empty_store().await;
        for id in [0, 1, 5] {
            store.create(&Note::new(id, "t", "b")).await.unwrap();
        }
        assert_eq!(store.allocate_id().await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_create_next_assigns_dense_ids() {
        let (_dir, store) = empty_store().await;

        let first = store.create_next(Note::new(99, "a", "")).await.unwrap();
        let second = store.create_next(Note::new(99, "b", "")).await.unwrap();

        // The supplied id is ignored; allocation is max-of-existing + 1.
        assert_eq!(first.id, 0);
        assert_eq!(second.id, 1);
    }

    #[tokio::test]
    async fn test_update_requires_existing_file() {
        let (_dir, store) = empty_store().await;
        let err = store.update(&Note::new(4, "t", "b")).await.unwrap_err();
        assert!(matches!(err, Error::NoteNotFound(4)));

        store.create(&Note::new(4, "t", "b")).await.unwrap();
        store.update(&Note::new(4, "t2", "b2")).await.unwrap();
        assert_eq!(store.read_one(4).await.unwrap().title, "t2");
    }

    #[tokio::test]
    async fn test_write_creates_or_overwrites() {
        let (_dir, store) = empty_store().await;
        store.write(&Note::new(7, "a", "b")).await.unwrap();
        store.write(&Note::new(7, "c", "d")).await.unwrap();
        assert_eq!(store.read_one(7).await.unwrap(), Note::new(7, "c", "d"));
    }

    #[tokio::test]
    async fn test_read_all_ignores_foreign_files() {
        let (dir, store) = empty_store().await;
        store.create(&Note::new(0, "t", "b")).await.unwrap();
        store.create(&Note::new(2, "t", "b")).await.unwrap();
        std::fs::write(dir.path().join("README.md"), "not a note").unwrap();
        std::fs::write(dir.path().join("draft.json"), "{}").unwrap();

        let mut ids: Vec<_> =
            store.read_all().await.unwrap().into_iter().map(|n| n.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 2]);

        // Foreign names do not influence allocation either.
        assert_eq!(store.allocate_id().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_notes_are_pretty_printed() {
        let (dir, store) = empty_store().await;
        store.create(&Note::new(0, "t", "b")).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("0.json")).unwrap();
        assert!(raw.contains("\n  \"id\": 0"));
    }
}
