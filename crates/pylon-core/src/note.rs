//! The note data model.

use serde::{Deserialize, Serialize};

/// A single note, persisted as `<id>.json`.
///
/// All fields default when absent so that partial bodies (PATCH) and
/// id-less bodies (POST) decode cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Note {
    /// Dense-ish integer id allocated by the primary.
    pub id: i64,
    /// Note title.
    pub title: String,
    /// Note body.
    pub body: String,
}

impl Note {
    /// Creates a note with the given fields.
    #[must_use]
    pub fn new(id: i64, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self { id, title: title.into(), body: body.into() }
    }

    /// Overwrites title and body from `update`, keeping the id (PUT
    /// semantics).
    pub fn overwrite(&mut self, update: &Note) {
        self.title = update.title.clone();
        self.body = update.body.clone();
    }

    /// Merges the non-empty fields of `update` into this note (PATCH
    /// semantics).
    pub fn merge(&mut self, update: &Note) {
        if !update.title.is_empty() {
            self.title = update.title.clone();
        }
        if !update.body.is_empty() {
            self.body = update.body.clone();
        }
    }
}
