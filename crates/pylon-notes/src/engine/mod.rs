// Copyright 2026 The Pylon Authors
// SPDX-License-Identifier: Apache-2.0

//! The protocol engines.
//!
//! Reads are always served locally; each client write dispatches
//! through one of two protocols fixed at startup:
//!
//! - [`remote`]: a fixed primary (`replicas[0]`) serializes every
//!   write and fans the applied state out to the backups.
//! - [`local`]: the replica that receives the write becomes the new
//!   primary for that note id and fans out from there.
//!
//! Both share the local apply semantics in this module: POST creates,
//! PUT overwrites an existing note, PATCH merges non-empty fields.

pub mod local;
pub mod remote;

use pylon_core::{Note, Result};

use crate::storage::NoteStore;

/// A client-visible write verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMethod {
    /// Create a note (the primary allocates the id).
    Post,
    /// Overwrite an existing note's title and body.
    Put,
    /// Merge non-empty fields into an existing note.
    Patch,
}

impl WriteMethod {
    /// The verb as an HTTP method name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
        }
    }

    /// The verb as a client-side HTTP method.
    #[must_use]
    pub fn as_http(&self) -> reqwest::Method {
        match self {
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
        }
    }

    /// Maps a server-side HTTP method onto a write verb.
    #[must_use]
    pub fn from_http(method: &axum::http::Method) -> Option<Self> {
        if method == axum::http::Method::POST {
            Some(Self::Post)
        } else if method == axum::http::Method::PUT {
            Some(Self::Put)
        } else if method == axum::http::Method::PATCH {
            Some(Self::Patch)
        } else {
            None
        }
    }
}

impl std::fmt::Display for WriteMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Applies a client write to local storage and returns the stored
/// note. POST allocates the next id, ignoring any id in the body.
///
/// # Errors
///
/// PUT and PATCH fail when the note does not exist; all verbs fail on
/// storage errors.
pub async fn apply_write(store: &NoteStore, method: WriteMethod, note: Note) -> Result<Note> {
    match method {
        WriteMethod::Post => store.create_next(note).await,
        WriteMethod::Put => {
            let mut stored = store.read_one(note.id).await?;
            stored.overwrite(&note);
            store.update(&stored).await?;
            Ok(stored)
        }
        WriteMethod::Patch => {
            let mut stored = store.read_one(note.id).await?;
            stored.merge(&note);
            store.update(&stored).await?;
            Ok(stored)
        }
    }
}

/// Applies a fan-out write received on `/backup`. Unlike the client
/// path, POST stores the note verbatim, keeping the id the primary
/// assigned.
///
/// # Errors
///
/// Same failure modes as [`apply_write`].
pub async fn apply_backup(store: &NoteStore, method: WriteMethod, note: Note) -> Result<Note> {
    match method {
        WriteMethod::Post => {
            store.create(&note).await?;
            Ok(note)
        }
        WriteMethod::Put | WriteMethod::Patch => apply_write(store, method, note).await,
    }
}
