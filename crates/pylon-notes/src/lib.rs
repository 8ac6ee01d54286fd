// Copyright 2026 The Pylon Authors
// SPDX-License-Identifier: Apache-2.0

//! Primary/backup replicated note store.
//!
//! Each replica serves the same REST surface over a directory of
//! `<id>.json` files and propagates writes to its peers under one of
//! two protocols fixed at startup:
//!
//! - **remote-write**: `replicas[0]` is the fixed primary; writes
//!   arriving elsewhere are forwarded to it and it fans the applied
//!   state out to every backup.
//! - **local-write**: the replica that receives a write becomes the
//!   new primary for that note id, acknowledges the client, and fans
//!   out afterwards, migrating the per-item primary pointer with a
//!   `primary` header.
//!
//! Reads are always local. Non-primary replicas populate their
//! directory from `replicas[0]` before serving.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod error;
pub mod handlers;
pub mod peer;
pub mod router;
pub mod state;
pub mod storage;
pub mod sync;

pub use error::ApiError;
pub use peer::{HttpPeer, NotePeer};
pub use router::build_router;
pub use state::{AppState, NodeIdentity};
pub use storage::NoteStore;
pub use sync::startup_sync;
