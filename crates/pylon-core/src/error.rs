//! Error types shared across the pylon crates.

use thiserror::Error;

/// A specialized `Result` type for pylon operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur across the pylon components.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (bad file, bad environment variable).
    #[error("configuration error: {0}")]
    Config(String),

    /// A listener could not be bound.
    #[error("bind error on {addr}: {source}")]
    Bind {
        /// The address that failed to bind.
        addr: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A malformed or unexpected message on a control channel.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A peer replica rejected or failed an operation.
    #[error("peer {peer} failed: {reason}")]
    Peer {
        /// Address of the failing peer.
        peer: String,
        /// Why the peer call failed.
        reason: String,
    },

    /// The requested note does not exist.
    #[error("note {0} not found")]
    NoteNotFound(i64),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Creates a new bind error for the given address.
    #[must_use]
    pub fn bind(addr: impl Into<String>, source: std::io::Error) -> Self {
        Self::Bind { addr: addr.into(), source }
    }

    /// Creates a new peer error.
    #[must_use]
    pub fn peer(peer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Peer { peer: peer.into(), reason: reason.into() }
    }

    /// Returns the HTTP status code the note store maps this error to.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::Config(_) | Self::Protocol(_) | Self::NoteNotFound(_) => 400,
            Self::Bind { .. } | Self::Peer { .. } | Self::Io(_) | Self::Json(_) => 500,
        }
    }
}
