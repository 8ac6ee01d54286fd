// Copyright 2026 The Pylon Authors
// SPDX-License-Identifier: Apache-2.0

//! HTTP clients for the other replicas.
//!
//! The protocol engines talk to peers through the [`NotePeer`] trait
//! so tests can substitute in-memory fakes; [`HttpPeer`] is the
//! production implementation over `reqwest`.

use async_trait::async_trait;
use bytes::Bytes;
use pylon_core::{Error, Note, Result};

use crate::engine::WriteMethod;

/// A peer's verbatim HTTP answer, relayed to the client on forwards.
#[derive(Debug, Clone)]
pub struct PeerResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body (JSON).
    pub body: Bytes,
}

impl PeerResponse {
    /// Whether the peer answered 200.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// One replica as seen from another replica.
#[async_trait]
pub trait NotePeer: Send + Sync {
    /// The peer's `host:port` address as configured.
    fn address(&self) -> &str;

    /// `GET /note`: every note the peer holds. Used by startup sync.
    async fn fetch_notes(&self) -> Result<Vec<Note>>;

    /// Forwards a client write to the peer's `/primary` endpoint and
    /// returns its response verbatim.
    async fn forward_write(&self, method: WriteMethod, note: &Note) -> Result<PeerResponse>;

    /// Forwards a client delete to the peer's `/primary/{id}`
    /// endpoint and returns its response verbatim.
    async fn forward_delete(&self, id: i64) -> Result<PeerResponse>;

    /// Applies a fan-out write on the peer's `/backup` endpoint,
    /// requiring a 200 with the stored note.
    async fn send_backup(&self, method: WriteMethod, note: &Note) -> Result<Note>;

    /// Applies a fan-out delete on the peer's `/backup/{id}`
    /// endpoint, requiring a 200.
    async fn delete_backup(&self, id: i64) -> Result<()>;

    /// `GET /primary/{id}` with the `primary` header: moves the
    /// peer's primary pointer for the note.
    async fn announce_primary(&self, id: i64, primary: &str) -> Result<()>;
}

/// Production peer client over HTTP.
pub struct HttpPeer {
    address: String,
    base: String,
    client: reqwest::Client,
}

impl HttpPeer {
    /// Creates a client for the replica at `host:port`.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        let base = format!("http://{address}");
        Self { address, base, client: reqwest::Client::new() }
    }

    fn transport_err(&self, err: &reqwest::Error) -> Error {
        Error::peer(&self.address, err.to_string())
    }
}

#[async_trait]
impl NotePeer for HttpPeer {
    fn address(&self) -> &str {
        &self.address
    }

    async fn fetch_notes(&self) -> Result<Vec<Note>> {
        let response = self
            .client
            .get(format!("{}/note", self.base))
            .send()
            .await
            .map_err(|e| self.transport_err(&e))?;

        if !response.status().is_success() {
            return Err(Error::peer(
                &self.address,
                format!("note listing returned {}", response.status()),
            ));
        }
        response.json().await.map_err(|e| self.transport_err(&e))
    }

    async fn forward_write(&self, method: WriteMethod, note: &Note) -> Result<PeerResponse> {
        let response = self
            .client
            .request(method.as_http(), format!("{}/primary", self.base))
            .json(note)
            .send()
            .await
            .map_err(|e| self.transport_err(&e))?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| self.transport_err(&e))?;
        Ok(PeerResponse { status, body })
    }

    async fn forward_delete(&self, id: i64) -> Result<PeerResponse> {
        let response = self
            .client
            .delete(format!("{}/primary/{id}", self.base))
            .send()
            .await
            .map_err(|e| self.transport_err(&e))?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| self.transport_err(&e))?;
        Ok(PeerResponse { status, body })
    }

    async fn send_backup(&self, method: WriteMethod, note: &Note) -> Result<Note> {
        let response = self
            .client
            .request(method.as_http(), format!("{}/backup", self.base))
            .json(note)
            .send()
            .await
            .map_err(|e| self.transport_err(&e))?;

        if response.status().as_u16() != 200 {
            return Err(Error::peer(
                &self.address,
                format!("backup returned {}", response.status()),
            ));
        }
        response.json().await.map_err(|e| self.transport_err(&e))
    }

    async fn delete_backup(&self, id: i64) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/backup/{id}", self.base))
            .send()
            .await
            .map_err(|e| self.transport_err(&e))?;

        if response.status().as_u16() != 200 {
            return Err(Error::peer(
                &self.address,
                format!("backup delete returned {}", response.status()),
            ));
        }
        Ok(())
    }

    async fn announce_primary(&self, id: i64, primary: &str) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/primary/{id}", self.base))
            .header("primary", primary)
            .send()
            .await
            .map_err(|e| self.transport_err(&e))?;

        if response.status().as_u16() != 200 {
            return Err(Error::peer(
                &self.address,
                format!("primary update returned {}", response.status()),
            ));
        }
        Ok(())
    }
}
