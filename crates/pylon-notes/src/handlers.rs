// Copyright 2026 The Pylon Authors
// SPDX-License-Identifier: Apache-2.0

//! Request handlers for the client (`/note`) and peer (`/backup`,
//! `/primary`) surfaces.

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use pylon_core::{Note, SyncMode};
use tracing::info;

use crate::engine::remote::{DeleteOutcome, WriteOutcome};
use crate::engine::{self, local, remote, WriteMethod};
use crate::error::ApiError;
use crate::peer::PeerResponse;
use crate::state::AppState;

type HandlerResult = std::result::Result<Response, ApiError>;

fn parse_id(raw: &str, method: &Method, uri: &Uri) -> std::result::Result<i64, ApiError> {
    raw.parse().map_err(|_| ApiError::bad_request("wrong URI, ID was invalid", method, uri))
}

fn parse_note(body: &Bytes, method: &Method, uri: &Uri) -> std::result::Result<Note, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        ApiError::bad_request(format!("error decoding JSON body: {e}"), method, uri)
    })
}

fn msg_ok() -> Response {
    Json(serde_json::json!({"msg": "OK"})).into_response()
}

fn msg_failed() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({"msg": "FAILED"})))
        .into_response()
}

/// Relays a peer's answer verbatim.
fn relay(response: PeerResponse) -> Response {
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, [(header::CONTENT_TYPE, "application/json")], response.body).into_response()
}

// ============================================================================
// Client surface: /note
// ============================================================================

/// `GET /note`: every local note, served without fan-out.
pub async fn get_all(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    match state.store.read_all().await {
        Ok(notes) => Json(notes).into_response(),
        Err(e) => ApiError::from_core(&e, &method, &uri, "").into_response(),
    }
}

/// `GET /note/{id}`: one local note, 400 on a bad or unknown id.
pub async fn get_one(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    method: Method,
    uri: Uri,
) -> Response {
    let result: HandlerResult = async {
        let id = parse_id(&raw_id, &method, &uri)?;
        let note = state
            .store
            .read_one(id)
            .await
            .map_err(|_| ApiError::bad_request("wrong URI, non existing ID", &method, &uri))?;
        Ok(Json(note).into_response())
    }
    .await;
    result.unwrap_or_else(IntoResponse::into_response)
}

/// `POST /note`: create a note. Any supplied id is ignored; the
/// primary allocates it.
pub async fn post_note(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    info!(method = %method, uri = %uri, "client request");
    let note = match parse_note(&body, &method, &uri) {
        Ok(note) => note,
        Err(e) => return e.into_response(),
    };
    dispatch_write(&state, WriteMethod::Post, note, &method, &uri, &body).await
}

/// `PUT /note/{id}`: overwrite an existing note.
pub async fn put_note(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    update_note(&state, WriteMethod::Put, &raw_id, &method, &uri, &body).await
}

/// `PATCH /note/{id}`: merge non-empty fields into an existing note.
pub async fn patch_note(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    update_note(&state, WriteMethod::Patch, &raw_id, &method, &uri, &body).await
}

async fn update_note(
    state: &AppState,
    write: WriteMethod,
    raw_id: &str,
    method: &Method,
    uri: &Uri,
    body: &Bytes,
) -> Response {
    info!(method = %method, uri = %uri, "client request");
    let prepared = parse_id(raw_id, method, uri).and_then(|id| {
        parse_note(body, method, uri).map(|mut note| {
            // The path id is authoritative for updates.
            note.id = id;
            note
        })
    });
    let note = match prepared {
        Ok(note) => note,
        Err(e) => return e.into_response(),
    };
    dispatch_write(state, write, note, method, uri, body).await
}

async fn dispatch_write(
    state: &AppState,
    write: WriteMethod,
    note: Note,
    method: &Method,
    uri: &Uri,
    body: &Bytes,
) -> Response {
    let result = match state.mode {
        SyncMode::RemoteWrite => match remote::client_write(state, write, note).await {
            Ok(WriteOutcome::Applied(applied)) => Ok(Json(applied).into_response()),
            Ok(WriteOutcome::Forwarded(response)) => Ok(relay(response)),
            Err(e) => Err(e),
        },
        SyncMode::LocalWrite => match local::client_write(state, write, note).await {
            Ok(applied) => Ok(Json(applied).into_response()),
            Err(e) => Err(e),
        },
    };

    result.unwrap_or_else(|e| {
        ApiError::from_core(&e, method, uri, String::from_utf8_lossy(body)).into_response()
    })
}

/// `DELETE /note/{id}`: remove a note.
pub async fn delete_note(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    method: Method,
    uri: Uri,
) -> Response {
    info!(method = %method, uri = %uri, "client request");
    let id = match parse_id(&raw_id, &method, &uri) {
        Ok(id) => id,
        Err(e) => return e.into_response(),
    };

    let result = match state.mode {
        SyncMode::RemoteWrite => match remote::client_delete(&state, id).await {
            Ok(DeleteOutcome::Applied) => Ok(msg_ok()),
            Ok(DeleteOutcome::Forwarded(response)) => Ok(relay(response)),
            Err(e) => Err(e),
        },
        SyncMode::LocalWrite => local::client_delete(&state, id).await.map(|()| msg_ok()),
    };

    result.unwrap_or_else(|e| ApiError::from_core(&e, &method, &uri, "").into_response())
}

// ============================================================================
// Peer surface: /primary (remote-write), /primary/{id} (both modes)
// ============================================================================

/// `POST|PUT|PATCH /primary` on the fixed primary: apply and fan out.
pub async fn primary_write(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    let result: HandlerResult = async {
        let note = parse_note(&body, &method, &uri)?;
        let write = WriteMethod::from_http(&method)
            .ok_or_else(|| ApiError::bad_request("unsupported method", &method, &uri))?;
        let applied = remote::apply_and_fanout(&state, write, note).await.map_err(|e| {
            ApiError::from_core(&e, &method, &uri, String::from_utf8_lossy(&body))
        })?;
        Ok(Json(applied).into_response())
    }
    .await;
    result.unwrap_or_else(IntoResponse::into_response)
}

/// `DELETE /primary/{id}` on the fixed primary: delete and fan out.
pub async fn primary_delete(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    method: Method,
    uri: Uri,
) -> Response {
    let id = match parse_id(&raw_id, &method, &uri) {
        Ok(id) => id,
        Err(e) => return e.into_response(),
    };
    match remote::delete_and_fanout(&state, id).await {
        Ok(()) => msg_ok(),
        Err(_) => msg_failed(),
    }
}

/// `GET /primary/{id}` under local-write: move this replica's primary
/// pointer to the sender named in the `primary` header.
pub async fn set_primary(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let result: HandlerResult = async {
        let id = parse_id(&raw_id, &method, &uri)?;
        let new_primary = headers
            .get("primary")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::bad_request("missing primary header", &method, &uri))?
            .to_string();

        match state.primary_map.insert(id, new_primary.clone()) {
            Some(old) => info!(id, from = %old, to = %new_primary, "moving item to new primary"),
            None => info!(id, primary = %new_primary, "moving item to new primary"),
        }
        Ok(msg_ok())
    }
    .await;
    result.unwrap_or_else(IntoResponse::into_response)
}

// ============================================================================
// Peer surface: /backup (both modes)
// ============================================================================

/// `POST|PUT|PATCH /backup`: apply a fanned-out write verbatim.
pub async fn backup_write(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    let result: HandlerResult = async {
        let note = parse_note(&body, &method, &uri)?;
        let write = WriteMethod::from_http(&method)
            .ok_or_else(|| ApiError::bad_request("unsupported method", &method, &uri))?;
        let stored = engine::apply_backup(&state.store, write, note).await.map_err(|e| {
            ApiError::from_core(&e, &method, &uri, String::from_utf8_lossy(&body))
        })?;
        Ok(Json(stored).into_response())
    }
    .await;
    result.unwrap_or_else(IntoResponse::into_response)
}

/// `DELETE /backup/{id}`: apply a fanned-out delete.
pub async fn backup_delete(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    method: Method,
    uri: Uri,
) -> Response {
    let id = match parse_id(&raw_id, &method, &uri) {
        Ok(id) => id,
        Err(e) => return e.into_response(),
    };
    match state.store.delete(id).await {
        Ok(()) => msg_ok(),
        Err(_) => msg_failed(),
    }
}
