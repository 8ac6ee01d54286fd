//! API router configuration.

use axum::routing::{delete, get, post};
use axum::Router;
use pylon_core::SyncMode;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::handlers;
use crate::state::AppState;

/// Builds the note store router for the state's replication mode.
///
/// The `/note` surface is identical in both modes; the peer surfaces
/// differ: local-write peers receive `/backup` and the primary-map
/// update on `GET /primary/{id}`, remote-write adds the forwarding
/// target `/primary` on the fixed primary.
pub fn build_router(state: AppState, log_requests: bool) -> Router {
    let router = Router::new()
        .route("/note", get(handlers::get_all).post(handlers::post_note))
        .route(
            "/note/{id}",
            get(handlers::get_one)
                .put(handlers::put_note)
                .patch(handlers::patch_note)
                .delete(handlers::delete_note),
        );

    let router = match state.mode {
        SyncMode::LocalWrite => router
            .route("/primary/{id}", get(handlers::set_primary))
            .route(
                "/backup",
                post(handlers::backup_write)
                    .put(handlers::backup_write)
                    .patch(handlers::backup_write),
            )
            .route("/backup/{id}", delete(handlers::backup_delete)),
        SyncMode::RemoteWrite => router
            .route(
                "/primary",
                post(handlers::primary_write)
                    .put(handlers::primary_write)
                    .patch(handlers::primary_write),
            )
            .route("/primary/{id}", delete(handlers::primary_delete))
            .route(
                "/backup",
                post(handlers::backup_write)
                    .put(handlers::backup_write)
                    .patch(handlers::backup_write),
            )
            .route("/backup/{id}", delete(handlers::backup_delete)),
    };

    let router = router.with_state(state);

    if log_requests {
        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO));
        router.layer(trace_layer)
    } else {
        router
    }
}
