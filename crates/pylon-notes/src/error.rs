//! API error envelope.
//!
//! Every failed request is answered with the same JSON shape:
//!
//! ```json
//! {"msg": "...", "method": "PATCH", "uri": "/note/7", "body": "..."}
//! ```

use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// A failed request, convertible into the error envelope response.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    msg: String,
    method: String,
    uri: String,
    body: String,
}

#[derive(Serialize)]
struct Envelope<'a> {
    msg: &'a str,
    method: &'a str,
    uri: &'a str,
    body: &'a str,
}

impl ApiError {
    /// Creates an error envelope with an explicit status.
    #[must_use]
    pub fn new(
        status: StatusCode,
        msg: impl Into<String>,
        method: &Method,
        uri: &Uri,
        body: impl Into<String>,
    ) -> Self {
        Self {
            status,
            msg: msg.into(),
            method: method.to_string(),
            uri: uri.to_string(),
            body: body.into(),
        }
    }

    /// A 400 envelope, used for malformed ids and bodies.
    #[must_use]
    pub fn bad_request(msg: impl Into<String>, method: &Method, uri: &Uri) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg, method, uri, "")
    }

    /// Wraps a core error, mapping its status code.
    #[must_use]
    pub fn from_core(
        err: &pylon_core::Error,
        method: &Method,
        uri: &Uri,
        body: impl Into<String>,
    ) -> Self {
        let status =
            StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, err.to_string(), method, uri, body)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let envelope = Envelope {
            msg: &self.msg,
            method: &self.method,
            uri: &self.uri,
            body: &self.body,
        };
        (self.status, axum::Json(&envelope)).into_response()
    }
}
