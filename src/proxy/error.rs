//! Error taxonomy for the request-forwarding path.
//!
//! Upstream I/O failures never terminate the listener; every error is
//! converted into a well-formed JSON response at the handler boundary.

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// The upstream connection could not be established or errored mid-flight.
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    /// The inbound request could not be read.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A downstream response could not be assembled.
    #[error("failed to build response: {0}")]
    Http(#[from] axum::http::Error),
}

impl ProxyError {
    fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Upstream(_) | ProxyError::Http(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": { "message": self.to_string() }
        });
        (
            self.status(),
            [(CONTENT_TYPE, "application/json")],
            Body::from(body.to_string()),
        )
            .into_response()
    }
}
