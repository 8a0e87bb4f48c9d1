//! Route dispatch and the request-forwarding handlers.
//!
//! Three surfaces:
//! - `GET /` — small JSON status body
//! - `POST /v1/chat/completions` and `POST /v1/responses`, including their
//!   subpaths — the rewriting forwarder: model resolution on the way up, SSE
//!   normalization or JSON rewriting on the way down
//! - everything else — byte-for-byte passthrough to the upstream
//!
//! All responses carry permissive CORS headers. OPTIONS is answered locally:
//! preflights by the CORS layer, bare OPTIONS with an empty 204.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures_util::StreamExt;
use http_body_util::BodyExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};

use crate::policy::{extract_credential, redact, Policy};
use crate::proxy::error::ProxyError;
use crate::proxy::rewrite::rewrite_json_body;
use crate::proxy::upstream::UpstreamClient;
use crate::sse::SseNormalizer;

/// Shared per-process state: the immutable policy and the pooled client.
#[derive(Clone)]
pub struct GatewayState {
    policy: Arc<Policy>,
    upstream: Arc<UpstreamClient>,
}

impl GatewayState {
    pub fn new(policy: Arc<Policy>, upstream: Arc<UpstreamClient>) -> Self {
        Self { policy, upstream }
    }
}

/// Per-request state owned by the forwarding handler, discarded when the
/// response completes.
#[derive(Debug)]
struct RequestContext {
    client_model: Option<String>,
    credential: String,
    upstream_model: Option<String>,
    wants_stream: bool,
}

impl RequestContext {
    /// Derive the request context from the headers and the parsed body (if
    /// the body was valid JSON). Model resolution is skipped for opaque
    /// bodies; they are forwarded as-is.
    fn new(headers: &HeaderMap, body: Option<&Value>, policy: &Policy) -> Self {
        let credential = extract_credential(headers);
        let client_model = body
            .and_then(|json| json.get("model"))
            .and_then(Value::as_str)
            .map(String::from);
        let wants_stream = body
            .and_then(|json| json.get("stream"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let upstream_model =
            body.and_then(|_| policy.resolve(client_model.as_deref(), &credential));
        Self {
            client_model,
            credential,
            upstream_model,
            wants_stream,
        }
    }
}

pub fn build_router(state: GatewayState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Subpaths such as `/v1/responses/{id}/cancel` go through the same
    // rewriting forwarder as the bare endpoints.
    Router::new()
        .route("/", get(status_handler).options(options_handler))
        .route(
            "/v1/chat/completions",
            post(completion_handler).options(options_handler),
        )
        .route(
            "/v1/chat/completions/{*rest}",
            post(completion_handler).options(options_handler),
        )
        .route(
            "/v1/responses",
            post(completion_handler).options(options_handler),
        )
        .route(
            "/v1/responses/{*rest}",
            post(completion_handler).options(options_handler),
        )
        .fallback(passthrough_handler)
        .layer(cors)
        .with_state(state)
}

/// Answer a bare OPTIONS request locally; the CORS layer decorates it.
async fn options_handler() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Body of the `GET /` status route.
#[derive(Debug, Serialize)]
struct StatusBody {
    ok: bool,
    upstream: String,
}

async fn status_handler(State(state): State<GatewayState>) -> Response {
    let status = StatusBody {
        ok: true,
        upstream: state.upstream.base_url().to_string(),
    };
    (StatusCode::OK, axum::Json(status)).into_response()
}

async fn completion_handler(State(state): State<GatewayState>, req: Request) -> Response {
    match forward_completion(state, req).await {
        Ok(resp) => resp,
        Err(err) => {
            tracing::error!(error = %err, "completion request failed");
            err.into_response()
        }
    }
}

async fn passthrough_handler(State(state): State<GatewayState>, req: Request) -> Response {
    if req.method() == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }
    match forward_passthrough(state, req).await {
        Ok(resp) => resp,
        Err(err) => {
            tracing::error!(error = %err, "passthrough request failed");
            err.into_response()
        }
    }
}

/// The rewriting forwarder for chat/response endpoints.
///
/// Buffers the full inbound body (a deliberate trade favoring JSON rewriting
/// over unbounded-body backpressure), resolves the model, rewrites the
/// outbound body, then dispatches the upstream response by content type.
async fn forward_completion(state: GatewayState, req: Request) -> Result<Response, ProxyError> {
    let (parts, body) = req.into_parts();
    let body_bytes = body
        .collect()
        .await
        .map_err(|e| ProxyError::InvalidRequest(format!("failed to read request body: {e}")))?
        .to_bytes();

    // Non-object bodies (invalid JSON, arrays, scalars) are opaque: forwarded
    // unmodified, no resolution attempted.
    let parsed = serde_json::from_slice::<Value>(&body_bytes)
        .ok()
        .filter(Value::is_object);
    let ctx = RequestContext::new(&parts.headers, parsed.as_ref(), &state.policy);

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();

    tracing::info!(
        method = %parts.method,
        path = %path_and_query,
        stream = ctx.wants_stream,
        model = ctx.client_model.as_deref().unwrap_or("(none)"),
        mapped = ctx.upstream_model.as_deref().unwrap_or("(none)"),
        forced = state.policy.forced(&ctx.credential),
        auth = %redact(&ctx.credential),
        "forwarding completion request"
    );

    let outbound = match (parsed, ctx.upstream_model.as_deref()) {
        (Some(mut json), Some(model)) => {
            json["model"] = Value::String(model.to_string());
            match serde_json::to_vec(&json) {
                Ok(bytes) => Bytes::from(bytes),
                Err(_) => body_bytes,
            }
        }
        _ => body_bytes,
    };

    let resp = state
        .upstream
        .send(parts.method, &path_and_query, &parts.headers, outbound)
        .await?;

    let content_type = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    if ctx.wants_stream && content_type.contains("text/event-stream") {
        return stream_normalized(resp, ctx.client_model);
    }
    if ctx.client_model.is_some() && content_type.contains("application/json") {
        return rewrite_non_stream(resp, ctx.client_model.as_deref()).await;
    }
    passthrough_response(resp)
}

/// Generic proxy for routes that are not chat/response endpoints. The body
/// is streamed both ways; nothing is buffered or inspected.
async fn forward_passthrough(state: GatewayState, req: Request) -> Result<Response, ProxyError> {
    let (parts, body) = req.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();

    tracing::debug!(method = %parts.method, path = %path_and_query, "passthrough request");

    let body = reqwest::Body::wrap_stream(body.into_data_stream());
    let resp = state
        .upstream
        .send(parts.method, &path_and_query, &parts.headers, body)
        .await?;
    passthrough_response(resp)
}

/// Stream an upstream SSE response through the normalizer.
///
/// A pump task feeds upstream chunks into an [`SseNormalizer`] and sends each
/// completed event into a bounded channel that backs the response body. If
/// the downstream client disconnects, the channel send fails and the pump
/// returns, dropping the upstream response and cancelling it. If the upstream
/// errors mid-stream, the pump stops without the sentinel; a partial stream
/// is acceptable degraded behavior.
fn stream_normalized(
    resp: reqwest::Response,
    client_model: Option<String>,
) -> Result<Response, ProxyError> {
    let mut builder = Response::builder().status(resp.status());
    for (name, value) in resp.headers() {
        // Rewriting invalidates the upstream framing; the server re-frames.
        if name == CONTENT_LENGTH || name == TRANSFER_ENCODING {
            continue;
        }
        builder = builder.header(name, value);
    }

    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(16);
    let mut upstream = resp.bytes_stream();

    tokio::spawn(async move {
        let mut normalizer = SseNormalizer::new(client_model);
        while let Some(next) = upstream.next().await {
            let chunk = match next {
                Ok(chunk) => chunk,
                Err(err) => {
                    tracing::warn!(error = %err, "upstream stream error, closing partial stream");
                    return;
                }
            };
            for event in normalizer.feed(&chunk) {
                if tx.send(Ok(Bytes::from(event))).await.is_err() {
                    return;
                }
            }
        }
        for event in normalizer.finish() {
            if tx.send(Ok(Bytes::from(event))).await.is_err() {
                return;
            }
        }
        tracing::debug!(
            events = normalizer.events_forwarded(),
            saw_done = normalizer.saw_done(),
            "stream complete"
        );
    });

    Ok(builder.body(Body::from_stream(ReceiverStream::new(rx)))?)
}

/// Buffer a non-streaming JSON response, rewrite its model fields, and
/// recompute `Content-Length` to match.
async fn rewrite_non_stream(
    resp: reqwest::Response,
    client_model: Option<&str>,
) -> Result<Response, ProxyError> {
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = resp.bytes().await?;
    let body = rewrite_json_body(&body, client_model);

    let mut builder = Response::builder().status(status);
    for (name, value) in &headers {
        // Upstream framing (length or chunking) no longer applies to the
        // rewritten body; a stale Transfer-Encoding alongside the recomputed
        // Content-Length would make the response unwritable.
        if name == CONTENT_LENGTH || name == TRANSFER_ENCODING {
            continue;
        }
        builder = builder.header(name, value);
    }
    builder = builder.header(CONTENT_LENGTH, body.len());
    Ok(builder.body(Body::from(body))?)
}

/// Forward an upstream response byte-for-byte.
fn passthrough_response(resp: reqwest::Response) -> Result<Response, ProxyError> {
    let mut builder = Response::builder().status(resp.status());
    for (name, value) in resp.headers() {
        builder = builder.header(name, value);
    }
    Ok(builder.body(Body::from_stream(resp.bytes_stream()))?)
}
