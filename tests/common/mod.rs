//! Shared helpers for integration tests: a mock upstream server with queued
//! canned responses, and a gateway launcher.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, Request, Response, StatusCode};
use axum::routing::any;
use axum::Router;
use http_body_util::BodyExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;

use streamgate::policy::Policy;
use streamgate::proxy::{ProxyServer, ServerSettings};

/// One canned upstream response.
#[derive(Clone)]
pub struct MockResponse {
    pub status: StatusCode,
    pub content_type: &'static str,
    /// Body chunks written in order, one transport write per chunk.
    pub chunks: Vec<Vec<u8>>,
    /// Delay before each chunk, to force distinct reads on the gateway side.
    pub chunk_delay: Duration,
}

impl MockResponse {
    pub fn json(body: &str) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: "application/json",
            chunks: vec![body.as_bytes().to_vec()],
            chunk_delay: Duration::ZERO,
        }
    }

    /// A JSON body delivered across several transport writes, so the
    /// gateway sees a chunked response.
    pub fn json_chunks(chunks: &[&str]) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: "application/json",
            chunks: chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
            chunk_delay: Duration::from_millis(10),
        }
    }

    /// An SSE stream delivered with the given raw chunk boundaries.
    pub fn sse_chunks(chunks: &[&str]) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: "text/event-stream",
            chunks: chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
            chunk_delay: Duration::from_millis(10),
        }
    }

    pub fn text(content_type: &'static str, body: &str) -> Self {
        Self {
            status: StatusCode::OK,
            content_type,
            chunks: vec![body.as_bytes().to_vec()],
            chunk_delay: Duration::ZERO,
        }
    }
}

/// A request as seen by the mock upstream.
#[derive(Clone)]
pub struct ReceivedRequest {
    pub method: String,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Clone)]
struct MockState {
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    requests: Arc<Mutex<Vec<ReceivedRequest>>>,
}

pub struct MockUpstream {
    pub addr: SocketAddr,
    state: MockState,
}

impl MockUpstream {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = MockState {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        };
        let app = Router::new()
            .fallback(any(mock_handler))
            .with_state(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        wait_for_server(addr, Duration::from_secs(5)).await;
        Self { addr, state }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn enqueue(&self, response: MockResponse) {
        self.state.responses.lock().await.push_back(response);
    }

    pub async fn received(&self) -> Vec<ReceivedRequest> {
        self.state.requests.lock().await.clone()
    }
}

async fn mock_handler(State(state): State<MockState>, req: Request<Body>) -> Response<Body> {
    let (parts, body) = req.into_parts();
    let bytes = body
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .unwrap_or_default();
    state.requests.lock().await.push(ReceivedRequest {
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        headers: parts.headers.clone(),
        body: bytes,
    });

    let Some(canned) = state.responses.lock().await.pop_front() else {
        return Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::empty())
            .unwrap();
    };

    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(4);
    let chunks = canned.chunks.clone();
    let delay = canned.chunk_delay;
    tokio::spawn(async move {
        for chunk in chunks {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if tx.send(Ok(Bytes::from(chunk))).await.is_err() {
                return;
            }
        }
    });

    Response::builder()
        .status(canned.status)
        .header("content-type", canned.content_type)
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .unwrap()
}

/// Start a gateway on an ephemeral port in front of `upstream_url`.
pub async fn start_gateway(policy: Policy, upstream_url: &str) -> SocketAddr {
    let settings = ServerSettings {
        bind_addr: "127.0.0.1:0".to_string(),
        upstream_url: upstream_url.trim_end_matches('/').to_string(),
    };
    let mut server = ProxyServer::new(&settings, Arc::new(policy));
    let addr = server.try_bind().await.unwrap();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    wait_for_server(addr, Duration::from_secs(5)).await;
    addr
}

/// Poll until the server accepts connections, or panic after `timeout`.
pub async fn wait_for_server(addr: SocketAddr, timeout: Duration) {
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout {
        if TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("server at {addr} did not become ready within {timeout:?}");
}
