//! Upstream HTTP client.
//!
//! One pooled `reqwest` client is built at startup and shared by every
//! request. The client negotiates its own content encoding so that rewritten
//! JSON bodies are always readable.

use std::time::Duration;

use axum::http::header::{ACCEPT_ENCODING, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use axum::http::{HeaderMap, Method};
use reqwest::Client;

use crate::proxy::error::ProxyError;

/// Timeout and pool settings for the upstream connection.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutConfig {
    /// Time to establish the TCP connection.
    pub connect: Duration,
    /// Idle timeout for pooled connections.
    pub pool_idle: Duration,
    /// Max idle connections kept per host.
    pub pool_max_idle_per_host: usize,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            pool_idle: Duration::from_secs(90),
            pool_max_idle_per_host: 8,
        }
    }
}

pub struct UpstreamClient {
    client: Client,
    base_url: String,
}

impl UpstreamClient {
    /// Build the shared client. `base_url` must not end with a slash.
    pub fn new(base_url: String, timeouts: TimeoutConfig) -> Self {
        let client = Client::builder()
            .connect_timeout(timeouts.connect)
            .pool_idle_timeout(Some(timeouts.pool_idle))
            .pool_max_idle_per_host(timeouts.pool_max_idle_per_host)
            .build()
            .expect("Failed to build upstream client");

        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Forward a request to the upstream and return its raw response.
    ///
    /// Hop-by-hop framing headers are dropped: `Content-Length` is recomputed
    /// from the (possibly rewritten) body, and `Accept-Encoding` is left to
    /// the client so upstream bodies arrive decoded.
    pub async fn send(
        &self,
        method: Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: impl Into<reqwest::Body>,
    ) -> Result<reqwest::Response, ProxyError> {
        let url = format!("{}{}", self.base_url, path_and_query);
        let mut builder = self.client.request(method, &url);

        for (name, value) in headers {
            if name == HOST
                || name == CONTENT_LENGTH
                || name == TRANSFER_ENCODING
                || name == ACCEPT_ENCODING
            {
                continue;
            }
            builder = builder.header(name, value);
        }

        Ok(builder.body(body).send().await?)
    }
}
