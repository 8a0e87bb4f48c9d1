//! Transparent HTTP gateway in front of a chat-completion API.
//!
//! The gateway reconstructs well-formed SSE framing from arbitrarily chunked
//! upstream streams, rewrites embedded model identifiers in-flight, and
//! applies a per-request model-resolution policy based on configuration and
//! the caller's presented credential.

pub mod policy;
pub mod proxy;
pub mod sse;
