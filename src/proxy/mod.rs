pub mod error;
pub mod rewrite;
pub mod router;
pub mod server;
pub mod shutdown;
pub mod tracing;
pub mod upstream;

pub use server::{ProxyServer, ServerSettings};
pub use tracing::init_tracing;
