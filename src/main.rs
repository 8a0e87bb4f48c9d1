use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use streamgate::policy::{parse_flag, parse_model_map, Policy};
use streamgate::proxy::{init_tracing, ProxyServer, ServerSettings};

/// Transparent gateway that normalizes upstream SSE streams and applies a
/// model-resolution policy per request.
#[derive(Debug, Parser)]
#[command(name = "streamgate", version)]
struct Cli {
    /// Address to listen on.
    #[arg(long, env = "STREAMGATE_LISTEN_ADDR", default_value = "127.0.0.1:8317")]
    listen: String,

    /// Upstream base URL requests are forwarded to.
    #[arg(long, env = "STREAMGATE_UPSTREAM_URL", default_value = "http://127.0.0.1:8318")]
    upstream: String,

    /// Model alias map: comma-separated `from=to` pairs.
    #[arg(long, env = "STREAMGATE_MODEL_MAP", default_value = "")]
    model_map: String,

    /// Model forced onto every request in force mode.
    #[arg(long, env = "STREAMGATE_FORCE_MODEL")]
    force_model: Option<String>,

    /// Credential that opts a caller into force mode.
    #[arg(long, env = "STREAMGATE_FORCE_KEY", default_value = "cursor-only")]
    force_key: String,

    /// Apply force mode to every request (1/true/yes).
    #[arg(long, env = "STREAMGATE_FORCE_ALL", default_value = "")]
    force_all: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let policy = Arc::new(Policy {
        model_map: parse_model_map(&cli.model_map),
        force_model: non_empty(cli.force_model.unwrap_or_default()),
        force_key: non_empty(cli.force_key),
        force_all: parse_flag(&cli.force_all),
    });
    let settings = ServerSettings {
        bind_addr: cli.listen,
        upstream_url: cli.upstream.trim_end_matches('/').to_string(),
    };

    let server = ProxyServer::new(&settings, policy);
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if let Err(err) = shutdown.wait_for_signal().await {
            tracing::error!(error = %err, "failed to listen for shutdown signals");
        }
    });

    server.run().await?;
    Ok(())
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
