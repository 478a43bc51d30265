use anyhow::{Context, Result};
use coder_buddy_backend::config::CompanionConfig;
use coder_buddy_backend::runtime::BackendRuntime;
use coder_buddy_backend::server::serve_backend;
use flume::unbounded;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,coder_buddy_backend=debug")),
        )
        .init();

    let config = CompanionConfig::load();
    if std::env::args().skip(1).any(|arg| arg == "--write-config") {
        let path = config.save().context("failed to write config")?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    let (event_tx, event_rx) = unbounded();
    let runtime = BackendRuntime::bootstrap(config, event_tx)
        .context("failed to bootstrap backend runtime")?;

    tracing::info!(
        "Starting Coder Buddy backend (set CODER_BUDDY_BACKEND_TOKEN + optional CODER_BUDDY_BACKEND_BIND; auth mode via CODER_BUDDY_BACKEND_AUTH_MODE)"
    );

    let server_rt = tokio::runtime::Runtime::new().context("failed to start server runtime")?;
    server_rt.block_on(serve_backend(runtime, event_rx))
}
