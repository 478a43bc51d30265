mod api;
mod presenter;
mod watcher;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use api::ApiClient;
use presenter::Presenter;
use watcher::{forward_settled_changes, Debouncer, DocumentWatcher};

#[derive(Parser)]
#[command(name = "coder_buddy")]
#[command(about = "Editor-side client for the Coder Buddy backend", long_about = None)]
struct Cli {
    /// Backend base URL
    #[arg(long, env = "CODER_BUDDY_BACKEND_URL", default_value = "http://127.0.0.1:8797")]
    backend: String,

    /// Bearer token for the backend API
    #[arg(long, env = "CODER_BUDDY_BACKEND_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Watch a document and show the companion's reactions
    Watch {
        /// Document to watch
        path: PathBuf,

        /// Quiet period before a change is forwarded
        #[arg(long, default_value_t = 1000)]
        debounce_ms: u64,
    },
    /// Store the reasoning service API key in the backend
    SetKey { key: String },
    /// Delete the stored API key
    DeleteKey,
    /// Print trigger state and memory usage
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,coder_buddy=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let api = ApiClient::new(cli.backend, cli.token);
    tracing::debug!("Backend API: {}", api.base_url());

    match cli.command {
        Command::Watch { path, debounce_ms } => watch(api, path, debounce_ms).await,
        Command::SetKey { key } => {
            api.store_key(&key).await?;
            println!("API key stored.");
            Ok(())
        }
        Command::DeleteKey => {
            api.delete_key().await?;
            println!("API key deleted.");
            Ok(())
        }
        Command::Status => {
            let status = api.status().await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&status).context("Failed to format status")?
            );
            Ok(())
        }
    }
}

async fn watch(api: ApiClient, path: PathBuf, debounce_ms: u64) -> Result<()> {
    let (document, changes) = DocumentWatcher::start(&path)?;

    let (events_tx, events_rx) = flume::unbounded();
    tokio::spawn(api.clone().stream_events_forever(events_tx));

    tokio::spawn(async move {
        let mut presenter = Presenter::new(std::io::stdout().is_terminal());
        println!("{}", presenter.render());
        while let Ok(message) = events_rx.recv_async().await {
            presenter.apply(message);
            println!("{}", presenter.render());
        }
    });

    let debouncer = Debouncer::new(Duration::from_millis(debounce_ms));
    tokio::select! {
        result = forward_settled_changes(&document, changes, debouncer, &api) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Stopping watcher");
            Ok(())
        }
    }
}
