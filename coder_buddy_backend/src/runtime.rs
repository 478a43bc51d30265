use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use flume::{Receiver, Sender};
use tokio::task::JoinHandle;

use crate::agent::reasoning::ReasoningClient;
use crate::agent::{Companion, CompanionEvent};
use crate::config::CompanionConfig;
use crate::credentials::{CredentialStore, FileCredentialStore, InMemoryCredentialStore};
use crate::dispatch::ResultDispatcher;
use crate::http_client::build_http_client;
use crate::llm_client::{CompletionBackend, LlmClient};

pub struct BackendRuntime {
    pub config: CompanionConfig,
    pub companion: Arc<Companion>,
    pub credentials: Arc<dyn CredentialStore>,
    pub event_tx: Sender<CompanionEvent>,
}

pub struct BackendRuntimeBuilder {
    config: CompanionConfig,
    event_tx: Sender<CompanionEvent>,
    backend: Option<Arc<dyn CompletionBackend>>,
    credentials: Option<Arc<dyn CredentialStore>>,
}

impl BackendRuntimeBuilder {
    pub fn new(config: CompanionConfig, event_tx: Sender<CompanionEvent>) -> Self {
        Self {
            config,
            event_tx,
            backend: None,
            credentials: None,
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn CompletionBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn build(self) -> Result<BackendRuntime> {
        let config = self.config;

        let backend = match self.backend {
            Some(backend) => backend,
            None => {
                let http = build_http_client(config.request_timeout_secs.map(Duration::from_secs))
                    .context("failed to build completion HTTP client")?;
                let client = LlmClient::new(
                    config.llm_api_url.clone(),
                    config.llm_model.clone(),
                    Some(config.max_reply_tokens),
                    http,
                );
                tracing::info!(
                    "Completion backend: {} (model {})",
                    config.llm_api_url,
                    client.model()
                );
                Arc::new(client)
            }
        };

        let credentials = self
            .credentials
            .unwrap_or_else(|| default_credential_store(&config));

        let reasoning = Arc::new(ReasoningClient::new(
            backend,
            credentials.clone(),
            &config,
        ));
        let dispatcher = Arc::new(ResultDispatcher::default());
        let companion = Arc::new(Companion::new(&config, reasoning, dispatcher));

        Ok(BackendRuntime {
            config,
            companion,
            credentials,
            event_tx: self.event_tx,
        })
    }
}

impl BackendRuntime {
    pub fn bootstrap(config: CompanionConfig, event_tx: Sender<CompanionEvent>) -> Result<Self> {
        BackendRuntimeBuilder::new(config, event_tx).build()
    }

    pub fn spawn_companion_loop(&self, events: Receiver<CompanionEvent>) -> JoinHandle<()> {
        let companion = self.companion.clone();
        tokio::spawn(async move {
            if let Err(e) = companion.run_loop(events).await {
                tracing::error!("Companion loop error: {}", e);
            }
        })
    }
}

fn default_credential_store(config: &CompanionConfig) -> Arc<dyn CredentialStore> {
    match config.llm_api_key.as_deref() {
        Some(key) if !key.trim().is_empty() => {
            tracing::info!("Using API key from config/environment (not persisted)");
            Arc::new(InMemoryCredentialStore::with_key(key))
        }
        _ => {
            let path = config.resolved_credentials_path();
            tracing::info!("Using credential file {:?}", path);
            Arc::new(FileCredentialStore::new(path))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn config_key_seeds_in_memory_store() {
        let config = CompanionConfig {
            llm_api_key: Some("sk-config".to_string()),
            ..CompanionConfig::default()
        };
        let (tx, _rx) = flume::unbounded();
        let runtime = BackendRuntime::bootstrap(config, tx).unwrap();

        assert_eq!(
            runtime.credentials.get_key().await.unwrap().as_deref(),
            Some("sk-config")
        );
    }

    #[tokio::test]
    async fn file_store_used_without_config_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds.toml");
        let config = CompanionConfig {
            credentials_path: Some(path.to_string_lossy().to_string()),
            ..CompanionConfig::default()
        };
        let (tx, _rx) = flume::unbounded();
        let runtime = BackendRuntime::bootstrap(config, tx).unwrap();

        runtime.credentials.store_key("sk-file").await.unwrap();
        assert!(path.exists());
        assert!(runtime.companion.status().await.credential_present);
    }
}
