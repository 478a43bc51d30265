//! API key storage consumed by the reasoning client.
//!
//! The core only ever calls [`CredentialStore::get_key`]; storing and deleting
//! are driven by the backend's `/v1/credentials` route.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns `None` when no usable (non-blank) key is stored.
    async fn get_key(&self) -> Result<Option<String>>;

    async fn store_key(&self, value: &str) -> Result<()>;

    async fn delete_key(&self) -> Result<()>;
}

fn normalize_key(value: Option<String>) -> Option<String> {
    value
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
}

/// Process-local store, seeded from `LLM_API_KEY` or the config file.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    key: RwLock<Option<String>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(key: impl Into<String>) -> Self {
        Self {
            key: RwLock::new(normalize_key(Some(key.into()))),
        }
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get_key(&self) -> Result<Option<String>> {
        Ok(self.key.read().await.clone())
    }

    async fn store_key(&self, value: &str) -> Result<()> {
        *self.key.write().await = normalize_key(Some(value.to_string()));
        Ok(())
    }

    async fn delete_key(&self) -> Result<()> {
        *self.key.write().await = None;
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredSecrets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    openai_api_key: Option<String>,
}

/// TOML file under the user's config dir, readable by the owner only.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_secrets(&self) -> Result<StoredSecrets> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse credential file {:?}", self.path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoredSecrets::default()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to read credential file {:?}", self.path)),
        }
    }

    async fn write_secrets(&self, secrets: &StoredSecrets) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(secrets).context("Failed to serialize secrets")?;
        tokio::fs::write(&self.path, contents)
            .await
            .with_context(|| format!("Failed to write credential file {:?}", self.path))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .await
                .with_context(|| format!("Failed to restrict permissions on {:?}", self.path))?;
        }

        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn get_key(&self) -> Result<Option<String>> {
        let secrets = self.read_secrets().await?;
        Ok(normalize_key(secrets.openai_api_key))
    }

    async fn store_key(&self, value: &str) -> Result<()> {
        let mut secrets = self.read_secrets().await?;
        secrets.openai_api_key = normalize_key(Some(value.to_string()));
        self.write_secrets(&secrets).await?;
        tracing::info!("Stored API key in {:?}", self.path);
        Ok(())
    }

    async fn delete_key(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::info!("Deleted credential file {:?}", self.path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to delete credential file {:?}", self.path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("nested").join("creds.toml"));

        assert_eq!(store.get_key().await.unwrap(), None);

        store.store_key("  sk-test-123  ").await.unwrap();
        assert_eq!(store.get_key().await.unwrap().as_deref(), Some("sk-test-123"));

        store.delete_key().await.unwrap();
        assert_eq!(store.get_key().await.unwrap(), None);
        // Deleting twice is fine.
        store.delete_key().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_store_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("creds.toml"));
        store.store_key("sk-abc").await.unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn blank_key_in_file_counts_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds.toml");
        std::fs::write(&path, "openai_api_key = \"   \"\n").unwrap();

        let store = FileCredentialStore::new(path);
        assert_eq!(store.get_key().await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds.toml");
        std::fs::write(&path, "this is = = not toml").unwrap();

        let store = FileCredentialStore::new(path);
        assert!(store.get_key().await.is_err());
    }

    #[tokio::test]
    async fn in_memory_store_behaves_like_a_single_slot() {
        let store = InMemoryCredentialStore::new();
        assert_eq!(store.get_key().await.unwrap(), None);

        store.store_key("sk-1").await.unwrap();
        assert_eq!(store.get_key().await.unwrap().as_deref(), Some("sk-1"));

        store.delete_key().await.unwrap();
        assert_eq!(store.get_key().await.unwrap(), None);

        let seeded = InMemoryCredentialStore::with_key("");
        assert_eq!(seeded.get_key().await.unwrap(), None);
    }
}
