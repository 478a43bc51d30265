//! Editor-side change feed: watches one document on disk and coalesces bursts
//! of writes into a single "document text now is X" notification.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use flume::{Receiver, Sender};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::api::ApiClient;

/// Keeps the OS watcher alive; dropping it stops the change feed.
pub struct DocumentWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
}

impl DocumentWatcher {
    /// Watch `path` for writes. The parent directory is watched so editors that
    /// save by rename are still seen.
    pub fn start(path: &Path) -> Result<(Self, Receiver<()>)> {
        let path = path
            .canonicalize()
            .with_context(|| format!("Cannot watch {}", path.display()))?;
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .context("Watched document has no parent directory")?;

        let (tx, rx) = flume::unbounded();
        let target = path.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => forward_event(&target, &event, &tx),
                Err(e) => tracing::warn!("Watcher error: {}", e),
            },
            Config::default(),
        )
        .context("Failed to create file watcher")?;

        watcher
            .watch(&parent, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", parent.display()))?;
        tracing::info!("Watching {}", path.display());

        Ok((
            Self {
                path,
                _watcher: watcher,
            },
            rx,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn forward_event(target: &Path, event: &Event, tx: &Sender<()>) {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return;
    }
    if event.paths.iter().any(|p| is_same_file(p, target)) {
        let _ = tx.send(());
    }
}

fn is_same_file(candidate: &Path, target: &Path) -> bool {
    candidate == target
        || candidate
            .canonicalize()
            .map(|resolved| resolved == target)
            .unwrap_or(false)
}

/// Trailing-edge debounce over a change feed.
pub struct Debouncer {
    window: Duration,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    /// Wait for a change, then for `window` of quiet. Returns `false` once the
    /// feed is closed and nothing is pending.
    pub async fn settled(&self, changes: &Receiver<()>) -> bool {
        if changes.recv_async().await.is_err() {
            return false;
        }
        loop {
            match tokio::time::timeout(self.window, changes.recv_async()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) | Err(_) => return true,
            }
        }
    }
}

/// Post the document to the backend every time edits settle.
pub async fn forward_settled_changes(
    watcher: &DocumentWatcher,
    changes: Receiver<()>,
    debouncer: Debouncer,
    api: &ApiClient,
) -> Result<()> {
    while debouncer.settled(&changes).await {
        let text = match tokio::fs::read_to_string(watcher.path()).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", watcher.path().display(), e);
                continue;
            }
        };
        tracing::debug!("Document settled ({} chars)", text.chars().count());
        if let Err(e) = api.post_document(&text).await {
            tracing::warn!("Failed to forward document: {:#}", e);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};

    #[tokio::test]
    async fn burst_of_changes_settles_once() {
        let (tx, rx) = flume::unbounded();
        let debouncer = Debouncer::new(Duration::from_millis(50));

        let sender = tokio::spawn(async move {
            for _ in 0..5 {
                tx.send(()).unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
            drop(tx);
        });

        assert!(debouncer.settled(&rx).await);
        assert!(rx.is_empty());
        assert!(!debouncer.settled(&rx).await);
        sender.await.unwrap();
    }

    #[tokio::test]
    async fn closed_feed_flushes_pending_change() {
        let (tx, rx) = flume::unbounded();
        tx.send(()).unwrap();
        drop(tx);

        let debouncer = Debouncer::new(Duration::from_secs(60));
        assert!(debouncer.settled(&rx).await);
        assert!(!debouncer.settled(&rx).await);
    }

    #[test]
    fn only_writes_to_target_are_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("main.rs");
        std::fs::write(&target, "fn main() {}").unwrap();
        let target = target.canonicalize().unwrap();
        let other = dir.path().join("other.rs");

        let (tx, rx) = flume::unbounded();
        forward_event(
            &target,
            &Event::new(EventKind::Modify(ModifyKind::Any)).add_path(target.clone()),
            &tx,
        );
        forward_event(
            &target,
            &Event::new(EventKind::Create(CreateKind::File)).add_path(other),
            &tx,
        );
        forward_event(
            &target,
            &Event::new(EventKind::Remove(RemoveKind::File)).add_path(target.clone()),
            &tx,
        );

        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn missing_document_cannot_be_watched() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DocumentWatcher::start(&dir.path().join("nope.rs")).is_err());
    }
}
