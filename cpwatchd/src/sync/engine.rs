use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cpwatch_core::{WebWorkflowClient, WebWorkflowError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::coordinator::WriteCoordinator;
use super::debounce::spawn_debouncer;
use super::ignore::IgnoreMatcher;
use super::local_watcher::{LocalEventRouter, start_notify_watcher};
use super::paths::{PathError, PathTranslator};
use super::processor::LocalChangeProcessor;
use super::self_writes::SelfWriteTracker;
use super::walker::{FetchPolicy, RemoteTreeWalker, WalkStats};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("device api error: {0}")]
    Api(#[from] WebWorkflowError),
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),
    #[error("rename {from} -> {to} failed: {source}")]
    Rename {
        from: String,
        to: String,
        #[source]
        source: WebWorkflowError,
    },
    #[error("refusing to wipe {0:?}: not a dedicated mirror directory")]
    UnsafeRoot(PathBuf),
}

#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
    pub remote_poll_interval: Duration,
    pub writable_poll_interval: Duration,
    pub debounce: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            remote_poll_interval: Duration::from_secs(120),
            writable_poll_interval: Duration::from_secs(5),
            debounce: Duration::from_millis(500),
        }
    }
}

/// One synchronization run against one device. Owns the self-write ledger and
/// the write coordinator; nothing is shared with other runs.
pub struct SyncEngine {
    client: WebWorkflowClient,
    paths: PathTranslator,
    ignore: IgnoreMatcher,
    self_writes: Arc<SelfWriteTracker>,
    coordinator: Arc<WriteCoordinator>,
    settings: SyncSettings,
    cancel: CancellationToken,
}

impl SyncEngine {
    pub fn new(
        client: WebWorkflowClient,
        local_root: &Path,
        settings: SyncSettings,
        cancel: CancellationToken,
    ) -> Result<Self, SyncError> {
        let paths = PathTranslator::new(local_root)?;
        let coordinator =
            WriteCoordinator::new(client.clone(), settings.writable_poll_interval, cancel.clone());
        Ok(Self {
            client,
            paths,
            ignore: IgnoreMatcher::default(),
            self_writes: Arc::new(SelfWriteTracker::new()),
            coordinator,
            settings,
            cancel,
        })
    }

    pub fn with_ignore(mut self, ignore: IgnoreMatcher) -> Self {
        self.ignore = ignore;
        self
    }

    pub fn local_root(&self) -> &Path {
        self.paths.root()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn walker(&self) -> RemoteTreeWalker {
        RemoteTreeWalker::new(
            self.client.clone(),
            self.paths.clone(),
            self.ignore.clone(),
            Arc::clone(&self.self_writes),
        )
    }

    /// Wipes the local mirror and pulls the whole device tree into it.
    pub async fn bootstrap(&self) -> Result<WalkStats, SyncError> {
        let root = self.paths.root();
        check_wipe_target(root).await?;
        match tokio::fs::remove_dir_all(root).await {
            Ok(()) => info!(root = %root.display(), "cleared local mirror"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        tokio::fs::create_dir_all(root).await?;

        let stats = self.walker().walk(FetchPolicy::Unconditional).await?;
        info!(
            directories = stats.directories,
            pulled = stats.pulled,
            vanished = stats.vanished,
            "full pull complete"
        );
        Ok(stats)
    }

    /// Watches the local root and polls the device until the cancel token fires.
    pub async fn run(&self) -> Result<(), SyncError> {
        let (watcher, events) = start_notify_watcher(self.paths.root())?;
        let (work_tx, work_rx) = mpsc::unbounded_channel();

        let (debounce, debounce_task) =
            spawn_debouncer(self.settings.debounce, work_tx.clone(), self.cancel.clone());
        let router = LocalEventRouter::new(
            self.paths.clone(),
            self.ignore.clone(),
            Arc::clone(&self.self_writes),
            debounce,
            work_tx,
        );
        let router_task = tokio::spawn(router.run(events, self.cancel.clone()));

        let processor = LocalChangeProcessor::new(
            self.client.clone(),
            self.paths.clone(),
            Arc::clone(&self.coordinator),
            Arc::clone(&self.self_writes),
        );
        let processor_task = tokio::spawn(processor.run(work_rx, self.cancel.clone()));

        let poller_task = tokio::spawn(
            self.walker()
                .poll(self.settings.remote_poll_interval, self.cancel.clone()),
        );

        info!(
            root = %self.paths.root().display(),
            debounce_ms = self.settings.debounce.as_millis() as u64,
            poll_secs = self.settings.remote_poll_interval.as_secs(),
            "watching for changes"
        );

        self.cancel.cancelled().await;
        drop(watcher);
        for (name, task) in [
            ("watcher", router_task),
            ("debouncer", debounce_task),
            ("processor", processor_task),
            ("poller", poller_task),
        ] {
            if let Err(err) = task.await {
                warn!(task = name, error = %err, "sync task ended abnormally");
            }
        }
        info!("sync engine stopped");
        Ok(())
    }
}

/// Rejects a mirror root whose removal would also take the filesystem root,
/// the home directory or the working directory with it.
async fn check_wipe_target(root: &Path) -> Result<(), SyncError> {
    if root.parent().is_none() {
        return Err(SyncError::UnsafeRoot(root.to_path_buf()));
    }
    let resolved = match tokio::fs::canonicalize(root).await {
        Ok(resolved) => resolved,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    if resolved.parent().is_none() {
        return Err(SyncError::UnsafeRoot(root.to_path_buf()));
    }
    let protected = [dirs::home_dir(), std::env::current_dir().ok()];
    for dir in protected.into_iter().flatten() {
        let dir = tokio::fs::canonicalize(&dir).await.unwrap_or(dir);
        if dir.starts_with(&resolved) {
            return Err(SyncError::UnsafeRoot(root.to_path_buf()));
        }
    }
    Ok(())
}
