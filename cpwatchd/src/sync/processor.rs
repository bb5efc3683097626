use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cpwatch_core::{FileEntry, WebWorkflowClient};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::coordinator::{WriteCoordinator, WriteOutcome};
use super::decision::{FileVersion, PullReason, PushReason, SyncDecision, decide_local_change};
use super::engine::SyncError;
use super::paths::{PathTranslator, remote_ancestors, remote_name, remote_parent};
use super::self_writes::SelfWriteTracker;
use super::times::{format_ms, system_time_to_ms};
use super::walker::materialize;

/// Unit of work for the serialized consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    Changed(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameOutcome {
    Moved,
    Deferred,
    /// The move was rejected and the file was re-uploaded under the new name.
    Copied,
}

pub struct LocalChangeProcessor {
    client: WebWorkflowClient,
    paths: PathTranslator,
    coordinator: Arc<WriteCoordinator>,
    self_writes: Arc<SelfWriteTracker>,
}

impl LocalChangeProcessor {
    pub fn new(
        client: WebWorkflowClient,
        paths: PathTranslator,
        coordinator: Arc<WriteCoordinator>,
        self_writes: Arc<SelfWriteTracker>,
    ) -> Self {
        Self {
            client,
            paths,
            coordinator,
            self_writes,
        }
    }

    /// Processes one item at a time until cancelled or the queue closes.
    /// Failures are logged per item and never stop the loop.
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<WorkItem>, cancel: CancellationToken) {
        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => break,
                item = rx.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.process(&item) => result,
            };
            if let Err(err) = result {
                let path = match &item {
                    WorkItem::Changed(path) => path,
                    WorkItem::Renamed { to, .. } => to,
                };
                error!(
                    action = "ERROR",
                    path = %self.paths.display(path),
                    error = %err,
                    "failed to process local change"
                );
            }
        }
        debug!("local change processor stopped");
    }

    pub async fn process(&self, item: &WorkItem) -> Result<(), SyncError> {
        match item {
            WorkItem::Changed(path) => self.handle_change(path).await.map(|_| ()),
            WorkItem::Renamed { from, to } => self.handle_rename(from, to).await.map(|_| ()),
        }
    }

    pub async fn handle_change(&self, local: &Path) -> Result<SyncDecision, SyncError> {
        let rel = self.paths.display(local);
        let meta = match tokio::fs::metadata(local).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(action = "SKIP", path = %rel, reason = "file-missing", "nothing to sync");
                return Ok(SyncDecision::SkipMissingLocal);
            }
            Err(err) => return Err(err.into()),
        };
        if meta.is_dir() {
            debug!(path = %rel, "directory change, skipping");
            return Ok(SyncDecision::Skip);
        }
        let local_version = FileVersion {
            modified_ms: system_time_to_ms(meta.modified()?),
            size: i64::try_from(meta.len()).unwrap_or(i64::MAX),
        };

        let remote = self.paths.to_remote_file_path(local)?;
        let entry = self.remote_entry(&remote).await?;
        let decision = decide_local_change(
            Some(local_version),
            entry.as_ref().map(FileVersion::from_remote),
        );

        match decision {
            SyncDecision::PushLocal(reason) => {
                if reason == PushReason::MissingRemote {
                    self.ensure_remote_dirs(&remote).await;
                }
                let content = tokio::fs::read(local).await?;
                let outcome = self
                    .coordinator
                    .put_file(&remote, content, Some(local_version.modified_ms))
                    .await?;
                info!(
                    action = "PUSH",
                    path = %rel,
                    reason = reason.as_str(),
                    deferred = outcome == WriteOutcome::Deferred,
                    "pushed local file"
                );
            }
            SyncDecision::PullRemote(reason) => {
                let Some(entry) = entry else {
                    return Ok(decision);
                };
                self.pull(local, &remote, &entry, reason).await?;
            }
            _ => {
                info!(
                    action = "SKIP",
                    path = %rel,
                    reason = "equal",
                    modified = %format_ms(local_version.modified_ms),
                    "already in sync"
                );
            }
        }
        Ok(decision)
    }

    pub async fn handle_rename(&self, from: &Path, to: &Path) -> Result<RenameOutcome, SyncError> {
        let is_dir = tokio::fs::metadata(to)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        let (from_remote, to_remote) = if is_dir {
            (
                self.paths.to_remote_directory_path(from)?,
                self.paths.to_remote_directory_path(to)?,
            )
        } else {
            (
                self.paths.to_remote_file_path(from)?,
                self.paths.to_remote_file_path(to)?,
            )
        };
        let rel = format!("{} -> {}", self.paths.display(from), self.paths.display(to));

        let source = match self.coordinator.move_path(&from_remote, &to_remote, is_dir).await {
            Ok(WriteOutcome::Applied) => {
                info!(action = "MOVE", path = %rel, reason = "local-rename", "moved remote entry");
                return Ok(RenameOutcome::Moved);
            }
            Ok(WriteOutcome::Deferred) => {
                info!(action = "MOVE", path = %rel, reason = "local-rename", deferred = true, "remote move queued");
                return Ok(RenameOutcome::Deferred);
            }
            Err(err) => err,
        };

        let is_file = tokio::fs::metadata(to)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        if is_dir || !is_file {
            return Err(SyncError::Rename {
                from: from_remote,
                to: to_remote,
                source,
            });
        }

        warn!(path = %rel, error = %source, "remote move failed, copying instead");
        self.ensure_remote_dirs(&to_remote).await;
        let meta = tokio::fs::metadata(to).await?;
        let content = tokio::fs::read(to).await?;
        self.coordinator
            .put_file(&to_remote, content, Some(system_time_to_ms(meta.modified()?)))
            .await?;
        match self.coordinator.delete_path(&from_remote, false).await {
            Ok(_) => {}
            Err(err) if err.is_not_found() => {
                debug!(path = %from_remote, "old remote entry already gone");
            }
            Err(err) => return Err(err.into()),
        }
        info!(action = "MOVE", path = %rel, reason = "fallback-put-delete", "copied remote entry");
        Ok(RenameOutcome::Copied)
    }

    async fn remote_entry(&self, remote_file: &str) -> Result<Option<FileEntry>, SyncError> {
        match self.client.list_directory(&remote_parent(remote_file)).await {
            Ok(listing) => Ok(listing.find(remote_name(remote_file)).cloned()),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn pull(
        &self,
        local: &Path,
        remote: &str,
        entry: &FileEntry,
        reason: PullReason,
    ) -> Result<(), SyncError> {
        let rel = self.paths.display(local);
        let bytes = match self.client.get_file(remote).await {
            Ok(bytes) => bytes,
            Err(err) if err.is_not_found() => {
                info!(action = "SKIP", path = %rel, reason = "remote-vanished", "nothing to pull");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        materialize(local, &bytes, entry.modified_ns, &self.self_writes).await?;
        info!(action = "PULL", path = %rel, reason = reason.as_str(), "pulled remote file");
        Ok(())
    }

    /// Creates every ancestor directory of `remote_file`. Failures are logged;
    /// the following file write reports the real problem if one remains.
    async fn ensure_remote_dirs(&self, remote_file: &str) {
        for dir in remote_ancestors(remote_file) {
            if let Err(err) = self.coordinator.put_directory(&dir, None).await {
                warn!(path = %dir, error = %err, "failed to create remote directory");
            }
        }
    }
}
