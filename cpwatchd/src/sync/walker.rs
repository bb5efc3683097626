use std::io::{self, ErrorKind};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use cpwatch_core::{FileEntry, WebWorkflowClient};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::decision::{PullReason, SyncDecision};
use super::engine::SyncError;
use super::ignore::IgnoreMatcher;
use super::paths::PathTranslator;
use super::self_writes::SelfWriteTracker;
use super::times::{ns_to_ms, set_mtime_from_ns, system_time_to_ms};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPolicy {
    /// Overwrite every local file; listing and fetch errors abort the walk.
    Unconditional,
    /// Fetch only missing or remote-newer files; errors are logged and skipped.
    Conditional,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WalkStats {
    pub directories: usize,
    pub pulled: usize,
    pub skipped: usize,
    pub vanished: usize,
    pub failed: usize,
}

/// Mirrors the remote tree into the local root. Never pushes and never
/// deletes; directory mtimes are left alone.
#[derive(Clone)]
pub struct RemoteTreeWalker {
    client: WebWorkflowClient,
    paths: PathTranslator,
    ignore: IgnoreMatcher,
    self_writes: Arc<SelfWriteTracker>,
}

impl RemoteTreeWalker {
    pub fn new(
        client: WebWorkflowClient,
        paths: PathTranslator,
        ignore: IgnoreMatcher,
        self_writes: Arc<SelfWriteTracker>,
    ) -> Self {
        Self {
            client,
            paths,
            ignore,
            self_writes,
        }
    }

    pub async fn walk(&self, policy: FetchPolicy) -> Result<WalkStats, SyncError> {
        let mut stats = WalkStats::default();
        let mut stack = vec!["/".to_string()];
        while let Some(dir) = stack.pop() {
            let listing = match self.list(&dir).await {
                Ok(Some(listing)) => listing,
                Ok(None) => {
                    debug!(path = %dir, "remote directory vanished during walk");
                    stats.vanished += 1;
                    continue;
                }
                Err(err) if policy == FetchPolicy::Conditional => {
                    warn!(action = "ERROR", path = %dir, error = %err, "failed to list remote directory");
                    stats.failed += 1;
                    continue;
                }
                Err(err) => return Err(err),
            };
            stats.directories += 1;

            for entry in listing {
                if self.ignore.is_ignored_name(&entry.name) {
                    continue;
                }
                if entry.is_directory {
                    stack.push(format!("{dir}{}/", entry.name));
                    continue;
                }
                let remote = format!("{dir}{}", entry.name);
                match self.sync_file(&remote, &entry, policy).await {
                    Ok(SyncDecision::PullRemote(_)) => stats.pulled += 1,
                    Ok(SyncDecision::SkipMissingRemoteDuringWalk) => stats.vanished += 1,
                    Ok(_) => stats.skipped += 1,
                    Err(err) if policy == FetchPolicy::Conditional => {
                        warn!(action = "ERROR", path = %remote, error = %err, "failed to pull remote file");
                        stats.failed += 1;
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(stats)
    }

    /// Sleeps `interval`, then runs a conditional walk, until cancelled.
    pub async fn poll(self, interval: Duration, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.walk(FetchPolicy::Conditional) => result,
            };
            match result {
                Ok(stats) if stats.pulled > 0 || stats.failed > 0 => {
                    info!(pulled = stats.pulled, failed = stats.failed, "remote poll finished")
                }
                Ok(_) => debug!("remote poll found nothing new"),
                Err(err) => warn!(error = %err, "remote poll failed"),
            }
        }
        debug!("remote poller stopped");
    }

    async fn list(&self, dir: &str) -> Result<Option<Vec<FileEntry>>, SyncError> {
        let local_dir = self.paths.to_local_path(dir)?;
        let listing = match self.client.list_directory(dir).await {
            Ok(listing) => listing,
            Err(err) if err.is_not_found() && dir != "/" => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        tokio::fs::create_dir_all(&local_dir).await?;
        Ok(Some(listing.files))
    }

    async fn sync_file(
        &self,
        remote: &str,
        entry: &FileEntry,
        policy: FetchPolicy,
    ) -> Result<SyncDecision, SyncError> {
        let local = self.paths.to_local_path(remote)?;
        let reason = match policy {
            FetchPolicy::Unconditional => PullReason::FullPull,
            FetchPolicy::Conditional => match tokio::fs::metadata(&local).await {
                Ok(meta) => {
                    let local_ms = system_time_to_ms(meta.modified()?);
                    if ns_to_ms(entry.modified_ns) <= local_ms {
                        return Ok(SyncDecision::Skip);
                    }
                    PullReason::RemoteNewer
                }
                Err(err) if err.kind() == ErrorKind::NotFound => PullReason::MissingLocal,
                Err(err) => return Err(err.into()),
            },
        };

        let bytes = match self.client.get_file(remote).await {
            Ok(bytes) => bytes,
            Err(err) if err.is_not_found() => {
                debug!(path = %remote, "remote file vanished during walk");
                return Ok(SyncDecision::SkipMissingRemoteDuringWalk);
            }
            Err(err) => return Err(err.into()),
        };
        materialize(&local, &bytes, entry.modified_ns, &self.self_writes).await?;
        info!(
            action = "PULL",
            path = %self.paths.display(&local),
            reason = reason.as_str(),
            "pulled remote file"
        );
        Ok(SyncDecision::PullRemote(reason))
    }
}

/// Writes pulled bytes and stamps the remote mtime. The path is registered as
/// a self-write both before and after so the watcher sees it as recent for
/// every notification the write produces.
pub(super) async fn materialize(
    local: &Path,
    bytes: &[u8],
    modified_ns: i64,
    self_writes: &SelfWriteTracker,
) -> io::Result<()> {
    if let Some(parent) = local.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    self_writes.register(local);
    tokio::fs::write(local, bytes).await?;
    set_mtime_from_ns(local, modified_ns)?;
    self_writes.register(local);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::test_support::{
        T_MS, client, dir_entry, file_entry, listing, mtime_ms, requests, set_mtime_ms,
    };
    use std::path::PathBuf;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const T_NS: i64 = T_MS * 1_000_000 + 999_999;

    fn walker(server: &MockServer, root: &Path) -> (RemoteTreeWalker, Arc<SelfWriteTracker>) {
        let self_writes = Arc::new(SelfWriteTracker::new());
        let walker = RemoteTreeWalker::new(
            client(server),
            PathTranslator::new(root).unwrap(),
            IgnoreMatcher::default(),
            Arc::clone(&self_writes),
        );
        (walker, self_writes)
    }

    async fn mount_get(server: &MockServer, at: &str, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(response)
            .mount(server)
            .await;
    }

    fn bytes(body: &[u8]) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_bytes(body.to_vec())
    }

    async fn mount_tree(server: &MockServer) {
        mount_get(
            server,
            "/fs/",
            listing(vec![
                file_entry("code.py", T_NS, 14),
                dir_entry("lib"),
                dir_entry(".git"),
                file_entry("notes.tmp", T_NS, 1),
                file_entry("gone.py", T_NS, 1),
            ]),
        )
        .await;
        mount_get(
            server,
            "/fs/lib/",
            listing(vec![file_entry("a.py", T_NS - 5_000_000_000, 2)]),
        )
        .await;
        mount_get(server, "/fs/code.py", bytes(b"print('hello')")).await;
        mount_get(server, "/fs/lib/a.py", bytes(b"a\n")).await;
        mount_get(server, "/fs/gone.py", ResponseTemplate::new(404)).await;
    }

    #[tokio::test]
    async fn full_pull_overwrites_and_stamps_every_file() {
        let server = MockServer::start().await;
        mount_tree(&server).await;
        let dir = tempdir().unwrap();
        let root = dir.path().join("CIRCUITPY");
        let stale = root.join("code.py");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(&stale, b"local edit that is newer").unwrap();
        set_mtime_ms(&stale, T_MS + 60_000);
        let (walker, self_writes) = walker(&server, &root);

        let stats = walker.walk(FetchPolicy::Unconditional).await.unwrap();

        assert_eq!(stats.directories, 2);
        assert_eq!(stats.pulled, 2);
        assert_eq!(stats.vanished, 1);
        assert_eq!(std::fs::read(&stale).unwrap(), b"print('hello')");
        assert_eq!(mtime_ms(&stale), T_MS);
        assert_eq!(std::fs::read(root.join("lib/a.py")).unwrap(), b"a\n");
        assert_eq!(mtime_ms(&root.join("lib/a.py")), T_MS - 5_000);
        assert!(!root.join(".git").exists());
        assert!(!root.join("notes.tmp").exists());
        assert!(!root.join("gone.py").exists());
        assert!(self_writes.is_recent(&stale));
        assert!(requests(&server, "GET").await.iter().all(|p| !p.contains(".git")));
    }

    #[tokio::test]
    async fn unconditional_walk_fails_when_listing_fails() {
        let server = MockServer::start().await;
        mount_get(&server, "/fs/", ResponseTemplate::new(500)).await;
        let dir = tempdir().unwrap();
        let (walker, _) = walker(&server, dir.path());

        let err = walker.walk(FetchPolicy::Unconditional).await.unwrap_err();

        assert!(matches!(err, SyncError::Api(_)));
    }

    #[tokio::test]
    async fn conditional_walk_fetches_missing_and_newer_only() {
        let server = MockServer::start().await;
        mount_get(
            &server,
            "/fs/",
            listing(vec![
                file_entry("code.py", T_NS, 14),
                file_entry("boot.py", T_NS, 3),
                file_entry("settings.toml", T_NS, 5),
            ]),
        )
        .await;
        mount_get(&server, "/fs/code.py", bytes(b"print('hello')")).await;
        mount_get(&server, "/fs/boot.py", bytes(b"new")).await;
        let dir = tempdir().unwrap();
        let root: PathBuf = dir.path().to_path_buf();
        std::fs::write(root.join("boot.py"), b"old").unwrap();
        set_mtime_ms(&root.join("boot.py"), T_MS - 1);
        // Local edits newer than the device are left for the change processor.
        std::fs::write(root.join("settings.toml"), b"local").unwrap();
        set_mtime_ms(&root.join("settings.toml"), T_MS + 1);
        let (walker, self_writes) = walker(&server, &root);

        let stats = walker.walk(FetchPolicy::Conditional).await.unwrap();

        assert_eq!(stats.pulled, 2);
        assert_eq!(stats.skipped, 1);
        let code = root.join("code.py");
        assert_eq!(std::fs::metadata(&code).unwrap().len(), 14);
        assert_eq!(mtime_ms(&code) / 1000, T_MS / 1000);
        assert!(self_writes.is_recent(&code));
        assert_eq!(std::fs::read(root.join("boot.py")).unwrap(), b"new");
        assert_eq!(std::fs::read(root.join("settings.toml")).unwrap(), b"local");
        assert!(requests(&server, "PUT").await.is_empty());
    }

    #[tokio::test]
    async fn conditional_walk_continues_past_failures() {
        let server = MockServer::start().await;
        mount_get(
            &server,
            "/fs/",
            listing(vec![
                dir_entry("broken"),
                file_entry("bad.py", T_NS, 1),
                file_entry("code.py", T_NS, 14),
            ]),
        )
        .await;
        mount_get(&server, "/fs/broken/", ResponseTemplate::new(500)).await;
        mount_get(&server, "/fs/bad.py", ResponseTemplate::new(500)).await;
        mount_get(&server, "/fs/code.py", bytes(b"print('hello')")).await;
        let dir = tempdir().unwrap();
        let (walker, _) = walker(&server, dir.path());

        let stats = walker.walk(FetchPolicy::Conditional).await.unwrap();

        assert_eq!(stats.failed, 2);
        assert_eq!(stats.pulled, 1);
        assert!(dir.path().join("code.py").exists());
    }

    #[tokio::test]
    async fn poller_pulls_remote_changes_until_cancelled() {
        let server = MockServer::start().await;
        mount_get(&server, "/fs/", listing(vec![file_entry("code.py", T_NS, 14)])).await;
        mount_get(&server, "/fs/code.py", bytes(b"print('hello')")).await;
        let dir = tempdir().unwrap();
        let target = dir.path().join("code.py");
        let (walker, _) = walker(&server, dir.path());
        let cancel = CancellationToken::new();

        let task = tokio::spawn(walker.poll(Duration::from_millis(20), cancel.clone()));
        let started = std::time::Instant::now();
        while std::fs::read(&target).ok().as_deref() != Some(b"print('hello')".as_slice())
            && started.elapsed() < Duration::from_secs(5)
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"print('hello')");
    }
}
