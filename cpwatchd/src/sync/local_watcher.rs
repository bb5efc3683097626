use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::debounce::DebounceHandle;
use super::ignore::IgnoreMatcher;
use super::paths::PathTranslator;
use super::processor::WorkItem;
use super::self_writes::SelfWriteTracker;

/// Raw filesystem notification, with absolute local paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalEvent {
    Changed(PathBuf),
    Created(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
    Deleted(PathBuf),
}

pub fn start_notify_watcher(
    root: &Path,
) -> notify::Result<(RecommendedWatcher, mpsc::UnboundedReceiver<LocalEvent>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            for local in map_event(event) {
                let _ = tx.send(local);
            }
        }
        Err(err) => warn!(error = %err, "filesystem watcher error"),
    })?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    Ok((watcher, rx))
}

fn map_event(event: Event) -> Vec<LocalEvent> {
    match event.kind {
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => event.paths.into_iter().map(LocalEvent::Deleted).collect(),
            RenameMode::To => event.paths.into_iter().map(LocalEvent::Created).collect(),
            _ if event.paths.len() >= 2 => {
                let mut paths = event.paths.into_iter();
                match (paths.next(), paths.next()) {
                    (Some(from), Some(to)) => vec![LocalEvent::Renamed { from, to }],
                    _ => Vec::new(),
                }
            }
            _ => event.paths.into_iter().map(LocalEvent::Changed).collect(),
        },
        EventKind::Create(_) => event.paths.into_iter().map(LocalEvent::Created).collect(),
        EventKind::Modify(_) => event.paths.into_iter().map(LocalEvent::Changed).collect(),
        EventKind::Remove(_) => event.paths.into_iter().map(LocalEvent::Deleted).collect(),
        _ => Vec::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Ignored,
    Suppressed,
    Debounced,
    Queued,
    DeletionSkipped,
}

/// Filters raw notifications and hands them to the debouncer or the
/// serialized work queue.
pub struct LocalEventRouter {
    paths: PathTranslator,
    ignore: IgnoreMatcher,
    self_writes: Arc<SelfWriteTracker>,
    debounce: DebounceHandle,
    work: mpsc::UnboundedSender<WorkItem>,
}

impl LocalEventRouter {
    pub fn new(
        paths: PathTranslator,
        ignore: IgnoreMatcher,
        self_writes: Arc<SelfWriteTracker>,
        debounce: DebounceHandle,
        work: mpsc::UnboundedSender<WorkItem>,
    ) -> Self {
        Self {
            paths,
            ignore,
            self_writes,
            debounce,
            work,
        }
    }

    pub async fn run(self, mut events: mpsc::UnboundedReceiver<LocalEvent>, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            let outcome = self.route(event.clone());
            debug!(?event, ?outcome, "routed local event");
        }
    }

    pub fn route(&self, event: LocalEvent) -> RouteOutcome {
        match event {
            LocalEvent::Changed(path) | LocalEvent::Created(path) => self.debounce_change(path),
            LocalEvent::Renamed { from, to } => {
                let root = self.paths.root();
                if self.ignore.is_ignored(root, &to) {
                    return RouteOutcome::Ignored;
                }
                if self.ignore.is_ignored(root, &from) {
                    // e.g. an editor swap file renamed over the real one
                    return self.debounce_change(to);
                }
                if is_symlink(&to) {
                    return RouteOutcome::Ignored;
                }
                // The unpaired `To` half of this rename may still be waiting in the debouncer.
                self.debounce.forget(to.clone());
                if self.work.send(WorkItem::Renamed { from, to }).is_err() {
                    warn!("work queue closed, dropping rename");
                }
                RouteOutcome::Queued
            }
            LocalEvent::Deleted(path) => {
                if self.ignore.is_ignored(self.paths.root(), &path) {
                    return RouteOutcome::Ignored;
                }
                info!(
                    action = "SKIP",
                    path = %self.paths.display(&path),
                    reason = "local-delete-not-propagated",
                    "local deletion observed"
                );
                RouteOutcome::DeletionSkipped
            }
        }
    }

    fn debounce_change(&self, path: PathBuf) -> RouteOutcome {
        if self.ignore.is_ignored(self.paths.root(), &path) || is_symlink(&path) {
            return RouteOutcome::Ignored;
        }
        if self.self_writes.is_recent(&path) {
            return RouteOutcome::Suppressed;
        }
        if !self.debounce.touch(path) {
            warn!("debouncer stopped, dropping change");
        }
        RouteOutcome::Debounced
    }
}

fn is_symlink(path: &Path) -> bool {
    std::fs::symlink_metadata(path)
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false)
}
