use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;
use tokio_util::time::delay_queue::Key;
use tracing::debug;

use super::processor::WorkItem;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebounceCommand {
    Touch(PathBuf),
    Forget(PathBuf),
}

/// Sender side of the debounce task. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DebounceHandle {
    tx: mpsc::UnboundedSender<DebounceCommand>,
}

impl DebounceHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DebounceCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Arms (or re-arms) the quiet-period deadline for `path`.
    pub fn touch(&self, path: PathBuf) -> bool {
        self.tx.send(DebounceCommand::Touch(path)).is_ok()
    }

    /// Drops the pending deadline for `path`, if any.
    pub fn forget(&self, path: PathBuf) -> bool {
        self.tx.send(DebounceCommand::Forget(path)).is_ok()
    }
}

/// Spawns the per-path debounce task.
///
/// Every touch pushes the path's deadline out by `quiet`; when a deadline
/// expires the path is forwarded once to `out` as [`WorkItem::Changed`].
/// Pending deadlines are dropped on cancellation so nothing fires into a
/// stopped consumer.
pub fn spawn_debouncer(
    quiet: Duration,
    out: mpsc::UnboundedSender<WorkItem>,
    cancel: CancellationToken,
) -> (DebounceHandle, JoinHandle<()>) {
    let (handle, mut rx) = DebounceHandle::channel();
    let task = tokio::spawn(async move {
        let mut deadlines: DelayQueue<PathBuf> = DelayQueue::new();
        let mut keys: HashMap<PathBuf, Key> = HashMap::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = rx.recv() => match command {
                    Some(DebounceCommand::Touch(path)) => match keys.get(&path) {
                        Some(key) => deadlines.reset(key, quiet),
                        None => {
                            let key = deadlines.insert(path.clone(), quiet);
                            keys.insert(path, key);
                        }
                    },
                    Some(DebounceCommand::Forget(path)) => {
                        if let Some(key) = keys.remove(&path) {
                            deadlines.remove(&key);
                        }
                    }
                    None => break,
                },
                Some(expired) = deadlines.next(), if !deadlines.is_empty() => {
                    let path = expired.into_inner();
                    keys.remove(&path);
                    if out.send(WorkItem::Changed(path)).is_err() {
                        break;
                    }
                }
            }
        }
        if !keys.is_empty() {
            debug!(pending = keys.len(), "dropping pending debounce deadlines");
        }
        deadlines.clear();
        keys.clear();
    });
    (handle, task)
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUIET: Duration = Duration::from_millis(500);

    fn setup() -> (
        DebounceHandle,
        mpsc::UnboundedReceiver<WorkItem>,
        CancellationToken,
        JoinHandle<()>,
    ) {
        let (out, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let (handle, task) = spawn_debouncer(QUIET, out, cancel.clone());
        (handle, rx, cancel, task)
    }

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<WorkItem>) -> Vec<WorkItem> {
        let mut items = Vec::new();
        while let Ok(item) = rx.try_recv() {
            items.push(item);
        }
        items
    }

    #[tokio::test(start_paused = true)]
    async fn burst_on_one_path_yields_one_item() {
        let (handle, mut rx, _cancel, _task) = setup();
        let path = PathBuf::from("/mirror/code.py");

        for _ in 0..5 {
            handle.touch(path.clone());
            settle().await;
            tokio::time::advance(Duration::from_millis(50)).await;
        }
        tokio::time::advance(QUIET).await;
        settle().await;

        assert_eq!(drain(&mut rx), vec![WorkItem::Changed(path)]);
    }

    #[tokio::test(start_paused = true)]
    async fn touch_resets_the_deadline() {
        let (handle, mut rx, _cancel, _task) = setup();
        let path = PathBuf::from("/mirror/boot.py");

        handle.touch(path.clone());
        settle().await;
        tokio::time::advance(Duration::from_millis(400)).await;
        handle.touch(path.clone());
        settle().await;
        tokio::time::advance(Duration::from_millis(400)).await;
        settle().await;
        assert!(drain(&mut rx).is_empty());

        tokio::time::advance(Duration::from_millis(150)).await;
        settle().await;
        assert_eq!(drain(&mut rx), vec![WorkItem::Changed(path)]);
    }

    #[tokio::test(start_paused = true)]
    async fn paths_are_debounced_independently() {
        let (handle, mut rx, _cancel, _task) = setup();
        handle.touch(PathBuf::from("/mirror/a.py"));
        handle.touch(PathBuf::from("/mirror/lib/b.py"));
        handle.touch(PathBuf::from("/mirror/a.py"));
        settle().await;
        tokio::time::advance(QUIET + Duration::from_millis(10)).await;
        settle().await;

        let mut items = drain(&mut rx);
        items.sort_by_key(|item| format!("{item:?}"));
        assert_eq!(
            items,
            vec![
                WorkItem::Changed(PathBuf::from("/mirror/a.py")),
                WorkItem::Changed(PathBuf::from("/mirror/lib/b.py")),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn forget_drops_only_that_path() {
        let (handle, mut rx, _cancel, _task) = setup();
        handle.touch(PathBuf::from("/mirror/a.py"));
        handle.touch(PathBuf::from("/mirror/b.py"));
        handle.forget(PathBuf::from("/mirror/a.py"));
        handle.forget(PathBuf::from("/mirror/never-touched.py"));
        settle().await;
        tokio::time::advance(QUIET + Duration::from_millis(10)).await;
        settle().await;

        assert_eq!(
            drain(&mut rx),
            vec![WorkItem::Changed(PathBuf::from("/mirror/b.py"))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_discards_pending_deadlines() {
        let (handle, mut rx, cancel, task) = setup();
        handle.touch(PathBuf::from("/mirror/code.py"));
        settle().await;

        cancel.cancel();
        task.await.unwrap();
        tokio::time::advance(QUIET * 2).await;

        assert!(drain(&mut rx).is_empty());
        assert!(!handle.touch(PathBuf::from("/mirror/code.py")));
    }
}
