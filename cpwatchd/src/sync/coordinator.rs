//! Guards every remote mutation against write-lock windows.
//!
//! While the board's drive is mounted by a USB host the device answers writes
//! with 409. The first conflict flips the coordinator to `Paused`, the
//! rejected write and every later one are queued, and a single monitor task
//! polls `/cp/diskinfo.json` until a disk reports writable again. The queue is
//! then drained in submission order; a conflict during the drain pauses again
//! with the rejected write back at the head of the queue.
//!
//! Deferred writes are fire-and-forget: the submitting caller only ever sees
//! [`WriteOutcome::Deferred`] and never learns how the eventual attempt went.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cpwatch_core::{WebWorkflowClient, WebWorkflowError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::queue::{PendingWrites, QueueError, WriteOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Active,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// Queued for a later attempt; the result of that attempt is not reported back.
    Deferred,
}

#[derive(Debug)]
struct Inner {
    state: CoordinatorState,
    queue: PendingWrites,
    // Set while the monitor replays the queue; new writes queue behind it.
    draining: bool,
    monitor_running: bool,
    monitor_starts: usize,
}

pub struct WriteCoordinator {
    client: WebWorkflowClient,
    poll_interval: Duration,
    cancel: CancellationToken,
    inner: Mutex<Inner>,
}

impl WriteCoordinator {
    pub fn new(
        client: WebWorkflowClient,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            poll_interval,
            cancel,
            inner: Mutex::new(Inner {
                state: CoordinatorState::Active,
                queue: PendingWrites::default(),
                draining: false,
                monitor_running: false,
                monitor_starts: 0,
            }),
        })
    }

    pub fn state(&self) -> CoordinatorState {
        self.lock().state
    }

    pub fn queued(&self) -> Vec<WriteOp> {
        self.lock().queue.snapshot()
    }

    pub fn queued_len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn monitor_starts(&self) -> usize {
        self.lock().monitor_starts
    }

    pub async fn put_file(
        self: &Arc<Self>,
        path: &str,
        content: Vec<u8>,
        timestamp_ms: Option<i64>,
    ) -> Result<WriteOutcome, WebWorkflowError> {
        self.submit(WriteOp::PutFile {
            path: path.to_string(),
            content,
            timestamp_ms,
        })
        .await
    }

    pub async fn put_directory(
        self: &Arc<Self>,
        path: &str,
        timestamp_ms: Option<i64>,
    ) -> Result<WriteOutcome, WebWorkflowError> {
        self.submit(WriteOp::PutDirectory {
            path: path.to_string(),
            timestamp_ms,
        })
        .await
    }

    pub async fn move_path(
        self: &Arc<Self>,
        from: &str,
        to: &str,
        is_dir: bool,
    ) -> Result<WriteOutcome, WebWorkflowError> {
        self.submit(WriteOp::Move {
            from: from.to_string(),
            to: to.to_string(),
            is_dir,
        })
        .await
    }

    pub async fn delete_path(
        self: &Arc<Self>,
        path: &str,
        is_dir: bool,
    ) -> Result<WriteOutcome, WebWorkflowError> {
        self.submit(WriteOp::Delete {
            path: path.to_string(),
            is_dir,
        })
        .await
    }

    pub async fn submit(self: &Arc<Self>, op: WriteOp) -> Result<WriteOutcome, WebWorkflowError> {
        {
            let mut inner = self.lock();
            if inner.state == CoordinatorState::Paused || inner.draining {
                inner.queue.enqueue(op);
                return Ok(WriteOutcome::Deferred);
            }
        }

        match apply(&self.client, &op).await {
            Ok(()) => Ok(WriteOutcome::Applied),
            Err(err) if err.is_write_conflict() => {
                let mut inner = self.lock();
                inner.queue.enqueue(op);
                self.pause(&mut inner);
                Ok(WriteOutcome::Deferred)
            }
            Err(err) => Err(err),
        }
    }

    fn pause(self: &Arc<Self>, inner: &mut Inner) {
        if inner.state != CoordinatorState::Paused {
            inner.state = CoordinatorState::Paused;
            warn!(
                action = "PAUSE",
                queued = inner.queue.len(),
                "device storage is write-locked (USB host active), waiting for writable"
            );
        }
        if inner.monitor_running {
            return;
        }
        inner.monitor_running = true;
        inner.monitor_starts += 1;
        let this = Arc::clone(self);
        tokio::spawn(async move { this.monitor().await });
    }

    async fn monitor(self: Arc<Self>) {
        loop {
            let writable = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.client.get_disk_info() => match result {
                    Ok(disks) => disks.iter().any(|disk| disk.writable),
                    Err(err) => {
                        warn!(error = %err, "disk status poll failed");
                        false
                    }
                },
            };

            if writable {
                {
                    let mut inner = self.lock();
                    inner.state = CoordinatorState::Active;
                    inner.draining = true;
                    info!(action = "RESUME", queued = inner.queue.len(), "device storage is writable");
                }
                let drained = tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    drained = self.drain() => drained,
                };
                if drained {
                    return;
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        let mut inner = self.lock();
        inner.monitor_running = false;
        inner.draining = false;
    }

    /// Returns `true` once the queue is empty, `false` if a conflict paused it again.
    async fn drain(self: &Arc<Self>) -> bool {
        loop {
            let op = {
                let mut inner = self.lock();
                match inner.queue.dequeue() {
                    Ok(op) => op,
                    Err(QueueError::Empty) => {
                        inner.draining = false;
                        inner.monitor_running = false;
                        return true;
                    }
                }
            };

            match apply(&self.client, &op).await {
                Ok(()) => info!(
                    action = op.action(),
                    path = op.target(),
                    reason = "deferred-write",
                    "applied queued write"
                ),
                Err(err) if err.is_write_conflict() => {
                    let mut inner = self.lock();
                    inner.queue.requeue_front(op);
                    inner.draining = false;
                    inner.state = CoordinatorState::Paused;
                    warn!(
                        action = "PAUSE",
                        queued = inner.queue.len(),
                        "write-locked again while draining"
                    );
                    return false;
                }
                Err(err) => error!(
                    action = "ERROR",
                    path = op.target(),
                    error = %err,
                    "queued write failed, dropping it"
                ),
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn apply(client: &WebWorkflowClient, op: &WriteOp) -> Result<(), WebWorkflowError> {
    match op {
        WriteOp::PutFile {
            path,
            content,
            timestamp_ms,
        } => client.put_file(path, content, *timestamp_ms).await,
        WriteOp::PutDirectory { path, timestamp_ms } => {
            client.put_directory(path, *timestamp_ms).await
        }
        WriteOp::Move { from, to, is_dir } => client.move_path(from, to, *is_dir).await,
        WriteOp::Delete { path, is_dir } => client.delete_path(path, *is_dir).await,
    }
}
