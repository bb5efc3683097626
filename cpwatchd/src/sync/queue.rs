use std::collections::VecDeque;

use thiserror::Error;

/// A remote mutation held back while the device storage is write-locked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    PutFile {
        path: String,
        content: Vec<u8>,
        timestamp_ms: Option<i64>,
    },
    PutDirectory {
        path: String,
        timestamp_ms: Option<i64>,
    },
    Move {
        from: String,
        to: String,
        is_dir: bool,
    },
    Delete {
        path: String,
        is_dir: bool,
    },
}

impl WriteOp {
    pub fn action(&self) -> &'static str {
        match self {
            WriteOp::PutFile { .. } | WriteOp::PutDirectory { .. } => "PUSH",
            WriteOp::Move { .. } => "MOVE",
            WriteOp::Delete { .. } => "DELETE",
        }
    }

    pub fn target(&self) -> &str {
        match self {
            WriteOp::PutFile { path, .. }
            | WriteOp::PutDirectory { path, .. }
            | WriteOp::Delete { path, .. } => path,
            WriteOp::Move { to, .. } => to,
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("pending write queue is empty")]
    Empty,
}

/// FIFO of deferred writes.
#[derive(Debug, Default)]
pub struct PendingWrites {
    inner: VecDeque<WriteOp>,
}

impl PendingWrites {
    pub fn enqueue(&mut self, op: WriteOp) {
        self.inner.push_back(op);
    }

    /// Puts an operation back at the head so it keeps its place in line.
    pub fn requeue_front(&mut self, op: WriteOp) {
        self.inner.push_front(op);
    }

    pub fn dequeue(&mut self) -> Result<WriteOp, QueueError> {
        self.inner.pop_front().ok_or(QueueError::Empty)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn snapshot(&self) -> Vec<WriteOp> {
        self.inner.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(path: &str) -> WriteOp {
        WriteOp::PutFile {
            path: path.into(),
            content: Vec::new(),
            timestamp_ms: None,
        }
    }

    #[test]
    fn fifo_order_is_preserved() {
        let mut queue = PendingWrites::default();
        queue.enqueue(put("/a.py"));
        queue.enqueue(WriteOp::Delete {
            path: "/b.py".into(),
            is_dir: false,
        });

        assert_eq!(queue.dequeue().unwrap().target(), "/a.py");
        assert_eq!(queue.dequeue().unwrap().target(), "/b.py");
        assert!(queue.is_empty());
    }

    #[test]
    fn requeued_operation_goes_first() {
        let mut queue = PendingWrites::default();
        queue.enqueue(put("/second.py"));
        queue.requeue_front(put("/first.py"));

        let order: Vec<_> = queue
            .snapshot()
            .iter()
            .map(|op| op.target().to_string())
            .collect();
        assert_eq!(order, vec!["/first.py", "/second.py"]);
    }

    #[test]
    fn dequeue_on_empty_returns_error() {
        let mut queue = PendingWrites::default();
        assert!(matches!(queue.dequeue(), Err(QueueError::Empty)));
    }

    #[test]
    fn move_targets_destination() {
        let op = WriteOp::Move {
            from: "/old.py".into(),
            to: "/new.py".into(),
            is_dir: false,
        };
        assert_eq!(op.action(), "MOVE");
        assert_eq!(op.target(), "/new.py");
    }
}
