use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

pub const SELF_WRITE_TTL: Duration = Duration::from_secs(2);

/// Short-lived ledger of local paths the engine itself just wrote.
///
/// Filesystem notifications for a recent entry are dropped before debouncing,
/// which keeps a pulled file from being pushed straight back. One tracker is
/// owned per engine run.
#[derive(Debug)]
pub struct SelfWriteTracker {
    ttl: Duration,
    stamps: Mutex<HashMap<PathBuf, Instant>>,
}

impl SelfWriteTracker {
    pub fn new() -> Self {
        Self::with_ttl(SELF_WRITE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            stamps: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, path: &Path) {
        self.stamps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf(), Instant::now());
    }

    /// Expired stamps are dropped on lookup.
    pub fn is_recent(&self, path: &Path) -> bool {
        let mut stamps = self.stamps.lock().unwrap_or_else(PoisonError::into_inner);
        match stamps.get(path) {
            Some(stamp) if stamp.elapsed() < self.ttl => true,
            Some(_) => {
                stamps.remove(path);
                false
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.stamps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SelfWriteTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn recent_until_two_second_boundary() {
        let tracker = SelfWriteTracker::new();
        let path = Path::new("/mirror/code.py");
        tracker.register(path);

        tokio::time::advance(Duration::from_millis(1900)).await;
        assert!(tracker.is_recent(path));

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(!tracker.is_recent(path));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_removed_on_lookup() {
        let tracker = SelfWriteTracker::new();
        let path = Path::new("/mirror/lib/a.py");
        tracker.register(path);
        assert_eq!(tracker.len(), 1);

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(!tracker.is_recent(path));
        assert!(tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn register_refreshes_the_stamp() {
        let tracker = SelfWriteTracker::new();
        let path = Path::new("/mirror/boot.py");
        tracker.register(path);
        tokio::time::advance(Duration::from_millis(1500)).await;
        tracker.register(path);
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!(tracker.is_recent(path));
    }

    #[test]
    fn unknown_paths_are_not_recent() {
        let tracker = SelfWriteTracker::new();
        assert!(!tracker.is_recent(Path::new("/mirror/never.py")));
    }

    #[tokio::test]
    async fn separate_trackers_do_not_share_state() {
        let first = SelfWriteTracker::new();
        let second = SelfWriteTracker::new();
        first.register(Path::new("/mirror/code.py"));
        assert!(!second.is_recent(Path::new("/mirror/code.py")));
    }
}
