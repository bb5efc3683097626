use cpwatch_core::FileEntry;

use super::times::ns_to_ms;

/// `(modified, size)` pair compared on both sides, at millisecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileVersion {
    pub modified_ms: i64,
    pub size: i64,
}

impl FileVersion {
    pub fn from_remote(entry: &FileEntry) -> Self {
        Self {
            modified_ms: ns_to_ms(entry.modified_ns),
            size: entry.file_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushReason {
    MissingRemote,
    LocalNewerOrSizeDiff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullReason {
    MissingLocal,
    RemoteNewer,
    FullPull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    PushLocal(PushReason),
    PullRemote(PullReason),
    Skip,
    SkipMissingLocal,
    SkipMissingRemoteDuringWalk,
}

impl PushReason {
    pub fn as_str(self) -> &'static str {
        match self {
            PushReason::MissingRemote => "missing-remote",
            PushReason::LocalNewerOrSizeDiff => "local-newer|size-diff",
        }
    }
}

impl PullReason {
    pub fn as_str(self) -> &'static str {
        match self {
            PullReason::MissingLocal => "missing-local",
            PullReason::RemoteNewer => "remote-newer",
            PullReason::FullPull => "full-pull",
        }
    }
}

/// Decision for a local change event. Newer modification time wins; a size
/// difference alone is enough to push.
pub fn decide_local_change(local: Option<FileVersion>, remote: Option<FileVersion>) -> SyncDecision {
    let Some(local) = local else {
        return SyncDecision::SkipMissingLocal;
    };
    let Some(remote) = remote else {
        return SyncDecision::PushLocal(PushReason::MissingRemote);
    };
    if local.modified_ms > remote.modified_ms || local.size != remote.size {
        SyncDecision::PushLocal(PushReason::LocalNewerOrSizeDiff)
    } else if remote.modified_ms > local.modified_ms {
        SyncDecision::PullRemote(PullReason::RemoteNewer)
    } else {
        SyncDecision::Skip
    }
}
