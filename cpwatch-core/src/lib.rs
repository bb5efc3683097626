mod client;
mod retry;

pub use client::{
    ApiErrorClass, DirectoryListing, DiskInfo, FileEntry, VersionInfo, WebWorkflowClient,
    WebWorkflowError,
};
pub use retry::{Backoff, RetryPolicy};
