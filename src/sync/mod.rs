//! Orchestration around the callback protocol: dedup, the task lock,
//! background jobs, and the completion watcher.

pub mod clock;
pub mod dedup;
pub mod jobs;
pub mod lock;
pub mod messages;
pub mod request;
pub mod watcher;

#[cfg(test)]
pub(crate) mod test_support;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use dedup::DedupFilter;
pub use jobs::{Job, JobRejected, JobRunner, SyncServices};
pub use lock::{FileLockStore, LockStore, MemoryLockStore, TaskLock, TaskLockGuard, TaskLockRecord};
pub use request::SyncRequest;
pub use watcher::{CompletionWatcher, MonitorSession, WatchSettings, WatchState};
