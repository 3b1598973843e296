use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LockBackend {
    /// Lock record file shared by every process of the deployment
    #[default]
    File,
    /// In-process lock; only safe for single-instance deployments
    Memory,
}

/// Orchestration knobs: dedup window, task lock, completion watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
    #[serde(default)]
    pub lock_backend: LockBackend,
    #[serde(default = "default_lock_path")]
    pub lock_path: String,
    /// Age after which a lock record is considered abandoned
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_watch_timeout_secs")]
    pub watch_timeout_secs: u64,
}

fn default_dedup_window_secs() -> u64 {
    5
}

fn default_lock_path() -> String {
    ".task_lock".into()
}

fn default_lock_timeout_secs() -> u64 {
    300
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_watch_timeout_secs() -> u64 {
    600
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: default_dedup_window_secs(),
            lock_backend: LockBackend::default(),
            lock_path: default_lock_path(),
            lock_timeout_secs: default_lock_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            watch_timeout_secs: default_watch_timeout_secs(),
        }
    }
}
