//! Cross-process exclusive lock around the image-sync critical section.
//!
//! At most one non-expired [`TaskLockRecord`] exists at a time. A record
//! older than the lock timeout is abandoned and any acquirer may reclaim it.
//! `acquire` never waits.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::clock::{SharedClock, to_delta};

pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 300;

const RECLAIM_GUARD_STALE_AFTER: Duration = Duration::from_secs(30);
const RELEASE_GUARD_ATTEMPTS: u32 = 5;
const RELEASE_GUARD_RETRY: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLockRecord {
    pub acquired_at: DateTime<Utc>,
    pub owner_id: String,
}

impl TaskLockRecord {
    pub fn age(&self, now: DateTime<Utc>) -> TimeDelta {
        now.signed_duration_since(self.acquired_at)
    }

    /// A record is abandoned once its age reaches the timeout. Records
    /// stamped further in the future than one timeout are treated the same.
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        let age = self.age(now);
        let timeout = to_delta(timeout);
        age >= timeout || age <= -timeout
    }
}

/// `<hostname>:<pid>`
pub fn process_owner_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    format!("{host}:{}", std::process::id())
}

/// Storage backend for the lock record.
pub trait LockStore: Send + Sync + fmt::Debug {
    /// Create a fresh record if none is valid. Returns the record written.
    fn try_acquire(&self) -> Option<TaskLockRecord>;

    /// Delete the record if present. Idempotent.
    fn release(&self);

    /// Delete the record only if it is still `held`.
    fn release_held(&self, held: &TaskLockRecord) -> bool;

    /// True iff a non-expired record exists. Expired records found here are removed.
    fn is_locked(&self) -> bool;

    /// The current record, expired or not. Corrupt records read as `None`.
    fn holder(&self) -> Option<TaskLockRecord>;
}

// ── File-backed store ───────────────────────────────────────────────────────

enum Snapshot {
    Missing,
    /// Unreadable or malformed; `raw` is `None` when the read itself failed.
    Corrupt { raw: Option<Vec<u8>> },
    Present { record: TaskLockRecord, raw: Vec<u8> },
}

/// Lock record kept as a JSON file visible to every process of the deployment.
///
/// Creation is atomic: the record is written to a private temp file and then
/// hard-linked into place, which fails if the lock file already exists.
/// Stale or corrupt records are removed under a sibling `.reclaim` file
/// created with `create_new`, and only if they are still the record that
/// was inspected.
pub struct FileLockStore {
    path: PathBuf,
    timeout: Duration,
    clock: SharedClock,
    owner_id: String,
}

impl FileLockStore {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration, clock: SharedClock) -> Self {
        Self {
            path: path.into(),
            timeout,
            clock,
            owner_id: process_owner_id(),
        }
    }

    #[must_use]
    pub fn with_owner_id(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = owner_id.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map_or_else(|| ".task_lock".into(), |n| n.to_string_lossy().into_owned());
        self.path.with_file_name(format!("{name}.{suffix}"))
    }

    fn ensure_parent(&self) -> io::Result<()> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
            _ => Ok(()),
        }
    }

    fn snapshot(&self) -> Snapshot {
        match fs::read(&self.path) {
            Ok(raw) => match serde_json::from_slice::<TaskLockRecord>(&raw) {
                Ok(record) => Snapshot::Present { record, raw },
                Err(_) => Snapshot::Corrupt { raw: Some(raw) },
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Snapshot::Missing,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "lock record unreadable");
                Snapshot::Corrupt { raw: None }
            }
        }
    }

    /// Atomic create-if-absent. `Ok(false)` means a record already exists.
    fn create_exclusive(&self, record: &TaskLockRecord) -> io::Result<bool> {
        self.ensure_parent()?;
        let body = serde_json::to_vec(record).map_err(io::Error::other)?;
        let staging = self.sibling(&format!("tmp-{}", uuid::Uuid::new_v4().simple()));

        let result = (|| {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&staging)?;
            file.write_all(&body)?;
            file.sync_all()?;
            match fs::hard_link(&staging, &self.path) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
                Err(e) => Err(e),
            }
        })();

        let _ = fs::remove_file(&staging);
        result
    }

    /// Short-lived mutex serialising conditional removals, so a record is
    /// only deleted after re-reading it under exclusion.
    fn reclaim_guard(&self) -> Option<ReclaimGuard> {
        let path = self.sibling("reclaim");

        for _ in 0..2 {
            match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Some(ReclaimGuard { path }),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    let abandoned = fs::metadata(&path)
                        .and_then(|m| m.modified())
                        .ok()
                        .and_then(|modified| modified.elapsed().ok())
                        .is_some_and(|age| age >= RECLAIM_GUARD_STALE_AFTER);
                    if !abandoned {
                        return None;
                    }
                    let _ = fs::remove_file(&path);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to create reclaim guard");
                    return None;
                }
            }
        }
        None
    }

    /// Remove the lock file only if its bytes still satisfy `matches`.
    fn remove_if(&self, matches: impl Fn(&[u8]) -> bool) -> bool {
        let Some(_guard) = self.reclaim_guard() else {
            return false;
        };
        self.remove_matching(matches)
    }

    fn remove_matching(&self, matches: impl Fn(&[u8]) -> bool) -> bool {
        let Ok(raw) = fs::read(&self.path) else {
            return false;
        };
        if !matches(&raw) {
            return false;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => true,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), error = %e, "failed to remove lock record");
                }
                false
            }
        }
    }

    fn remove_unconditionally(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove lock record");
            }
        }
    }

    /// Clears whatever blocks creation. Returns `false` if a valid record holds the lock.
    fn clear_obstruction(&self, now: DateTime<Utc>) -> bool {
        match self.snapshot() {
            Snapshot::Missing => true,
            Snapshot::Corrupt { raw: Some(raw) } => {
                tracing::warn!(path = %self.path.display(), "removing malformed lock record");
                self.remove_if(|current| current == raw.as_slice());
                true
            }
            Snapshot::Corrupt { raw: None } => {
                self.remove_unconditionally();
                true
            }
            Snapshot::Present { record, raw } => {
                if !record.is_expired(now, self.timeout) {
                    return false;
                }
                tracing::info!(
                    owner = %record.owner_id,
                    acquired_at = %record.acquired_at,
                    "reclaiming abandoned task lock"
                );
                self.remove_if(|current| current == raw.as_slice());
                true
            }
        }
    }
}

impl LockStore for FileLockStore {
    fn try_acquire(&self) -> Option<TaskLockRecord> {
        let now = self.clock.now();
        let record = TaskLockRecord {
            acquired_at: now,
            owner_id: self.owner_id.clone(),
        };

        // One retry after clearing a stale or corrupt record; losing the
        // second race means another acquirer won.
        for _ in 0..2 {
            match self.create_exclusive(&record) {
                Ok(true) => return Some(record),
                Ok(false) => {
                    if !self.clear_obstruction(now) {
                        return None;
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "failed to create lock record");
                    return None;
                }
            }
        }
        None
    }

    fn release(&self) {
        self.remove_unconditionally();
    }

    fn release_held(&self, held: &TaskLockRecord) -> bool {
        let is_held = |raw: &[u8]| {
            serde_json::from_slice::<TaskLockRecord>(raw).is_ok_and(|current| &current == held)
        };

        for attempt in 1..=RELEASE_GUARD_ATTEMPTS {
            if let Some(_guard) = self.reclaim_guard() {
                return self.remove_matching(is_held);
            }
            if attempt < RELEASE_GUARD_ATTEMPTS {
                std::thread::sleep(RELEASE_GUARD_RETRY);
            }
        }

        // Reclaimers only delete expired records, so an unexpired record of
        // ours can be removed without the guard.
        tracing::debug!(path = %self.path.display(), "reclaim guard busy, releasing own record directly");
        let now = self.clock.now();
        let timeout = self.timeout;
        self.remove_matching(|raw| is_held(raw) && !held.is_expired(now, timeout))
    }

    fn is_locked(&self) -> bool {
        let now = self.clock.now();
        match self.snapshot() {
            Snapshot::Missing | Snapshot::Corrupt { .. } => false,
            Snapshot::Present { record, raw } => {
                if record.is_expired(now, self.timeout) {
                    self.remove_if(|current| current == raw.as_slice());
                    false
                } else {
                    true
                }
            }
        }
    }

    fn holder(&self) -> Option<TaskLockRecord> {
        match self.snapshot() {
            Snapshot::Present { record, .. } => Some(record),
            Snapshot::Missing | Snapshot::Corrupt { .. } => None,
        }
    }
}

impl fmt::Debug for FileLockStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileLockStore")
            .field("path", &self.path)
            .field("timeout", &self.timeout)
            .field("owner_id", &self.owner_id)
            .finish_non_exhaustive()
    }
}

struct ReclaimGuard {
    path: PathBuf,
}

impl Drop for ReclaimGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

// ── In-process store ────────────────────────────────────────────────────────

/// Mutex-guarded record. Only correct when a single process serves callbacks.
pub struct MemoryLockStore {
    record: Mutex<Option<TaskLockRecord>>,
    timeout: Duration,
    clock: SharedClock,
    owner_id: String,
}

impl MemoryLockStore {
    pub fn new(timeout: Duration, clock: SharedClock) -> Self {
        Self {
            record: Mutex::new(None),
            timeout,
            clock,
            owner_id: process_owner_id(),
        }
    }
}

impl LockStore for MemoryLockStore {
    fn try_acquire(&self) -> Option<TaskLockRecord> {
        let now = self.clock.now();
        let mut slot = self.record.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = slot.as_ref()
            && !existing.is_expired(now, self.timeout)
        {
            return None;
        }
        let record = TaskLockRecord {
            acquired_at: now,
            owner_id: self.owner_id.clone(),
        };
        *slot = Some(record.clone());
        Some(record)
    }

    fn release(&self) {
        *self.record.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn release_held(&self, held: &TaskLockRecord) -> bool {
        let mut slot = self.record.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref() == Some(held) {
            *slot = None;
            true
        } else {
            false
        }
    }

    fn is_locked(&self) -> bool {
        let now = self.clock.now();
        let mut slot = self.record.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(record) if record.is_expired(now, self.timeout) => {
                *slot = None;
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    fn holder(&self) -> Option<TaskLockRecord> {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl fmt::Debug for MemoryLockStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryLockStore")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

// ── Handle + guard ──────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct TaskLock {
    store: Arc<dyn LockStore>,
}

impl TaskLock {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self { store }
    }

    pub fn file(path: impl Into<PathBuf>, timeout: Duration, clock: SharedClock) -> Self {
        Self::new(Arc::new(FileLockStore::new(path, timeout, clock)))
    }

    pub fn memory(timeout: Duration, clock: SharedClock) -> Self {
        Self::new(Arc::new(MemoryLockStore::new(timeout, clock)))
    }

    pub fn acquire(&self) -> bool {
        self.store.try_acquire().is_some()
    }

    /// Acquire and tie release to the returned guard's lifetime.
    pub fn try_lock(&self) -> Option<TaskLockGuard> {
        self.store.try_acquire().map(|record| TaskLockGuard {
            store: Arc::clone(&self.store),
            record: Some(record),
        })
    }

    /// [`try_lock`](Self::try_lock) on the blocking pool, so file I/O
    /// never stalls an async worker.
    pub async fn try_lock_async(&self) -> Option<TaskLockGuard> {
        let lock = self.clone();
        match tokio::task::spawn_blocking(move || lock.try_lock()).await {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!(error = %e, "task lock acquisition aborted");
                None
            }
        }
    }

    pub fn release(&self) {
        self.store.release();
    }

    pub fn is_locked(&self) -> bool {
        self.store.is_locked()
    }

    pub fn holder(&self) -> Option<TaskLockRecord> {
        self.store.holder()
    }
}

/// Releases the lock on drop, unless the record has since been reclaimed
/// by another acquirer.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct TaskLockGuard {
    store: Arc<dyn LockStore>,
    record: Option<TaskLockRecord>,
}

impl TaskLockGuard {
    pub fn record(&self) -> Option<&TaskLockRecord> {
        self.record.as_ref()
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(record) = self.record.take()
            && !self.store.release_held(&record)
        {
            tracing::warn!(
                owner = %record.owner_id,
                "task lock was reclaimed by another holder before release"
            );
        }
    }
}

impl Drop for TaskLockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl fmt::Debug for TaskLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskLockGuard")
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}
