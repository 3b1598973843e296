//! Time-windowed suppression of repeated `(user, content)` pairs.
//!
//! The platform retries a callback whose acknowledgment was slow or lost;
//! this filter absorbs those retries. In-memory only, resets on restart.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::clock::to_delta;

pub const DEFAULT_WINDOW_SECS: u64 = 5;

pub struct DedupFilter {
    seen: Mutex<HashMap<String, DateTime<Utc>>>,
    window: Duration,
}

/// Content is trimmed, nothing else.
fn dedup_key(user_id: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(content.trim().as_bytes());
    hex::encode(hasher.finalize())
}

impl DedupFilter {
    pub fn new(window: Duration) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns `true` if the pair should be processed (and records it),
    /// `false` if it repeats a pair seen less than one window ago.
    pub fn should_process(&self, user_id: &str, content: &str, now: DateTime<Utc>) -> bool {
        let key = dedup_key(user_id, content);
        let window = to_delta(self.window);
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(last) = seen.get(&key)
            && now.signed_duration_since(*last) < window
        {
            return false;
        }

        seen.insert(key, now);
        seen.retain(|_, last| now.signed_duration_since(*last) < window);
        true
    }

    /// Record the pair without checking it.
    pub fn record_seen(&self, user_id: &str, content: &str, now: DateTime<Utc>) {
        let key = dedup_key(user_id, content);
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, now);
    }

    pub fn len(&self) -> usize {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DedupFilter {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_WINDOW_SECS))
    }
}

impl std::fmt::Debug for DedupFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupFilter")
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}
