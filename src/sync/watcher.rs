//! Background completion watcher for one accepted image-sync request.
//!
//! Each session polls the dispatcher on a fixed interval until the latest
//! run completes or the session times out, then sends exactly one terminal
//! notification. Query errors only cost a cycle.

use chrono::{DateTime, TimeDelta, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::clock::{Clock, SharedClock, to_delta};
use super::messages;
use crate::config::SyncConfig;
use crate::integrations::{
    ImageSyncDispatcher, Messenger, RunConclusion, WorkflowRunStatus, notify,
};

/// Runs created this long before a session starts belong to an earlier sync.
pub const STALE_RUN_GRACE_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchSettings {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(600),
        }
    }
}

impl From<&SyncConfig> for WatchSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            timeout: Duration::from_secs(config.watch_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Terminal(T),
    TimedOut { last: Option<T> },
}

/// Sleep `interval`, probe, repeat until `is_terminal` holds or `timeout`
/// has elapsed since the first call. A probe yielding `None` means "no new
/// information this cycle".
pub async fn poll_until<T, P, Fut>(
    clock: &dyn Clock,
    interval: Duration,
    timeout: Duration,
    mut probe: P,
    is_terminal: impl Fn(&T) -> bool,
) -> PollOutcome<T>
where
    T: Clone,
    P: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let started = clock.now();
    let timeout = to_delta(timeout);
    let mut last = None;

    loop {
        clock.sleep(interval).await;

        if let Some(observation) = probe().await {
            if is_terminal(&observation) {
                return PollOutcome::Terminal(observation);
            }
            last = Some(observation);
        }

        if clock.now().signed_duration_since(started) >= timeout {
            return PollOutcome::TimedOut { last };
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum WatchState {
    Polling,
    Succeeded,
    Failed,
    TimedOut,
}

/// State owned by one watcher task for its lifetime.
#[derive(Debug, Clone)]
pub struct MonitorSession {
    pub user_id: String,
    pub images: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub timeout: Duration,
    pub last_status: Option<WorkflowRunStatus>,
    pub state: WatchState,
}

impl MonitorSession {
    /// Whether `run` could have been started by this session's trigger.
    fn owns_run(&self, run: &WorkflowRunStatus) -> bool {
        run.created_at.is_none_or(|created| {
            created >= self.started_at - TimeDelta::seconds(STALE_RUN_GRACE_SECS)
        })
    }
}

pub struct CompletionWatcher {
    dispatcher: Arc<dyn ImageSyncDispatcher>,
    messenger: Arc<dyn Messenger>,
    clock: SharedClock,
    settings: WatchSettings,
}

impl CompletionWatcher {
    pub fn new(
        dispatcher: Arc<dyn ImageSyncDispatcher>,
        messenger: Arc<dyn Messenger>,
        clock: SharedClock,
        settings: WatchSettings,
    ) -> Self {
        Self {
            dispatcher,
            messenger,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> WatchSettings {
        self.settings
    }

    /// Watch until a terminal state and notify the user once. Returns the
    /// finished session.
    pub async fn watch(&self, user_id: &str, images: Vec<String>) -> MonitorSession {
        let mut session = MonitorSession {
            user_id: user_id.to_string(),
            images,
            started_at: self.clock.now(),
            timeout: self.settings.timeout,
            last_status: None,
            state: WatchState::Polling,
        };
        tracing::info!(
            user = %session.user_id,
            images = session.images.len(),
            "watching image sync pipeline"
        );

        let outcome = {
            let session_ref = &session;
            poll_until(
                self.clock.as_ref(),
                self.settings.poll_interval,
                self.settings.timeout,
                || self.poll_once(session_ref),
                WorkflowRunStatus::is_terminal,
            )
            .await
        };

        let text = match outcome {
            PollOutcome::Terminal(run) => {
                session.state = if run.conclusion == Some(RunConclusion::Success) {
                    WatchState::Succeeded
                } else {
                    WatchState::Failed
                };
                let text = if session.state == WatchState::Succeeded {
                    messages::run_succeeded(&run.url)
                } else {
                    messages::run_failed(run.conclusion, &run.url)
                };
                session.last_status = Some(run);
                text
            }
            PollOutcome::TimedOut { last } => {
                session.state = WatchState::TimedOut;
                session.last_status = last;
                let last_url = session
                    .last_status
                    .as_ref()
                    .map(|run| run.url.as_str())
                    .filter(|url| !url.is_empty());
                messages::run_timed_out(session.timeout, last_url)
            }
        };

        tracing::info!(user = %session.user_id, state = %session.state, "image sync watch finished");
        notify(self.messenger.as_ref(), &session.user_id, &text).await;
        session
    }

    async fn poll_once(&self, session: &MonitorSession) -> Option<WorkflowRunStatus> {
        match self.dispatcher.latest_run_status().await {
            Ok(Some(run)) if session.owns_run(&run) => {
                tracing::debug!(status = %run.status, url = %run.url, "pipeline status");
                Some(run)
            }
            Ok(Some(run)) => {
                tracing::debug!(url = %run.url, "ignoring run from an earlier sync");
                None
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(user = %session.user_id, error = %e, "status query failed, retrying next cycle");
                None
            }
        }
    }
}

impl std::fmt::Debug for CompletionWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionWatcher")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
