//! Hand-off point between the callback handler and slow background work.
//!
//! The handler builds a [`Job`] and submits it; it never awaits the job.
//! Jobs run on a [`TaskTracker`] so shutdown can wait for in-flight work.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::TaskTracker;

use super::lock::TaskLockGuard;
use super::messages;
use super::watcher::CompletionWatcher;
use crate::integrations::{ImageMapping, ImageSyncDispatcher, Messenger, ObjectUploader, notify};

/// Collaborators shared by every background job.
pub struct SyncServices {
    pub messenger: Arc<dyn Messenger>,
    pub dispatcher: Arc<dyn ImageSyncDispatcher>,
    /// `None` when object storage is not configured.
    pub uploader: Option<Arc<dyn ObjectUploader>>,
    pub watcher: Arc<CompletionWatcher>,
}

pub enum Job {
    Notify {
        user_id: String,
        text: String,
    },
    Upload {
        user_id: String,
        url: String,
    },
    /// Holds the task lock until the batch is submitted and the pipeline triggered.
    ImageSync {
        user_id: String,
        mappings: Vec<ImageMapping>,
        lock: TaskLockGuard,
    },
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Notify { .. } => "notify",
            Self::Upload { .. } => "upload",
            Self::ImageSync { .. } => "image_sync",
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Notify { user_id, .. } => f
                .debug_struct("Notify")
                .field("user_id", user_id)
                .finish_non_exhaustive(),
            Self::Upload { user_id, url } => f
                .debug_struct("Upload")
                .field("user_id", user_id)
                .field("url", url)
                .finish(),
            Self::ImageSync {
                user_id, mappings, ..
            } => f
                .debug_struct("ImageSync")
                .field("user_id", user_id)
                .field("mappings", mappings)
                .finish_non_exhaustive(),
        }
    }
}

/// Returned by [`JobRunner::submit`] once shutdown has begun. Dropping it
/// drops the job (and any lock guard it holds).
#[derive(Debug, thiserror::Error)]
#[error("job runner is shutting down; {kind} job refused")]
pub struct JobRejected {
    pub kind: &'static str,
}

pub struct JobRunner {
    tracker: TaskTracker,
    services: Arc<SyncServices>,
}

impl JobRunner {
    pub fn new(services: SyncServices) -> Self {
        Self {
            tracker: TaskTracker::new(),
            services: Arc::new(services),
        }
    }

    /// Spawn `job` and return immediately.
    pub fn submit(&self, job: Job) -> Result<(), JobRejected> {
        if self.tracker.is_closed() {
            return Err(JobRejected { kind: job.kind() });
        }
        tracing::debug!(kind = job.kind(), "dispatching background job");
        let services = Arc::clone(&self.services);
        self.tracker.spawn(run_job(services, job));
        Ok(())
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.tracker.is_closed()
    }

    /// Refuse new jobs from now on.
    pub fn shutdown(&self) {
        self.tracker.close();
    }

    /// Stop accepting jobs and wait up to `grace` for in-flight ones.
    /// Returns whether everything finished in time.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.tracker.close();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_ok() {
            true
        } else {
            tracing::warn!(
                remaining = self.tracker.len(),
                "background jobs still running after shutdown grace period"
            );
            false
        }
    }
}

impl std::fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRunner")
            .field("in_flight", &self.tracker.len())
            .field("closed", &self.tracker.is_closed())
            .finish_non_exhaustive()
    }
}

async fn run_job(services: Arc<SyncServices>, job: Job) {
    match job {
        Job::Notify { user_id, text } => {
            notify(services.messenger.as_ref(), &user_id, &text).await;
        }
        Job::Upload { user_id, url } => run_upload(&services, &user_id, &url).await,
        Job::ImageSync {
            user_id,
            mappings,
            lock,
        } => run_image_sync(&services, &user_id, mappings, lock).await,
    }
}

async fn run_upload(services: &SyncServices, user_id: &str, url: &str) {
    let messenger = services.messenger.as_ref();
    let Some(uploader) = services.uploader.as_ref() else {
        notify(messenger, user_id, &messages::upload_not_configured()).await;
        return;
    };

    notify(messenger, user_id, &messages::upload_started(url)).await;
    match uploader.upload_from_url(url).await {
        Ok(receipt) => {
            tracing::info!(user = %user_id, file = %receipt.filename, size = receipt.size, "upload finished");
            notify(messenger, user_id, &messages::upload_succeeded(&receipt)).await;
        }
        Err(e) => {
            tracing::error!(user = %user_id, error = %e, "upload failed");
            notify(messenger, user_id, &messages::upload_failed(&e.to_string())).await;
        }
    }
}

async fn run_image_sync(
    services: &SyncServices,
    user_id: &str,
    mappings: Vec<ImageMapping>,
    lock: TaskLockGuard,
) {
    let messenger = services.messenger.as_ref();
    notify(messenger, user_id, &messages::sync_accepted(&mappings)).await;

    if let Err(e) = services.dispatcher.submit_batch(&mappings).await {
        tracing::error!(user = %user_id, error = %e, "image batch submission failed");
        lock.release();
        notify(messenger, user_id, &messages::sync_failed("updating the image list", &e.to_string())).await;
        return;
    }

    if let Err(e) = services.dispatcher.trigger_pipeline().await {
        tracing::error!(user = %user_id, error = %e, "pipeline trigger failed");
        lock.release();
        notify(messenger, user_id, &messages::sync_failed("triggering the pipeline", &e.to_string())).await;
        return;
    }

    lock.release();
    notify(messenger, user_id, &messages::sync_submitted(mappings.len())).await;

    let images = mappings.into_iter().map(|m| m.source).collect();
    services.watcher.watch(user_id, images).await;
}
