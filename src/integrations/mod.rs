//! Outbound collaborators: the messaging platform, the image-sync pipeline,
//! and object storage. The core only sees these traits.

pub mod github;
pub mod storage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{DispatchError, MessagingError, UploadError};

// ── Messaging ───────────────────────────────────────────────────────────────

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, user_id: &str, content: &str) -> Result<(), MessagingError>;
}

/// Best-effort send: failures are logged, never returned.
pub async fn notify(messenger: &dyn Messenger, user_id: &str, content: &str) {
    if let Err(e) = messenger.send_text(user_id, content).await {
        tracing::error!(user = %user_id, error = %e, "failed to notify user");
    }
}

// ── Image sync ──────────────────────────────────────────────────────────────

/// One requested image and where the pipeline will publish it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageMapping {
    pub source: String,
    pub target: String,
}

impl fmt::Display for ImageMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} → {}", self.source, self.target)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunState {
    Queued,
    InProgress,
    Completed,
    /// `waiting`, `requested`, `pending`, and anything newer
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunConclusion {
    Success,
    Failure,
    #[serde(other)]
    Other,
}

/// Snapshot of the most recent pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRunStatus {
    pub status: RunState,
    pub conclusion: Option<RunConclusion>,
    pub url: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl WorkflowRunStatus {
    pub fn is_terminal(&self) -> bool {
        self.status == RunState::Completed
    }

    pub fn succeeded(&self) -> bool {
        self.is_terminal() && self.conclusion == Some(RunConclusion::Success)
    }
}

#[async_trait]
pub trait ImageSyncDispatcher: Send + Sync {
    /// Add the batch to the pipeline's image list.
    async fn submit_batch(&self, mappings: &[ImageMapping]) -> Result<(), DispatchError>;

    async fn trigger_pipeline(&self) -> Result<(), DispatchError>;

    /// `None` when the pipeline has never run.
    async fn latest_run_status(&self) -> Result<Option<WorkflowRunStatus>, DispatchError>;
}

// ── Object upload ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub filename: String,
    pub size: u64,
    pub bucket: String,
    pub url: String,
}

#[async_trait]
pub trait ObjectUploader: Send + Sync {
    async fn upload_from_url(&self, url: &str) -> Result<UploadReceipt, UploadError>;
}

// ── HTTP ────────────────────────────────────────────────────────────────────

pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Shared client settings; `proxy` routes every request through the given URL.
pub fn build_http_client(proxy: Option<&str>, timeout: Duration) -> anyhow::Result<Client> {
    let mut builder = Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")));

    if let Some(proxy_url) = proxy {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| anyhow::anyhow!("invalid proxy URL {proxy_url}: {e}"))?;
        builder = builder.proxy(proxy);
    } else {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {e}"))
}

/// Trim an upstream error body for inclusion in an error message.
pub(crate) fn summarize_body(body: &str) -> String {
    crate::utils::text::truncate_with_ellipsis(body.trim(), 200)
}
