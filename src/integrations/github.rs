//! Image-sync dispatcher backed by a GitHub repository.
//!
//! The repository holds an image list file consumed by a mirroring
//! workflow. A batch is merged into that file; the workflow is started
//! either by `workflow_dispatch` or by a marker commit to the same file.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use super::{
    DEFAULT_HTTP_TIMEOUT_SECS, ImageMapping, ImageSyncDispatcher, RunConclusion, RunState,
    WorkflowRunStatus, build_http_client, summarize_body,
};
use crate::config::{Config, GithubConfig};
use crate::error::DispatchError;
use crate::sync::clock::{SharedClock, SystemClock};

const API_VERSION: &str = "2022-11-28";
const TRIGGER_MARKER: &str = "# Trigger sync";

#[derive(Debug, Deserialize)]
struct ContentsReply {
    sha: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct RunsReply {
    #[serde(default)]
    workflow_runs: Vec<RunItem>,
}

#[derive(Debug, Deserialize)]
struct RunItem {
    status: RunState,
    conclusion: Option<RunConclusion>,
    html_url: String,
    created_at: Option<DateTime<Utc>>,
}

/// Image list file as last read from the branch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ListFile {
    content: String,
    /// `None` when the file does not exist yet.
    sha: Option<String>,
}

/// Non-comment, non-empty lines of an image list.
pub fn listed_images(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Existing images plus the batch's sources, deduplicated and sorted.
pub fn merge_image_list(existing: &str, mappings: &[ImageMapping]) -> String {
    let merged: BTreeSet<String> = listed_images(existing)
        .into_iter()
        .chain(mappings.iter().map(|m| m.source.clone()))
        .collect();
    let mut content = merged.into_iter().collect::<Vec<_>>().join("\n");
    content.push('\n');
    content
}

pub struct GithubDispatcher {
    api_base: String,
    repo: String,
    branch: String,
    file_path: String,
    workflow: Option<String>,
    token: String,
    http: Client,
    clock: SharedClock,
    /// Serialises read-modify-write cycles on the list file.
    write_guard: tokio::sync::Mutex<()>,
}

impl GithubDispatcher {
    pub fn new(config: &GithubConfig, http: Client, clock: SharedClock) -> Self {
        Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            repo: config.repo.trim_matches('/').to_string(),
            branch: config.branch.clone(),
            file_path: config.file_path.trim_start_matches('/').to_string(),
            workflow: config.workflow.clone().filter(|w| !w.trim().is_empty()),
            token: config.token.clone(),
            http,
            clock,
            write_guard: tokio::sync::Mutex::new(()),
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let http = build_http_client(
            config.proxy_for(config.github.use_proxy),
            Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        )?;
        Ok(Self::new(&config.github, http, Arc::new(SystemClock)))
    }

    fn repo_url(&self, tail: &str) -> String {
        format!("{}/repos/{}/{tail}", self.api_base, self.repo)
    }

    fn contents_url(&self) -> String {
        self.repo_url(&format!("contents/{}", self.file_path))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION);
        if self.token.is_empty() {
            request
        } else {
            request.bearer_auth(&self.token)
        }
    }

    /// Send and collect status + body; transport failures become `Request`.
    async fn send(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<(StatusCode, String), DispatchError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| DispatchError::Request {
                operation: operation.to_string(),
                message: e.to_string(),
            })?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Ok((status, body))
    }

    fn api_error(operation: &str, status: StatusCode, body: &str) -> DispatchError {
        DispatchError::Api {
            operation: operation.to_string(),
            status: status.as_u16(),
            message: summarize_body(body),
        }
    }

    fn payload_error(operation: &str, e: impl std::fmt::Display) -> DispatchError {
        DispatchError::Payload {
            operation: operation.to_string(),
            message: e.to_string(),
        }
    }

    async fn read_list(&self) -> Result<ListFile, DispatchError> {
        let operation = format!("read {}", self.file_path);
        let request = self
            .http
            .get(self.contents_url())
            .query(&[("ref", self.branch.as_str())]);
        let (status, body) = self.send(&operation, request).await?;

        if status == StatusCode::NOT_FOUND {
            tracing::debug!(file = %self.file_path, "image list does not exist yet");
            return Ok(ListFile::default());
        }
        if !status.is_success() {
            return Err(Self::api_error(&operation, status, &body));
        }

        let reply: ContentsReply =
            serde_json::from_str(&body).map_err(|e| Self::payload_error(&operation, e))?;
        let encoded: String = reply.content.split_whitespace().collect();
        let decoded = STANDARD
            .decode(encoded)
            .map_err(|e| Self::payload_error(&operation, e))?;
        let content =
            String::from_utf8(decoded).map_err(|e| Self::payload_error(&operation, e))?;
        Ok(ListFile {
            content,
            sha: Some(reply.sha),
        })
    }

    async fn write_list(
        &self,
        content: &str,
        sha: Option<&str>,
        message: &str,
    ) -> Result<(), DispatchError> {
        let operation = format!("update {}", self.file_path);
        let mut payload = serde_json::json!({
            "message": message,
            "content": STANDARD.encode(content),
            "branch": self.branch,
        });
        if let Some(sha) = sha {
            payload["sha"] = serde_json::Value::String(sha.to_string());
        }

        let request = self.http.put(self.contents_url()).json(&payload);
        let (status, body) = self.send(&operation, request).await?;
        if !status.is_success() {
            return Err(Self::api_error(&operation, status, &body));
        }
        Ok(())
    }

    async fn dispatch_workflow(&self, workflow: &str) -> Result<(), DispatchError> {
        let operation = format!("dispatch workflow {workflow}");
        let request = self
            .http
            .post(self.repo_url(&format!("actions/workflows/{workflow}/dispatches")))
            .json(&serde_json::json!({ "ref": self.branch }));
        let (status, body) = self.send(&operation, request).await?;
        if !status.is_success() {
            return Err(Self::api_error(&operation, status, &body));
        }
        Ok(())
    }

    async fn commit_trigger_marker(&self) -> Result<(), DispatchError> {
        let _guard = self.write_guard.lock().await;
        let list = self.read_list().await?;
        let content = format!(
            "{}\n{TRIGGER_MARKER} {}\n",
            list.content.trim_end(),
            self.clock.now().timestamp()
        );
        self.write_list(content.trim_start(), list.sha.as_deref(), "Trigger sync")
            .await
    }
}

#[async_trait]
impl ImageSyncDispatcher for GithubDispatcher {
    async fn submit_batch(&self, mappings: &[ImageMapping]) -> Result<(), DispatchError> {
        let _guard = self.write_guard.lock().await;
        let list = self.read_list().await?;
        let content = merge_image_list(&list.content, mappings);
        self.write_list(
            &content,
            list.sha.as_deref(),
            &format!("Add {} images", mappings.len()),
        )
        .await?;
        tracing::info!(repo = %self.repo, images = mappings.len(), "image batch committed");
        Ok(())
    }

    async fn trigger_pipeline(&self) -> Result<(), DispatchError> {
        match self.workflow.as_deref() {
            Some(workflow) => self.dispatch_workflow(workflow).await?,
            None => self.commit_trigger_marker().await?,
        }
        tracing::info!(repo = %self.repo, "image sync pipeline triggered");
        Ok(())
    }

    async fn latest_run_status(&self) -> Result<Option<WorkflowRunStatus>, DispatchError> {
        let operation = "query workflow runs";
        let url = match self.workflow.as_deref() {
            Some(workflow) => self.repo_url(&format!("actions/workflows/{workflow}/runs")),
            None => self.repo_url("actions/runs"),
        };
        let request = self
            .http
            .get(url)
            .query(&[("branch", self.branch.as_str()), ("per_page", "1")]);
        let (status, body) = self.send(operation, request).await?;
        if !status.is_success() {
            return Err(Self::api_error(operation, status, &body));
        }

        let reply: RunsReply =
            serde_json::from_str(&body).map_err(|e| Self::payload_error(operation, e))?;
        Ok(reply.workflow_runs.into_iter().next().map(|run| WorkflowRunStatus {
            status: run.status,
            conclusion: run.conclusion,
            url: run.html_url,
            created_at: run.created_at,
        }))
    }
}

impl std::fmt::Debug for GithubDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubDispatcher")
            .field("repo", &self.repo)
            .field("branch", &self.branch)
            .field("file_path", &self.file_path)
            .field("workflow", &self.workflow)
            .finish_non_exhaustive()
    }
}
