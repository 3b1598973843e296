//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{DispatchError, MessagingError, UploadError};
use crate::integrations::{
    ImageMapping, ImageSyncDispatcher, Messenger, ObjectUploader, RunConclusion, RunState,
    UploadReceipt, WorkflowRunStatus,
};

#[derive(Default)]
pub(crate) struct RecordingMessenger {
    sent: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingMessenger {
    pub(crate) fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub(crate) fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|(_, text)| text).collect()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(&self, user_id: &str, content: &str) -> Result<(), MessagingError> {
        self.sent
            .lock()
            .unwrap()
            .push((user_id.to_string(), content.to_string()));
        if self.fail {
            return Err(MessagingError::Send("platform unavailable".into()));
        }
        Ok(())
    }
}

pub(crate) fn run(state: RunState, conclusion: Option<RunConclusion>, url: &str) -> WorkflowRunStatus {
    WorkflowRunStatus {
        status: state,
        conclusion,
        url: url.to_string(),
        created_at: None,
    }
}

pub(crate) fn run_created_at(
    state: RunState,
    conclusion: Option<RunConclusion>,
    url: &str,
    created_at: DateTime<Utc>,
) -> WorkflowRunStatus {
    WorkflowRunStatus {
        created_at: Some(created_at),
        ..run(state, conclusion, url)
    }
}

pub(crate) type StatusReply = Result<Option<WorkflowRunStatus>, DispatchError>;

/// Replays scripted status replies; once exhausted, repeats `fallback`.
pub(crate) struct ScriptedDispatcher {
    replies: Mutex<VecDeque<StatusReply>>,
    fallback: Option<WorkflowRunStatus>,
    polls: AtomicUsize,
    triggers: AtomicUsize,
    batches: Mutex<Vec<Vec<ImageMapping>>>,
    fail_submit: bool,
    fail_trigger: bool,
}

impl ScriptedDispatcher {
    pub(crate) fn new(replies: Vec<StatusReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fallback: Some(run(RunState::InProgress, None, "https://ci.example/run/1")),
            polls: AtomicUsize::new(0),
            triggers: AtomicUsize::new(0),
            batches: Mutex::new(Vec::new()),
            fail_submit: false,
            fail_trigger: false,
        }
    }

    pub(crate) fn never_finishing() -> Self {
        Self::new(Vec::new())
    }

    pub(crate) fn failing_submit(mut self) -> Self {
        self.fail_submit = true;
        self
    }

    pub(crate) fn failing_trigger(mut self) -> Self {
        self.fail_trigger = true;
        self
    }

    pub(crate) fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub(crate) fn triggers(&self) -> usize {
        self.triggers.load(Ordering::SeqCst)
    }

    pub(crate) fn batches(&self) -> Vec<Vec<ImageMapping>> {
        self.batches.lock().unwrap().clone()
    }
}

fn api_error(operation: &str) -> DispatchError {
    DispatchError::Api {
        operation: operation.to_string(),
        status: 502,
        message: "bad gateway".to_string(),
    }
}

#[async_trait]
impl ImageSyncDispatcher for ScriptedDispatcher {
    async fn submit_batch(&self, mappings: &[ImageMapping]) -> Result<(), DispatchError> {
        if self.fail_submit {
            return Err(api_error("submit batch"));
        }
        self.batches.lock().unwrap().push(mappings.to_vec());
        Ok(())
    }

    async fn trigger_pipeline(&self) -> Result<(), DispatchError> {
        if self.fail_trigger {
            return Err(api_error("trigger pipeline"));
        }
        self.triggers.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn latest_run_status(&self) -> Result<Option<WorkflowRunStatus>, DispatchError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

pub(crate) struct FakeUploader {
    pub(crate) result: Result<UploadReceipt, String>,
    pub(crate) calls: Mutex<Vec<String>>,
}

impl FakeUploader {
    pub(crate) fn ok(filename: &str) -> Self {
        Self {
            result: Ok(UploadReceipt {
                filename: filename.to_string(),
                size: 1024,
                bucket: "tmp".to_string(),
                url: format!("https://tmp.pek3a.qingstor.com/{filename}"),
            }),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing(reason: &str) -> Self {
        Self {
            result: Err(reason.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectUploader for FakeUploader {
    async fn upload_from_url(&self, url: &str) -> Result<UploadReceipt, UploadError> {
        self.calls.lock().unwrap().push(url.to_string());
        self.result.clone().map_err(UploadError::Download)
    }
}
