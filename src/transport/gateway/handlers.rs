use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

use super::{ACK_BODY, AppState, CallbackQuery};
use crate::sync::request::{self, SyncRequest};
use crate::sync::{Job, messages};
use crate::transport::wecom::MessageKind;
use crate::utils::text::truncate_with_ellipsis;

struct SignedParams<'a> {
    signature: &'a str,
    timestamp: &'a str,
    nonce: &'a str,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

fn signed_params(query: &CallbackQuery) -> Option<SignedParams<'_>> {
    Some(SignedParams {
        signature: present(&query.msg_signature)?,
        timestamp: present(&query.timestamp)?,
        nonce: present(&query.nonce)?,
    })
}

fn bad_request(message: &'static str) -> Response {
    (StatusCode::BAD_REQUEST, message).into_response()
}

fn ack() -> Response {
    (StatusCode::OK, ACK_BODY).into_response()
}

/// GET /health
pub(super) async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// GET callback: platform URL verification
pub(super) async fn handle_verify(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let (Some(params), Some(echo)) = (
        signed_params(&query),
        query.echostr.as_deref().filter(|s| !s.is_empty()),
    ) else {
        return bad_request("Missing required query parameters");
    };

    match state
        .decoder
        .verify(params.signature, params.timestamp, params.nonce, echo)
    {
        Ok(plain) => {
            tracing::info!("callback URL verified");
            (StatusCode::OK, plain).into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "callback URL verification failed");
            bad_request("Verification failed")
        }
    }
}

/// POST callback: encrypted message delivery
pub(super) async fn handle_deliver(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    body: Bytes,
) -> Response {
    let Some(params) = signed_params(&query) else {
        return bad_request("Missing required query parameters");
    };
    let Ok(raw_body) = std::str::from_utf8(&body) else {
        return bad_request("Invalid request body");
    };

    let message = match state
        .decoder
        .decode(raw_body, params.signature, params.timestamp, params.nonce)
    {
        Ok(message) => message,
        Err(e) if e.is_rejection() => {
            tracing::warn!(error = %e, "callback rejected");
            return bad_request("Invalid callback");
        }
        Err(e) => {
            tracing::warn!(error = %e, "unreadable callback message acknowledged");
            return ack();
        }
    };

    if message.msg_type != MessageKind::Text {
        tracing::debug!(msg_type = message.msg_type.as_str(), "ignoring non-text message");
        return ack();
    }

    let user_id = message.from_user;
    let content = message.content.unwrap_or_default();
    tracing::info!(
        user = %user_id,
        content = %truncate_with_ellipsis(content.trim(), 50),
        "text message received"
    );

    if !state.dedup.should_process(&user_id, &content, state.clock.now()) {
        tracing::info!(user = %user_id, "duplicate message suppressed");
        return ack();
    }

    let job = match request::classify(&content) {
        SyncRequest::Upload(url) => Job::Upload { user_id, url },
        SyncRequest::Images(images) => {
            let mappings = request::map_images(&state.registry, &images);
            match state.lock.try_lock_async().await {
                Some(lock) => Job::ImageSync {
                    user_id,
                    mappings,
                    lock,
                },
                None => {
                    tracing::info!(user = %user_id, "image sync already in progress");
                    Job::Notify {
                        user_id,
                        text: messages::busy(),
                    }
                }
            }
        }
        SyncRequest::Unrecognized => Job::Notify {
            user_id,
            text: messages::help(),
        },
    };

    match state.jobs.submit(job) {
        Ok(()) => ack(),
        Err(e) => {
            tracing::error!(error = %e, "could not dispatch background job");
            (StatusCode::INTERNAL_SERVER_ERROR, "Service shutting down").into_response()
        }
    }
}
