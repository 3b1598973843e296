//! Axum HTTP surface for the encrypted callback.
//!
//! - `GET  {callback_path}`: URL verification, answers the decrypted echo string
//! - `POST {callback_path}`: message delivery, answers `success` fast and hands
//!   slow work to the [`JobRunner`]
//! - `GET  /health`: liveness
//!
//! Body size and request time are bounded by tower-http layers.

mod handlers;
mod server;

pub use server::{build_app, build_gateway_state, run_gateway, run_gateway_with_listener};

use crate::config::RegistryConfig;
use crate::sync::{DedupFilter, JobRunner, SharedClock, TaskLock};
use crate::transport::wecom::CallbackDecoder;
use serde::Deserialize;
use std::sync::Arc;

/// Body the platform expects for every accepted delivery.
pub const ACK_BODY: &str = "success";

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub decoder: Arc<CallbackDecoder>,
    pub dedup: Arc<DedupFilter>,
    pub lock: TaskLock,
    pub jobs: Arc<JobRunner>,
    pub clock: SharedClock,
    pub registry: Arc<RegistryConfig>,
}

/// Query parameters of both callback modes. All optional so a missing one
/// yields our own 400 instead of the extractor's rejection.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct CallbackQuery {
    pub msg_signature: Option<String>,
    pub timestamp: Option<String>,
    pub nonce: Option<String>,
    pub echostr: Option<String>,
}
