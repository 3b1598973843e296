use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::{Config, WecomConfig};
use crate::error::MessagingError;
use crate::integrations::{Messenger, build_http_client, summarize_body};
use crate::sync::clock::{SharedClock, SystemClock};
use crate::utils::text::chunk_by_bytes;

/// Platform limit for one text message body.
pub const MAX_MESSAGE_BYTES: usize = 2048;

const TOKEN_REFRESH_MARGIN_SECS: i64 = 200;
const DEFAULT_TOKEN_TTL_SECS: i64 = 7200;
const MAX_TOKEN_TTL_SECS: i64 = 86_400;
/// `invalid access_token` and `access_token expired`
const STALE_TOKEN_CODES: [i64; 2] = [40014, 42001];
const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
struct TokenReply {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
    access_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ApiReply {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

enum SendFailure {
    StaleToken(String),
    Other(MessagingError),
}

/// Application messaging over the platform HTTP API.
///
/// Access tokens are cached until shortly before they expire and refreshed
/// once if the platform reports them stale mid-flight.
pub struct WeComClient {
    api_base: String,
    corp_id: String,
    agent_id: u64,
    secret: String,
    http: reqwest::Client,
    clock: SharedClock,
    token: Mutex<Option<CachedToken>>,
}

impl WeComClient {
    pub fn new(
        config: &WecomConfig,
        http: reqwest::Client,
        clock: SharedClock,
    ) -> Result<Self, MessagingError> {
        let agent_id = config.agent_id.trim().parse::<u64>().map_err(|_| {
            MessagingError::Send(format!("agent id {:?} is not numeric", config.agent_id))
        })?;
        Ok(Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            corp_id: config.corp_id.clone(),
            agent_id,
            secret: config.secret.clone(),
            http,
            clock,
            token: Mutex::new(None),
        })
    }

    /// The platform is always reached directly.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let http = build_http_client(None, Duration::from_secs(REQUEST_TIMEOUT_SECS))?;
        Ok(Self::new(&config.wecom, http, std::sync::Arc::new(SystemClock))?)
    }

    async fn access_token(&self) -> Result<String, MessagingError> {
        let mut cached = self.token.lock().await;
        let now = self.clock.now();
        if let Some(token) = cached.as_ref()
            && now < token.expires_at
        {
            return Ok(token.value.clone());
        }

        let fresh = self.fetch_token(now).await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    async fn invalidate_token(&self, stale: &str) {
        let mut cached = self.token.lock().await;
        if cached.as_ref().is_some_and(|t| t.value == stale) {
            *cached = None;
        }
    }

    async fn fetch_token(&self, now: DateTime<Utc>) -> Result<CachedToken, MessagingError> {
        let response = self
            .http
            .get(format!("{}/cgi-bin/gettoken", self.api_base))
            .query(&[("corpid", self.corp_id.as_str()), ("corpsecret", self.secret.as_str())])
            .send()
            .await
            .map_err(|e| MessagingError::Token(e.without_url().to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| MessagingError::Token(e.without_url().to_string()))?;
        if !status.is_success() {
            return Err(MessagingError::Token(format!(
                "HTTP {status}: {}",
                summarize_body(&body)
            )));
        }

        let reply: TokenReply = serde_json::from_str(&body)
            .map_err(|e| MessagingError::Token(format!("unexpected reply: {e}")))?;
        if reply.errcode != 0 {
            return Err(MessagingError::Token(format!(
                "errcode {}: {}",
                reply.errcode, reply.errmsg
            )));
        }
        let value = reply
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| MessagingError::Token("reply carried no access_token".into()))?;

        let ttl = reply.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS);
        tracing::debug!(expires_in = ttl, "fetched messaging access token");
        Ok(CachedToken {
            value,
            expires_at: now + token_lifetime(ttl),
        })
    }

    async fn post_text(&self, token: &str, user_id: &str, content: &str) -> Result<(), SendFailure> {
        let payload = serde_json::json!({
            "touser": user_id,
            "msgtype": "text",
            "agentid": self.agent_id,
            "text": { "content": content },
        });

        let response = self
            .http
            .post(format!("{}/cgi-bin/message/send", self.api_base))
            .query(&[("access_token", token)])
            .json(&payload)
            .send()
            .await
            .map_err(|e| SendFailure::Other(MessagingError::Send(e.without_url().to_string())))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SendFailure::Other(MessagingError::Send(e.without_url().to_string())))?;
        if !status.is_success() {
            return Err(SendFailure::Other(MessagingError::Send(format!(
                "HTTP {status}: {}",
                summarize_body(&body)
            ))));
        }

        let reply: ApiReply = serde_json::from_str(&body).map_err(|e| {
            SendFailure::Other(MessagingError::Send(format!("unexpected reply: {e}")))
        })?;
        match reply.errcode {
            0 => Ok(()),
            code if STALE_TOKEN_CODES.contains(&code) => Err(SendFailure::StaleToken(reply.errmsg)),
            code => Err(SendFailure::Other(MessagingError::Send(format!(
                "errcode {code}: {}",
                reply.errmsg
            )))),
        }
    }

    async fn send_chunk(&self, user_id: &str, content: &str) -> Result<(), MessagingError> {
        let token = self.access_token().await?;
        match self.post_text(&token, user_id, content).await {
            Ok(()) => Ok(()),
            Err(SendFailure::Other(e)) => Err(e),
            Err(SendFailure::StaleToken(reason)) => {
                tracing::info!(reason = %reason, "access token rejected, refreshing once");
                self.invalidate_token(&token).await;
                let token = self.access_token().await?;
                match self.post_text(&token, user_id, content).await {
                    Ok(()) => Ok(()),
                    Err(SendFailure::Other(e)) => Err(e),
                    Err(SendFailure::StaleToken(reason)) => Err(MessagingError::Send(format!(
                        "access token rejected after refresh: {reason}"
                    ))),
                }
            }
        }
    }
}

#[async_trait]
impl Messenger for WeComClient {
    async fn send_text(&self, user_id: &str, content: &str) -> Result<(), MessagingError> {
        for chunk in chunk_by_bytes(content, MAX_MESSAGE_BYTES) {
            self.send_chunk(user_id, &chunk).await?;
        }
        tracing::debug!(user = %user_id, bytes = content.len(), "message sent");
        Ok(())
    }
}

impl std::fmt::Debug for WeComClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeComClient")
            .field("api_base", &self.api_base)
            .field("corp_id", &self.corp_id)
            .field("agent_id", &self.agent_id)
            .finish_non_exhaustive()
    }
}

/// Cache lifetime for a token the platform says lives `expires_in` seconds.
/// Out-of-range replies are clamped instead of trusted.
fn token_lifetime(expires_in: i64) -> TimeDelta {
    let secs = expires_in
        .clamp(1, MAX_TOKEN_TTL_SECS)
        .saturating_sub(TOKEN_REFRESH_MARGIN_SECS)
        .max(0);
    TimeDelta::try_seconds(secs).unwrap_or_else(|| {
        TimeDelta::seconds(DEFAULT_TOKEN_TTL_SECS - TOKEN_REFRESH_MARGIN_SECS)
    })
}
