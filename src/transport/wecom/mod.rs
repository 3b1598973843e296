//! WeCom encrypted callback protocol and application messaging.

pub mod cipher;
pub mod client;
pub mod decoder;
pub mod envelope;
pub mod signature;

pub use cipher::{CallbackKey, ENCODED_KEY_LEN};
pub use client::{MAX_MESSAGE_BYTES, WeComClient};
pub use decoder::CallbackDecoder;
pub use envelope::{DecryptedMessage, MessageKind};

use crate::config::WecomConfig;
use crate::error::CallbackError;

/// A text message callback as the platform would deliver it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedCallback {
    pub msg_signature: String,
    pub timestamp: String,
    pub nonce: String,
    pub body: String,
}

impl SignedCallback {
    /// Query string for the delivery URL.
    pub fn query(&self) -> String {
        format!(
            "msg_signature={}&timestamp={}&nonce={}",
            self.msg_signature, self.timestamp, self.nonce
        )
    }
}

/// Encrypts and signs a text message from `from_user` with the configured
/// credentials. Used by `simulate` and by tests driving the gateway.
pub fn seal_text_callback(
    config: &WecomConfig,
    from_user: &str,
    content: &str,
    timestamp: i64,
    nonce: &str,
) -> Result<SignedCallback, CallbackError> {
    let key = CallbackKey::from_encoding_aes_key(&config.encoding_aes_key)?;
    let msg_id = format!("{timestamp}{}", nonce.len());
    let inner = envelope::render_text_message(&config.corp_id, from_user, timestamp, content, &msg_id);
    let encrypted =
        cipher::encrypt_envelope(&key, &config.corp_id, &inner, cipher::random_padding())?;

    let timestamp = timestamp.to_string();
    let msg_signature = signature::compute_signature(&config.token, &timestamp, nonce, &encrypted);
    Ok(SignedCallback {
        msg_signature,
        timestamp,
        nonce: nonce.to_string(),
        body: envelope::render_envelope(&config.corp_id, &config.agent_id, &encrypted),
    })
}
