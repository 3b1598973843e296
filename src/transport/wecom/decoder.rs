use super::cipher::{self, CallbackKey, Frame};
use super::envelope::{self, DecryptedMessage};
use super::signature::verify_signature;
use crate::config::WecomConfig;
use crate::error::CallbackError;

/// Turns raw callback requests into authenticated plaintext.
///
/// Handles both callback modes: URL verification (`GET`, echo string) and
/// message delivery (`POST`, XML envelope).
pub struct CallbackDecoder {
    token: String,
    key: CallbackKey,
    receive_id: String,
    enforce_receive_id: bool,
}

impl CallbackDecoder {
    pub fn new(token: impl Into<String>, key: CallbackKey, receive_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            key,
            receive_id: receive_id.into(),
            enforce_receive_id: false,
        }
    }

    pub fn from_config(config: &WecomConfig) -> Result<Self, CallbackError> {
        let key = CallbackKey::from_encoding_aes_key(&config.encoding_aes_key)?;
        Ok(Self::new(config.token.clone(), key, config.corp_id.clone())
            .with_receive_id_check(config.enforce_receive_id))
    }

    /// Reject frames whose trailing receive id is not the configured corp id.
    #[must_use]
    pub fn with_receive_id_check(mut self, enforce: bool) -> Self {
        self.enforce_receive_id = enforce;
        self
    }

    /// URL verification: returns the decrypted echo string.
    pub fn verify(
        &self,
        signature: &str,
        timestamp: &str,
        nonce: &str,
        echo: &str,
    ) -> Result<String, CallbackError> {
        self.open(signature, timestamp, nonce, echo)
            .map(|frame| frame.body)
    }

    /// Message delivery: returns the decrypted inner message.
    pub fn decode(
        &self,
        raw_body: &str,
        signature: &str,
        timestamp: &str,
        nonce: &str,
    ) -> Result<DecryptedMessage, CallbackError> {
        let outer = envelope::parse_envelope(raw_body)?;
        let frame = self.open(signature, timestamp, nonce, &outer.encrypted_payload)?;
        envelope::parse_message(&frame.body)
    }

    fn open(
        &self,
        signature: &str,
        timestamp: &str,
        nonce: &str,
        encrypted: &str,
    ) -> Result<Frame, CallbackError> {
        if !verify_signature(&self.token, timestamp, nonce, encrypted, signature) {
            return Err(CallbackError::VerificationFailed);
        }

        let frame = cipher::open_frame(&self.key, encrypted)?;
        if self.enforce_receive_id && frame.receive_id != self.receive_id {
            tracing::warn!("callback frame carries an unexpected receive id");
            return Err(CallbackError::VerificationFailed);
        }
        Ok(frame)
    }
}

impl std::fmt::Debug for CallbackDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackDecoder")
            .field("receive_id", &self.receive_id)
            .field("enforce_receive_id", &self.enforce_receive_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::wecom::cipher::encrypt_envelope;
    use crate::transport::wecom::envelope::{MessageKind, render_envelope, render_text_message};
    use crate::transport::wecom::signature::compute_signature;

    const TOKEN: &str = "callback-token";
    const AES_KEY: &str = "jWmYm7qr5nMoAUwZRjGtBxmz3KA1tkAj3ykkR6q2B2Z";
    const CORP_ID: &str = "ww0123456789";
    const TS: &str = "1700000000";
    const NONCE: &str = "nonce-1";

    fn decoder() -> CallbackDecoder {
        CallbackDecoder::new(
            TOKEN,
            CallbackKey::from_encoding_aes_key(AES_KEY).unwrap(),
            CORP_ID,
        )
    }

    fn seal(body: &str, receive_id: &str) -> String {
        let key = CallbackKey::from_encoding_aes_key(AES_KEY).unwrap();
        encrypt_envelope(&key, receive_id, body, [7u8; 16]).unwrap()
    }

    #[test]
    fn verify_returns_echo_plaintext() {
        let echo = seal("4212345678901234567", CORP_ID);
        let sig = compute_signature(TOKEN, TS, NONCE, &echo);
        assert_eq!(
            decoder().verify(&sig, TS, NONCE, &echo).unwrap(),
            "4212345678901234567"
        );
    }

    #[test]
    fn verify_with_bad_signature_fails_closed() {
        let echo = seal("hello", CORP_ID);
        let err = decoder().verify("deadbeef", TS, NONCE, &echo).unwrap_err();
        assert_eq!(err, CallbackError::VerificationFailed);
    }

    #[test]
    fn decode_returns_inner_message() {
        let inner = render_text_message(CORP_ID, "zhangsan", 1_700_000_000, "redis:7", "77");
        let encrypted = seal(&inner, CORP_ID);
        let body = render_envelope(CORP_ID, "1000002", &encrypted);
        let sig = compute_signature(TOKEN, TS, NONCE, &encrypted);

        let msg = decoder().decode(&body, &sig, TS, NONCE).unwrap();
        assert_eq!(msg.from_user, "zhangsan");
        assert_eq!(msg.msg_type, MessageKind::Text);
        assert_eq!(msg.content.as_deref(), Some("redis:7"));
    }

    #[test]
    fn decode_checks_signature_against_ciphertext() {
        let inner = render_text_message(CORP_ID, "zhangsan", 1, "x", "1");
        let encrypted = seal(&inner, CORP_ID);
        let body = render_envelope(CORP_ID, "1", &encrypted);
        let sig = compute_signature(TOKEN, TS, "other-nonce", &encrypted);

        assert_eq!(
            decoder().decode(&body, &sig, TS, NONCE).unwrap_err(),
            CallbackError::VerificationFailed
        );
    }

    #[test]
    fn decode_with_garbage_inner_document_is_decode_error() {
        let encrypted = seal("definitely not xml <", CORP_ID);
        let body = render_envelope(CORP_ID, "1", &encrypted);
        let sig = compute_signature(TOKEN, TS, NONCE, &encrypted);

        let err = decoder().decode(&body, &sig, TS, NONCE).unwrap_err();
        assert!(matches!(err, CallbackError::Decode(_)));
        assert!(!err.is_rejection());
    }

    #[test]
    fn receive_id_is_ignored_unless_enforced() {
        let echo = seal("hi", "ww-someone-else");
        let sig = compute_signature(TOKEN, TS, NONCE, &echo);

        assert_eq!(decoder().verify(&sig, TS, NONCE, &echo).unwrap(), "hi");
        assert_eq!(
            decoder()
                .with_receive_id_check(true)
                .verify(&sig, TS, NONCE, &echo)
                .unwrap_err(),
            CallbackError::VerificationFailed
        );
    }

    #[test]
    fn debug_output_hides_token() {
        let rendered = format!("{:?}", decoder());
        assert!(!rendered.contains(TOKEN));
    }
}
