use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `wecom-mirror`.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide how a failure surfaces (HTTP status, user notification,
/// log line); internal code continues to use `anyhow::Result` for ad-hoc
/// context chains.
#[derive(Debug, Error)]
pub enum MirrorError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Inbound callbacks ───────────────────────────────────────────────
    #[error("callback: {0}")]
    Callback(#[from] CallbackError),

    // ── Image-sync dispatcher ───────────────────────────────────────────
    #[error("dispatch: {0}")]
    Dispatch(#[from] DispatchError),

    // ── Object upload ───────────────────────────────────────────────────
    #[error("upload: {0}")]
    Upload(#[from] UploadError),

    // ── Messaging platform ──────────────────────────────────────────────
    #[error("messaging: {0}")]
    Messaging(#[from] MessagingError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Callback errors ─────────────────────────────────────────────────────────

/// Failures while authenticating and opening an inbound callback.
///
/// Messages carry enough detail to diagnose a bad deployment but never key
/// material or decrypted plaintext.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CallbackError {
    #[error("signature verification failed")]
    VerificationFailed,

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("malformed frame: {0}")]
    Framing(String),

    #[error("malformed message: {0}")]
    Decode(String),
}

impl CallbackError {
    /// Whether the failure means the request itself is not trustworthy
    /// (as opposed to an authenticated message we cannot interpret).
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::Decode(_))
    }
}

// ─── Dispatcher errors ───────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{operation} request failed: {message}")]
    Request { operation: String, message: String },

    #[error("{operation} returned HTTP {status}: {message}")]
    Api {
        operation: String,
        status: u16,
        message: String,
    },

    #[error("{operation} returned an unexpected payload: {message}")]
    Payload { operation: String, message: String },
}

// ─── Upload errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("object storage is not configured")]
    NotConfigured,

    #[error("download failed: {0}")]
    Download(String),

    #[error("storage request failed: {0}")]
    Storage(String),
}

// ─── Messaging errors ────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("access token request failed: {0}")]
    Token(String),

    #[error("send failed: {0}")]
    Send(String),
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, MirrorError>;
