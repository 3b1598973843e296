use serde::{Deserialize, Serialize};

/// QingStor-compatible object storage used for URL uploads.
///
/// The whole section is optional; without it, URL messages are answered with
/// a "not configured" notice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default = "default_zone")]
    pub zone: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// API endpoint; defaults to `https://<zone>.qingstor.com`
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Directory downloads are staged in before upload
    #[serde(default = "default_spool_dir")]
    pub spool_dir: String,
    /// Route downloads (not uploads) through `network.proxy_url`
    #[serde(default = "default_true")]
    pub use_proxy: bool,
}

fn default_zone() -> String {
    "pek3a".into()
}

fn default_bucket() -> String {
    "tmp".into()
}

fn default_spool_dir() -> String {
    "tmp".into()
}

fn default_true() -> bool {
    true
}

impl StorageConfig {
    pub fn with_credentials(access_key_id: String, secret_access_key: String) -> Self {
        Self {
            access_key_id,
            secret_access_key,
            zone: default_zone(),
            bucket: default_bucket(),
            endpoint: None,
            spool_dir: default_spool_dir(),
            use_proxy: true,
        }
    }

    pub fn endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{}.qingstor.com", self.zone))
    }

    /// Public URL an uploaded object is served from.
    pub fn public_url(&self, object_key: &str) -> String {
        format!("https://{}.{}.qingstor.com/{object_key}", self.bucket, self.zone)
    }
}

/// Outbound network settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Proxy for destinations that opt in via their `use_proxy` flag
    #[serde(default)]
    pub proxy_url: Option<String>,
}
