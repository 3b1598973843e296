use super::super::{
    GatewayConfig, GithubConfig, NetworkConfig, RegistryConfig, StorageConfig, SyncConfig,
    WecomConfig,
};
use crate::error::ConfigError;
use crate::transport::wecom::cipher::{CallbackKey, ENCODED_KEY_LEN};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path the config was loaded from - not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Max tracing level (`trace`, `debug`, `info`, `warn`, `error`)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub wecom: WecomConfig,

    #[serde(default)]
    pub github: GithubConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    /// Upload handling is disabled when this section is absent
    #[serde(default)]
    pub storage: Option<StorageConfig>,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub network: NetworkConfig,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: Self::default_path(),
            log_level: default_log_level(),
            gateway: GatewayConfig::default(),
            wecom: WecomConfig::default(),
            github: GithubConfig::default(),
            registry: RegistryConfig::default(),
            storage: None,
            sync: SyncConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

impl Config {
    /// `~/.wecom-mirror/config.toml`, or `./config.toml` without a home dir.
    pub fn default_path() -> PathBuf {
        UserDirs::new().map_or_else(
            || PathBuf::from("config.toml"),
            |u| u.home_dir().join(".wecom-mirror").join("config.toml"),
        )
    }

    pub fn lock_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.sync.lock_path).into_owned())
    }

    pub fn spool_dir(&self) -> Option<PathBuf> {
        self.storage
            .as_ref()
            .map(|s| PathBuf::from(shellexpand::tilde(&s.spool_dir).into_owned()))
    }

    /// Proxy for a destination that opted in, if one is configured.
    pub fn proxy_for(&self, use_proxy: bool) -> Option<&str> {
        if !use_proxy {
            return None;
        }
        self.network
            .proxy_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wecom.token.trim().is_empty() {
            return Err(ConfigError::Validation("wecom.token must not be empty".into()));
        }
        if self.wecom.encoding_aes_key.len() != ENCODED_KEY_LEN {
            return Err(ConfigError::Validation(format!(
                "wecom.encoding_aes_key must be {ENCODED_KEY_LEN} characters (got {})",
                self.wecom.encoding_aes_key.len()
            )));
        }
        CallbackKey::from_encoding_aes_key(&self.wecom.encoding_aes_key)
            .map_err(|e| ConfigError::Validation(format!("wecom.encoding_aes_key: {e}")))?;
        if self.wecom.corp_id.trim().is_empty() {
            return Err(ConfigError::Validation("wecom.corp_id must not be empty".into()));
        }
        if self.wecom.agent_id.parse::<u64>().is_err() {
            return Err(ConfigError::Validation(format!(
                "wecom.agent_id must be numeric (got {:?})",
                self.wecom.agent_id
            )));
        }
        if self.sync.lock_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "sync.lock_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.sync.poll_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "sync.poll_interval_secs must be greater than 0".into(),
            ));
        }
        if self.sync.dedup_window_secs == 0 {
            return Err(ConfigError::Validation(
                "sync.dedup_window_secs must be greater than 0".into(),
            ));
        }
        if let Some(proxy) = self.network.proxy_url.as_deref()
            && !proxy.trim().is_empty()
            && url::Url::parse(proxy.trim()).is_err()
        {
            return Err(ConfigError::Validation(format!(
                "network.proxy_url is not a valid URL: {proxy}"
            )));
        }
        Ok(())
    }
}
