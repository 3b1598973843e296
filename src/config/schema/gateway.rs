use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway port (default: 3000)
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Gateway host (default: 0.0.0.0; the platform must reach it)
    #[serde(default = "default_gateway_host")]
    pub host: String,
    /// Path serving both callback modes (GET verification, POST delivery)
    #[serde(default = "default_callback_path")]
    pub callback_path: String,
    /// Maximum request body size in bytes (default: 64KB)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Request timeout for the synchronous acknowledgment path (default: 30s)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// How long background jobs may keep running after shutdown starts
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_gateway_port() -> u16 {
    3000
}

fn default_gateway_host() -> String {
    "0.0.0.0".into()
}

fn default_callback_path() -> String {
    "/wechat/callback".into()
}

fn default_max_body_bytes() -> usize {
    65_536
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            host: default_gateway_host(),
            callback_path: default_callback_path(),
            max_body_bytes: default_max_body_bytes(),
            request_timeout_secs: default_request_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_gateway_config() {
        let config = GatewayConfig::default();

        assert_eq!(config.port, 3000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.callback_path, "/wechat/callback");
        assert_eq!(config.max_body_bytes, 65_536);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn gateway_config_toml_round_trip() {
        let original = GatewayConfig {
            port: 4001,
            host: "127.0.0.1".into(),
            callback_path: "/hooks/wecom".into(),
            max_body_bytes: 1024,
            request_timeout_secs: 10,
            shutdown_grace_secs: 1,
        };

        let toml = toml::to_string(&original).unwrap();
        let decoded: GatewayConfig = toml::from_str(&toml).unwrap();

        assert_eq!(decoded.port, original.port);
        assert_eq!(decoded.host, original.host);
        assert_eq!(decoded.callback_path, original.callback_path);
        assert_eq!(decoded.max_body_bytes, original.max_body_bytes);
        assert_eq!(decoded.request_timeout_secs, original.request_timeout_secs);
        assert_eq!(decoded.shutdown_grace_secs, original.shutdown_grace_secs);
    }

    #[test]
    fn partial_table_uses_defaults() {
        let decoded: GatewayConfig = toml::from_str("port = 8088").unwrap();
        assert_eq!(decoded.port, 8088);
        assert_eq!(decoded.callback_path, "/wechat/callback");
    }
}
