use super::Config;
use crate::config::StorageConfig;

/// First non-empty value among the prefixed name and the legacy bare name.
fn env_value(name: &str) -> Option<String> {
    std::env::var(format!("WECOM_MIRROR_{name}"))
        .or_else(|_| std::env::var(name))
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl Config {
    pub fn apply_env_overrides(&mut self) {
        let string_fields: [(&str, &mut String); 10] = [
            ("TOKEN", &mut self.wecom.token),
            ("ENCODING_AES_KEY", &mut self.wecom.encoding_aes_key),
            ("CORP_ID", &mut self.wecom.corp_id),
            ("AGENT_ID", &mut self.wecom.agent_id),
            ("SECRET", &mut self.wecom.secret),
            ("GITHUB_TOKEN", &mut self.github.token),
            ("GITHUB_REPO", &mut self.github.repo),
            ("GITHUB_BRANCH", &mut self.github.branch),
            ("DOCKER_REGISTRY", &mut self.registry.registry),
            ("DOCKER_NAMESPACE", &mut self.registry.namespace),
        ];
        for (name, field) in string_fields {
            if let Some(value) = env_value(name) {
                *field = value;
            }
        }

        if let Some(proxy) = env_value("PROXY_URL") {
            self.network.proxy_url = Some(proxy);
        }

        if let Some(log_level) = env_value("LOG_LEVEL") {
            self.log_level = log_level;
        }

        if let Some(port_str) = env_value("PORT")
            && let Ok(port) = port_str.parse::<u16>()
        {
            self.gateway.port = port;
        }

        if let Some(host) = env_value("HOST") {
            self.gateway.host = host;
        }

        if self.storage.is_none()
            && let Some(access_key) = env_value("QINGSTOR_ACCESS_KEY_ID")
            && let Some(secret_key) = env_value("QINGSTOR_SECRET_ACCESS_KEY")
        {
            self.storage = Some(StorageConfig::with_credentials(access_key, secret_key));
        }

        if let Some(storage) = self.storage.as_mut() {
            if let Some(access_key) = env_value("QINGSTOR_ACCESS_KEY_ID") {
                storage.access_key_id = access_key;
            }
            if let Some(secret_key) = env_value("QINGSTOR_SECRET_ACCESS_KEY") {
                storage.secret_access_key = secret_key;
            }
            if let Some(zone) = env_value("QINGSTOR_ZONE") {
                storage.zone = zone;
            }
            if let Some(bucket) = env_value("QINGSTOR_BUCKET") {
                storage.bucket = bucket;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::core::test_env::{ENV_LOCK, EnvVarGuard};

    #[test]
    fn legacy_names_override_file_values() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _token = EnvVarGuard::set("TOKEN", "env-token");
        let _prefixed = EnvVarGuard::unset("WECOM_MIRROR_TOKEN");
        let _registry = EnvVarGuard::set("DOCKER_REGISTRY", "registry.example.com");
        let _registry_prefixed = EnvVarGuard::unset("WECOM_MIRROR_DOCKER_REGISTRY");

        let mut config = Config::default();
        config.wecom.token = "file-token".into();
        config.apply_env_overrides();

        assert_eq!(config.wecom.token, "env-token");
        assert_eq!(config.registry.registry, "registry.example.com");
    }

    #[test]
    fn prefixed_name_wins_over_legacy_name() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _legacy = EnvVarGuard::set("CORP_ID", "ww-legacy");
        let _prefixed = EnvVarGuard::set("WECOM_MIRROR_CORP_ID", "ww-prefixed");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.wecom.corp_id, "ww-prefixed");
    }

    #[test]
    fn empty_values_are_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _legacy = EnvVarGuard::set("GITHUB_BRANCH", "  ");
        let _prefixed = EnvVarGuard::unset("WECOM_MIRROR_GITHUB_BRANCH");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.github.branch, "main");
    }

    #[test]
    fn invalid_port_is_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _port = EnvVarGuard::set("PORT", "not-a-port");
        let _prefixed = EnvVarGuard::unset("WECOM_MIRROR_PORT");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.gateway.port, 3000);
    }

    #[test]
    fn storage_section_is_created_from_credentials() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _ak = EnvVarGuard::set("QINGSTOR_ACCESS_KEY_ID", "AK");
        let _sk = EnvVarGuard::set("QINGSTOR_SECRET_ACCESS_KEY", "SK");
        let _bucket = EnvVarGuard::set("QINGSTOR_BUCKET", "uploads");
        let _prefixed = [
            EnvVarGuard::unset("WECOM_MIRROR_QINGSTOR_ACCESS_KEY_ID"),
            EnvVarGuard::unset("WECOM_MIRROR_QINGSTOR_SECRET_ACCESS_KEY"),
            EnvVarGuard::unset("WECOM_MIRROR_QINGSTOR_BUCKET"),
        ];
        let _zone = EnvVarGuard::clear_override("QINGSTOR_ZONE");

        let mut config = Config::default();
        config.apply_env_overrides();

        let storage = config.storage.expect("storage configured from env");
        assert_eq!(storage.access_key_id, "AK");
        assert_eq!(storage.bucket, "uploads");
        assert_eq!(storage.zone, "pek3a");
    }

    #[test]
    fn storage_needs_both_credentials() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _ak = EnvVarGuard::set("QINGSTOR_ACCESS_KEY_ID", "AK");
        let _ak_prefixed = EnvVarGuard::unset("WECOM_MIRROR_QINGSTOR_ACCESS_KEY_ID");
        let _sk = EnvVarGuard::clear_override("QINGSTOR_SECRET_ACCESS_KEY");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert!(config.storage.is_none());
    }
}
