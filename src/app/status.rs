use chrono::{DateTime, Utc};
use std::time::Duration;
use wecom_mirror::Config;
use wecom_mirror::sync::TaskLockRecord;

fn secret_state(value: &str) -> String {
    if value.trim().is_empty() {
        "(missing)".to_string()
    } else {
        format!("set ({} chars)", value.chars().count())
    }
}

fn or_unset(value: &str) -> &str {
    if value.trim().is_empty() { "(unset)" } else { value }
}

/// Configuration summary with every credential replaced by its presence.
pub fn render_config_summary(config: &Config) -> String {
    let mut lines = vec![
        format!("wecom-mirror {}", env!("CARGO_PKG_VERSION")),
        String::new(),
        format!("config      {}", config.config_path.display()),
        format!("log level   {}", config.log_level),
        String::new(),
        format!(
            "gateway     {}:{}{}",
            config.gateway.host, config.gateway.port, config.gateway.callback_path
        ),
        format!("  corp id           {}", or_unset(&config.wecom.corp_id)),
        format!("  agent id          {}", or_unset(&config.wecom.agent_id)),
        format!("  token             {}", secret_state(&config.wecom.token)),
        format!("  encoding aes key  {}", secret_state(&config.wecom.encoding_aes_key)),
        format!("  app secret        {}", secret_state(&config.wecom.secret)),
        String::new(),
        format!(
            "github      {} @ {} ({})",
            or_unset(&config.github.repo),
            config.github.branch,
            config.github.file_path
        ),
        format!(
            "  trigger           {}",
            config
                .github
                .workflow
                .as_deref()
                .map_or_else(|| "marker commit".to_string(), |w| format!("workflow_dispatch {w}"))
        ),
        format!("  token             {}", secret_state(&config.github.token)),
        format!(
            "registry    {}/{}",
            config.registry.registry, config.registry.namespace
        ),
    ];

    match config.storage.as_ref() {
        Some(storage) => {
            lines.push(format!(
                "storage     {} in {} via {}",
                storage.bucket,
                storage.zone,
                storage.endpoint()
            ));
            lines.push(format!("  access key        {}", secret_state(&storage.access_key_id)));
            lines.push(format!("  secret key        {}", secret_state(&storage.secret_access_key)));
        }
        None => lines.push("storage     (not configured, uploads disabled)".to_string()),
    }

    lines.push(format!(
        "sync        lock {} at {} ({}s), dedup {}s, poll {}s, watch {}s",
        config.sync.lock_backend,
        config.lock_path().display(),
        config.sync.lock_timeout_secs,
        config.sync.dedup_window_secs,
        config.sync.poll_interval_secs,
        config.sync.watch_timeout_secs
    ));
    lines.push(format!(
        "proxy       {}",
        config
            .network
            .proxy_url
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or("(none)")
    ));
    lines.join("\n")
}

pub fn render_lock_status(
    holder: Option<&TaskLockRecord>,
    now: DateTime<Utc>,
    timeout: Duration,
) -> String {
    let Some(record) = holder else {
        return "Task lock is free".to_string();
    };
    let age = record.age(now).num_seconds();
    let expiry = if record.is_expired(now, timeout) {
        "expired, next acquire reclaims it".to_string()
    } else {
        format!(
            "expires in {}s",
            i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX).saturating_sub(age)
        )
    };
    format!(
        "Task lock held by {} since {} ({age}s, {expiry})",
        record.owner_id,
        record.acquired_at.to_rfc3339()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use wecom_mirror::config::StorageConfig;

    #[test]
    fn summary_never_prints_secrets() {
        let mut config = Config::default();
        config.wecom.token = "tok-very-secret".into();
        config.wecom.secret = "app-very-secret".into();
        config.github.token = "ghp_very_secret".into();
        config.storage = Some(StorageConfig::with_credentials(
            "AKID-secret".into(),
            "SK-secret".into(),
        ));

        let summary = render_config_summary(&config);
        for secret in ["tok-very-secret", "app-very-secret", "ghp_very_secret", "AKID-secret", "SK-secret"] {
            assert!(!summary.contains(secret), "leaked {secret}");
        }
        assert!(summary.contains("set (15 chars)"));
        assert!(summary.contains("marker commit"));
    }

    #[test]
    fn summary_reports_disabled_uploads() {
        let summary = render_config_summary(&Config::default());
        assert!(summary.contains("uploads disabled"));
        assert!(summary.contains("(missing)"));
    }

    #[test]
    fn lock_status_variants() {
        let now = DateTime::from_timestamp(1_704_067_500, 0).unwrap();
        let timeout = Duration::from_secs(300);
        assert_eq!(render_lock_status(None, now, timeout), "Task lock is free");

        let fresh = TaskLockRecord {
            acquired_at: DateTime::from_timestamp(1_704_067_400, 0).unwrap(),
            owner_id: "host:42".into(),
        };
        let text = render_lock_status(Some(&fresh), now, timeout);
        assert!(text.contains("host:42"));
        assert!(text.contains("expires in 200s"));

        let stale = TaskLockRecord {
            acquired_at: DateTime::from_timestamp(1_704_067_000, 0).unwrap(),
            owner_id: "host:7".into(),
        };
        assert!(render_lock_status(Some(&stale), now, timeout).contains("expired"));
    }
}
