#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::oneshot;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wecom_mirror::config::{Config, LockBackend, StorageConfig};
use wecom_mirror::transport::gateway::{build_gateway_state, run_gateway_with_listener};

pub const AES_KEY: &str = "jWmYm7qr5nMoAUwZRjGtBxmz3KA1tkAj3ykkR6q2B2Z";
pub const CALLBACK_TOKEN: &str = "callback-token";
pub const PDF_BYTES: &[u8] = b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\nbody bytes";

/// Gateway on an ephemeral port with every outbound service mocked.
pub struct MirrorTestServer {
    pub base_url: String,
    pub config: Config,
    pub wecom: MockServer,
    pub github: MockServer,
    pub storage: MockServer,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<anyhow::Result<()>>>,
    _workspace: TempDir,
}

async fn mount_wecom(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/cgi-bin/gettoken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "errcode": 0,
            "errmsg": "ok",
            "access_token": "wecom-access-token",
            "expires_in": 7200,
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/cgi-bin/message/send"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"errcode": 0, "errmsg": "ok"})),
        )
        .mount(server)
        .await;
}

async fn mount_github(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/repos/acme/mirror/contents/images.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/repos/acme/mirror/contents/images.txt"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({})))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/mirror/actions/runs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "total_count": 1,
            "workflow_runs": [{
                "id": 7,
                "status": "completed",
                "conclusion": "success",
                "html_url": "https://github.com/acme/mirror/actions/runs/7",
                "created_at": chrono::Utc::now().to_rfc3339(),
            }],
        })))
        .mount(server)
        .await;
}

async fn mount_storage(server: &MockServer) {
    Mock::given(method("HEAD"))
        .and(path("/tmp"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/report.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PDF_BYTES))
        .mount(server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/tmp/report.pdf"))
        .respond_with(ResponseTemplate::new(201))
        .mount(server)
        .await;
}

impl MirrorTestServer {
    pub async fn start() -> Self {
        let workspace = TempDir::new().expect("temp workspace should be created");
        let wecom = MockServer::start().await;
        let github = MockServer::start().await;
        let storage = MockServer::start().await;
        mount_wecom(&wecom).await;
        mount_github(&github).await;
        mount_storage(&storage).await;

        let mut config = Config::default();
        config.config_path = workspace.path().join("config.toml");
        config.wecom.corp_id = "ww-corp".into();
        config.wecom.agent_id = "1000002".into();
        config.wecom.secret = "app-secret".into();
        config.wecom.token = CALLBACK_TOKEN.into();
        config.wecom.encoding_aes_key = AES_KEY.into();
        config.wecom.api_base = wecom.uri();
        config.github.token = "ghp_test".into();
        config.github.repo = "acme/mirror".into();
        config.github.api_base = github.uri();
        config.github.use_proxy = false;
        config.registry.registry = "registry.example.com".into();
        config.registry.namespace = "mirror".into();
        config.storage = Some(StorageConfig {
            endpoint: Some(storage.uri()),
            spool_dir: workspace.path().join("spool").display().to_string(),
            use_proxy: false,
            ..StorageConfig::with_credentials("AKID".into(), "SECRET".into())
        });
        config.sync.lock_backend = LockBackend::File;
        config.sync.lock_path = workspace.path().join("task.lock").display().to_string();
        config.sync.poll_interval_secs = 1;
        config.sync.watch_timeout_secs = 10;
        config.gateway.shutdown_grace_secs = 15;
        config.validate().expect("test config should validate");

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("ephemeral gateway listener should bind");
        let port = listener
            .local_addr()
            .expect("ephemeral gateway listener should expose local address")
            .port();

        let state = build_gateway_state(&config).expect("gateway state should build");
        let (tx, rx) = oneshot::channel();
        let gateway = config.gateway.clone();
        let handle = tokio::spawn(async move {
            run_gateway_with_listener(listener, &gateway, state, async {
                let _ = rx.await;
            })
            .await
        });

        let base_url = format!("http://127.0.0.1:{port}");
        wait_until_ready(&base_url).await;

        Self {
            base_url,
            config,
            wecom,
            github,
            storage,
            shutdown: Some(tx),
            handle: Some(handle),
            _workspace: workspace,
        }
    }

    pub fn callback_url(&self) -> String {
        format!("{}{}", self.base_url, self.config.gateway.callback_path)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.config.lock_path()
    }

    /// Stop accepting requests and wait for background jobs to drain.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle
                .await
                .expect("gateway task should not panic")
                .expect("gateway should stop cleanly");
        }
    }

    /// `(touser, content)` of every message the gateway sent.
    pub async fn sent_messages(&self) -> Vec<(String, String)> {
        self.wecom
            .received_requests()
            .await
            .expect("mock server should record received requests")
            .into_iter()
            .filter(|r| r.url.path() == "/cgi-bin/message/send")
            .map(|r| {
                let body: serde_json::Value =
                    serde_json::from_slice(&r.body).expect("send body should be JSON");
                (
                    body["touser"].as_str().unwrap_or_default().to_string(),
                    body["text"]["content"].as_str().unwrap_or_default().to_string(),
                )
            })
            .collect()
    }
}

impl Drop for MirrorTestServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn wait_until_ready(base_url: &str) {
    let client = reqwest::Client::new();
    for _ in 0..50 {
        if let Ok(response) = client.get(format!("{base_url}/health")).send().await
            && response.status().is_success()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("gateway did not become ready at {base_url}");
}
