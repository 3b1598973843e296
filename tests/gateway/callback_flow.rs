use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::StatusCode;

use wecom_mirror::sync::messages;
use wecom_mirror::transport::wecom::cipher::{CallbackKey, encrypt_envelope, random_padding};
use wecom_mirror::transport::wecom::seal_text_callback;
use wecom_mirror::transport::wecom::signature::compute_signature;

use crate::gateway_harness::{AES_KEY, CALLBACK_TOKEN, MirrorTestServer, PDF_BYTES};

async fn post_text(server: &MirrorTestServer, from: &str, content: &str) -> reqwest::Response {
    let sealed = seal_text_callback(&server.config.wecom, from, content, 1_700_000_000, "n0nce")
        .expect("callback should seal");
    reqwest::Client::new()
        .post(format!("{}?{}", server.callback_url(), sealed.query()))
        .header("Content-Type", "text/xml")
        .body(sealed.body)
        .send()
        .await
        .expect("delivery request should complete")
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let mut server = MirrorTestServer::start().await;
    let response = reqwest::get(format!("{}/health", server.base_url))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, serde_json::json!({"status": "ok"}));
    server.stop().await;
}

#[tokio::test]
async fn url_verification_echoes_plaintext() {
    let mut server = MirrorTestServer::start().await;
    let key = CallbackKey::from_encoding_aes_key(AES_KEY).unwrap();
    let echo = encrypt_envelope(&key, "ww-corp", "4204627891863522941", random_padding()).unwrap();
    let signature = compute_signature(CALLBACK_TOKEN, "1700000000", "abc", &echo);

    let response = reqwest::Client::new()
        .get(server.callback_url())
        .query(&[
            ("msg_signature", signature.as_str()),
            ("timestamp", "1700000000"),
            ("nonce", "abc"),
            ("echostr", echo.as_str()),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "4204627891863522941");

    let rejected = reqwest::Client::new()
        .get(server.callback_url())
        .query(&[
            ("msg_signature", "0000"),
            ("timestamp", "1700000000"),
            ("nonce", "abc"),
            ("echostr", echo.as_str()),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
    server.stop().await;
}

#[tokio::test]
async fn image_list_is_committed_triggered_and_reported() {
    let mut server = MirrorTestServer::start().await;

    let response = post_text(&server, "alice", "nginx:latest\nredis:7\n").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "success");

    server.stop().await;

    let puts: Vec<serde_json::Value> = server
        .github
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.method.as_str() == "PUT")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();
    assert_eq!(puts.len(), 2, "list update plus trigger marker");
    assert_eq!(puts[0]["message"], "Add 2 images");
    let list = STANDARD
        .decode(puts[0]["content"].as_str().unwrap())
        .unwrap();
    assert_eq!(String::from_utf8(list).unwrap(), "nginx:latest\nredis:7\n");
    assert_eq!(puts[1]["message"], "Trigger sync");

    let sent = server.sent_messages().await;
    let texts: Vec<&str> = sent
        .iter()
        .inspect(|(to, _)| assert_eq!(to, "alice"))
        .map(|(_, text)| text.as_str())
        .collect();
    assert_eq!(texts.len(), 3, "accepted, submitted, finished: {texts:?}");
    assert!(texts[0].contains("nginx:latest → registry.example.com/mirror/nginx:latest"));
    assert!(texts[0].contains("redis:7 → registry.example.com/mirror/redis:7"));
    assert_eq!(texts[1], messages::sync_submitted(2));
    assert_eq!(
        texts[2],
        messages::run_succeeded("https://github.com/acme/mirror/actions/runs/7")
    );
    assert!(!server.lock_path().exists());
}

#[tokio::test]
async fn link_is_downloaded_and_stored() {
    let mut server = MirrorTestServer::start().await;
    let link = format!("{}/files/report.pdf", server.storage.uri());

    let response = post_text(&server, "bob", &link).await;
    assert_eq!(response.status(), StatusCode::OK);
    server.stop().await;

    let put = server
        .storage
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.method.as_str() == "PUT")
        .expect("object should be stored");
    assert_eq!(put.url.path(), "/tmp/report.pdf");
    assert_eq!(put.body, PDF_BYTES);

    let sent = server.sent_messages().await;
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0], ("bob".to_string(), messages::upload_started(&link)));
    assert!(sent[1].1.contains("https://tmp.pek3a.qingstor.com/report.pdf"));
    assert!(
        server
            .github
            .received_requests()
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn retried_delivery_is_processed_once() {
    let mut server = MirrorTestServer::start().await;
    let first = post_text(&server, "carol", "# nothing to mirror").await;
    let second = post_text(&server, "carol", "# nothing to mirror").await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);
    server.stop().await;

    let sent = server.sent_messages().await;
    assert_eq!(sent, vec![("carol".to_string(), messages::help())]);
}
