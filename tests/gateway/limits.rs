use reqwest::StatusCode;

use wecom_mirror::transport::wecom::seal_text_callback;

use crate::gateway_harness::MirrorTestServer;

#[tokio::test]
async fn delivery_without_signature_is_rejected() {
    let mut server = MirrorTestServer::start().await;
    let response = reqwest::Client::new()
        .post(server.callback_url())
        .body("<xml></xml>")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    server.stop().await;
    assert!(server.sent_messages().await.is_empty());
}

#[tokio::test]
async fn forged_delivery_never_reaches_collaborators() {
    let mut server = MirrorTestServer::start().await;
    let sealed =
        seal_text_callback(&server.config.wecom, "mallory", "nginx:latest", 1_700_000_000, "n")
            .unwrap();
    let response = reqwest::Client::new()
        .post(format!(
            "{}?msg_signature={}&timestamp=1700000001&nonce=n",
            server.callback_url(),
            sealed.msg_signature
        ))
        .body(sealed.body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    server.stop().await;

    assert!(server.sent_messages().await.is_empty());
    assert!(server.github.received_requests().await.unwrap().is_empty());
    assert!(!server.lock_path().exists());
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let mut server = MirrorTestServer::start().await;
    let body = "x".repeat(server.config.gateway.max_body_bytes + 1);
    let response = reqwest::Client::new()
        .post(format!(
            "{}?msg_signature=a&timestamp=1&nonce=n",
            server.callback_url()
        ))
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    server.stop().await;
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let mut server = MirrorTestServer::start().await;
    let response = reqwest::get(format!("{}/nope", server.base_url))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    server.stop().await;
}
