//! Failure alerts sent when a job reaches `error`.

mod common;

use common::{tagged_wav, TestHarness};
use stemforged::config::{SlackConfig, TelegramConfig};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn terminal_failure_alerts_every_target() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/slack-hook"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .named("slack")
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/botsecret/sendMessage"))
        .and(body_partial_json(serde_json::json!({ "chat_id": "42" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .named("telegram")
        .mount(&server)
        .await;

    let mut config = TestHarness::test_config();
    config.notifications.slack = Some(SlackConfig {
        webhook_url: format!("{}/slack-hook", server.uri()),
    });
    config.notifications.telegram = Some(TelegramConfig {
        bot_token: "secret".into(),
        chat_id: "42".into(),
        api_url: server.uri(),
    });
    let h = TestHarness::with_config(config);

    let src = h.data_path().join("broken.wav");
    std::fs::write(&src, b"not a wav").unwrap();
    stemforged::pipeline::enqueue_file(
        &h.pipeline,
        stemforged::pipeline::IntakeRequest::new("broken.wav", stemforged_common::JobSource::Cli),
        &src,
    )
    .await
    .unwrap();
    h.drain().await;

    let requests = server.received_requests().await.unwrap();
    let slack: serde_json::Value = requests
        .iter()
        .find(|r| r.url.path() == "/slack-hook")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .unwrap();
    let text = slack["text"].as_str().unwrap();
    assert!(text.starts_with("metadata FAILED: broken.wav\n"));
    assert!(text.contains("Unreadable audio file"));
}

#[tokio::test]
async fn successful_jobs_send_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = TestHarness::test_config();
    config.notifications.slack = Some(SlackConfig {
        webhook_url: format!("{}/slack-hook", server.uri()),
    });
    let h = TestHarness::with_config(config);

    let src = h.data_path().join("fine.wav");
    tagged_wav(&src, "A", "B", "Fine");
    stemforged::pipeline::enqueue_file(
        &h.pipeline,
        stemforged::pipeline::IntakeRequest::new("fine.wav", stemforged_common::JobSource::Cli),
        &src,
    )
    .await
    .unwrap();
    h.drain().await;
}
