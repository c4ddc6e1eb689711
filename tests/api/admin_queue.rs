use std::collections::BTreeSet;

use serde_json::Value;
use wiremock::{
    Mock, ResponseTemplate,
    matchers::{any, method, path},
};

use crate::helpers::{spawn_app, subscriber_emails};

fn when_sending_a_batch() -> wiremock::MockBuilder {
    Mock::given(path("/v1/bulk-email")).and(method("POST"))
}

#[tokio::test]
async fn admin_routes_reject_missing_or_wrong_credentials() {
    let app = spawn_app().await;

    let anonymous = app
        .api_client
        .post(format!("{}/admin/queue", &app.address))
        .send()
        .await
        .unwrap();
    let wrong_password = app
        .api_client
        .post(format!("{}/admin/queue", &app.address))
        .basic_auth(&app.operator.username, Some("guess"))
        .send()
        .await
        .unwrap();

    for response in [anonymous, wrong_password] {
        assert_eq!(response.status().as_u16(), 401);
        assert_eq!(
            response.headers()["WWW-Authenticate"],
            r#"Basic realm="admin""#
        );
    }
}

#[tokio::test]
async fn a_full_cycle_sends_one_email_per_subscriber() {
    let app = spawn_app().await;
    app.confirmed_subscribers(3).await;
    app.publish(1).await;
    app.publish(2).await;

    when_sending_a_batch()
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&app.email_server)
        .await;

    let built: Value = app.build_queue().await.json().await.unwrap();
    assert_eq!(built["state"], "ready");
    assert_eq!(built["emails"], 3);
    assert_eq!(built["batches"], 2);

    let dispatched = app.dispatch_queue(false).await;
    assert_eq!(dispatched.status().as_u16(), 200);
    let dispatched: Value = dispatched.json().await.unwrap();
    assert_eq!(dispatched["state"], "completed");
    assert_eq!(dispatched["emails_sent"], 3);

    let recipients: BTreeSet<String> = app
        .email_server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .flat_map(subscriber_emails)
        .collect();
    assert_eq!(recipients.len(), 3);

    let statistics = app.queue_statistics().await;
    assert_eq!(statistics["state"], "empty");
    assert_eq!(statistics["sendable"], 0);
    assert_eq!(statistics["emails_sent"], 3);
}

#[tokio::test]
async fn a_failed_batch_is_retried_alone() {
    let app = spawn_app().await;
    app.confirmed_subscribers(4).await;
    app.publish(1).await;

    when_sending_a_batch()
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .expect(1)
        .mount(&app.email_server)
        .await;
    when_sending_a_batch()
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&app.email_server)
        .await;

    app.build_queue().await;
    let first: Value = app.dispatch_queue(false).await.json().await.unwrap();
    assert_eq!(first["state"], "partially_failed");
    assert_eq!(first["outcomes"][0]["state"], "failed");
    assert_eq!(first["outcomes"][1]["state"], "sent");

    let retry: Value = app.dispatch_queue(false).await.json().await.unwrap();
    assert_eq!(retry["state"], "completed");
    assert_eq!(retry["outcomes"].as_array().unwrap().len(), 1);
    assert_eq!(retry["outcomes"][0]["index"], 0);
}

#[tokio::test]
async fn a_pending_queue_must_be_dispatched_or_cleared_before_rebuilding() {
    let app = spawn_app().await;
    app.confirmed_subscribers(1).await;
    app.publish(1).await;

    assert_eq!(app.build_queue().await.status().as_u16(), 200);
    let rebuild = app.build_queue().await;
    assert_eq!(rebuild.status().as_u16(), 409);
    let body: Value = rebuild.json().await.unwrap();
    assert_eq!(body["reason"], "queue_pending");

    assert_eq!(app.clear_queue().await.status().as_u16(), 200);
    assert_eq!(app.build_queue().await.status().as_u16(), 200);
}

#[tokio::test]
async fn dispatching_without_a_queue_is_not_found() {
    let app = spawn_app().await;

    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&app.email_server)
        .await;

    let response = app.dispatch_queue(false).await;

    assert_eq!(response.status().as_u16(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["reason"], "queue_missing");
}

#[tokio::test]
async fn an_insufficient_quota_blocks_the_dispatch() {
    let app = spawn_app().await;
    app.confirmed_subscribers(3).await;
    app.publish(1).await;
    app.build_queue().await;

    Mock::given(path("/v1/api-quota"))
        .and(method("GET"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "quota": 100, "remaining": 1 })),
        )
        .mount(&app.email_server)
        .await;
    when_sending_a_batch()
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&app.email_server)
        .await;

    let response = app.dispatch_queue(true).await;

    assert_eq!(response.status().as_u16(), 429);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["reason"], "quota_exceeded");
    assert_eq!(app.queue_statistics().await["state"], "ready");
}

#[tokio::test]
async fn excluded_content_is_reported_as_blocked() {
    let app = spawn_app().await;
    app.confirmed_subscribers(2).await;
    app.publish(42).await;

    let built: Value = app.build_queue().await.json().await.unwrap();

    assert_eq!(built["state"], "completed");
    assert_eq!(built["batches"], 0);
    assert_eq!(built["blocked"][0]["reason"], "excluded");
    assert_eq!(app.queue_statistics().await["blocked"], 1);
}
