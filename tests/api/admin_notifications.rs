use reqwest::Method;
use serde_json::Value;
use uuid::Uuid;

use crate::helpers::{post, spawn_app};

fn status_of(notifications: &[Value], content_id: i64) -> Value {
    notifications
        .iter()
        .find(|n| n["content_id"] == content_id)
        .map(|n| n["status"].clone())
        .unwrap()
}

async fn id_of(app: &crate::helpers::TestApp, content_id: i64) -> String {
    app.list_notifications()
        .await
        .into_iter()
        .find(|n| n["content_id"] == content_id)
        .map(|n| n["id"].as_str().unwrap().to_string())
        .unwrap()
}

#[tokio::test]
async fn enqueueing_the_same_content_twice_keeps_one_notification() {
    let app = spawn_app().await;
    app.store.put_content(post(1)).await;

    let first: Value = app.enqueue(1).await.json().await.unwrap();
    let second: Value = app.enqueue(1).await.json().await.unwrap();

    assert_eq!(first["id"], second["id"]);
    assert_eq!(app.list_notifications().await.len(), 1);
}

#[tokio::test]
async fn paused_notifications_are_left_out_until_unpaused() {
    let app = spawn_app().await;
    app.confirmed_subscribers(1).await;
    app.publish(1).await;
    let id = id_of(&app, 1).await;

    let paused = app
        .manage_notification(Method::POST, &format!("/{id}/pause"))
        .await;
    assert_eq!(paused.status().as_u16(), 204);
    assert_eq!(status_of(&app.list_notifications().await, 1), "paused");

    let built: Value = app.build_queue().await.json().await.unwrap();
    assert_eq!(built["batches"], 0);

    app.manage_notification(Method::POST, &format!("/{id}/unpause"))
        .await;
    assert_eq!(status_of(&app.list_notifications().await, 1), "ready");
}

#[tokio::test]
async fn deleted_content_shows_as_blocked() {
    let app = spawn_app().await;
    app.publish(1).await;
    app.store.remove_content(1).await;

    let notifications = app.list_notifications().await;

    assert_eq!(status_of(&notifications, 1), "blocked");
    assert_eq!(notifications[0]["reason"], "deleted");
}

#[tokio::test]
async fn unknown_notifications_are_not_found() {
    let app = spawn_app().await;
    let id = Uuid::new_v4();

    for (method, path) in [
        (Method::POST, format!("/{id}/pause")),
        (Method::POST, format!("/{id}/unsent")),
        (Method::DELETE, format!("/{id}")),
    ] {
        let response = app.manage_notification(method, &path).await;
        assert_eq!(response.status().as_u16(), 404);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["reason"], "not_found");
    }
}

#[tokio::test]
async fn removing_sent_notifications_keeps_the_rest() {
    let app = spawn_app().await;
    app.publish(1).await;
    app.publish(2).await;
    let sent = id_of(&app, 1).await;
    let sent: Uuid = sent.parse().unwrap();
    herald::store::NotificationStore::set_last_sent(
        app.store.as_ref(),
        &[sent],
        Some(chrono::Utc::now()),
    )
    .await
    .unwrap();

    let response = app.manage_notification(Method::DELETE, "/sent").await;

    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["removed"], 1);
    let remaining = app.list_notifications().await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0]["content_id"], 2);
}
