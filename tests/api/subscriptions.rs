use herald::domain::ConfirmationState;
use serde_json::json;
use wiremock::{
    Mock, ResponseTemplate,
    matchers::{method, path},
};

use crate::helpers::spawn_app;

#[tokio::test]
async fn subscribe_returns_200_and_sends_a_confirmation_email() {
    let app = spawn_app().await;

    Mock::given(path("/v1/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.email_server)
        .await;

    let response = app
        .post_subscription(&json!({ "email": "ursula_le_guin@gmail.com", "everything": true }))
        .await;

    assert_eq!(200, response.status().as_u16());
    let saved = app.store.subscribers().await;
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].email.as_ref(), "ursula_le_guin@gmail.com");
    assert_eq!(saved[0].confirmation, ConfirmationState::Unconfirmed);
}

#[tokio::test]
async fn subscribe_returns_400_for_invalid_data() {
    let app = spawn_app().await;
    let test_cases = vec![
        (json!({ "email": "definitely-not-an-email", "everything": true }), "invalid email"),
        (json!({ "email": "ursula@gmail.com" }), "empty scope"),
        (
            json!({ "email": "ursula@gmail.com", "content_types": ["podcast"] }),
            "unsupported content type",
        ),
    ];

    for (body, description) in test_cases {
        let response = app.post_subscription(&body).await;

        assert_eq!(
            400,
            response.status().as_u16(),
            "The API did not return a 400 Bad Request when the payload had an {}.",
            description
        );
        let reason: serde_json::Value = response.json().await.unwrap();
        assert_eq!(reason["reason"], "validation_failed");
    }
    assert!(app.store.subscribers().await.is_empty());
}

#[tokio::test]
async fn a_known_email_gets_the_same_reply_without_its_code() {
    let app = spawn_app().await;
    Mock::given(path("/v1/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&app.email_server)
        .await;
    let body = json!({ "email": "ursula@gmail.com", "everything": true });

    let first = app.post_subscription(&body).await;
    let second = app
        .post_subscription(&json!({ "email": "ursula@gmail.com", "content_types": ["story"] }))
        .await;

    assert_eq!(first.status().as_u16(), 200);
    assert_eq!(second.status().as_u16(), 200);
    let saved = app.store.subscribers().await;
    assert_eq!(saved.len(), 1);
    assert!(saved[0].scope.everything);
}

#[tokio::test]
async fn subscribe_fails_and_stores_nothing_if_the_confirmation_cannot_be_sent() {
    let app = spawn_app().await;
    Mock::given(path("/v1/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&app.email_server)
        .await;

    let response = app
        .post_subscription(&json!({ "email": "ursula@gmail.com", "everything": true }))
        .await;

    assert_eq!(response.status().as_u16(), 500);
    assert!(app.store.subscribers().await.is_empty());
}

#[tokio::test]
async fn the_link_in_the_confirmation_email_confirms_the_subscriber() {
    let app = spawn_app().await;
    Mock::given(path("/v1/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&app.email_server)
        .await;

    app.post_subscription(&json!({ "email": "ursula@gmail.com", "everything": true }))
        .await;
    let email_request = &app.email_server.received_requests().await.unwrap()[0];
    let confirmation_links = app.get_confirmation_links(email_request);

    let response = reqwest::get(confirmation_links.html).await.unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let saved = app.store.subscribers().await;
    assert_eq!(saved[0].confirmation, ConfirmationState::Confirmed);
}

#[tokio::test]
async fn confirm_and_unsubscribe_reject_a_wrong_code() {
    let app = spawn_app().await;
    Mock::given(path("/v1/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&app.email_server)
        .await;
    app.post_subscription(&json!({ "email": "ursula@gmail.com", "everything": true }))
        .await;

    for route in ["confirm", "unsubscribe"] {
        let response = app
            .api_client
            .get(format!("{}/subscriptions/{route}", &app.address))
            .query(&[("email", "ursula@gmail.com"), ("code", "not-the-code")])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 401);
    }
    assert_eq!(app.store.subscribers().await.len(), 1);
}

#[tokio::test]
async fn unsubscribing_with_the_code_removes_the_subscriber() {
    let app = spawn_app().await;
    Mock::given(path("/v1/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&app.email_server)
        .await;
    app.post_subscription(&json!({ "email": "ursula@gmail.com", "everything": true }))
        .await;
    let code = app.store.subscribers().await[0].code.as_ref().to_string();

    let response = app
        .api_client
        .get(format!("{}/subscriptions/unsubscribe", &app.address))
        .query(&[("email", "ursula@gmail.com"), ("code", code.as_str())])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    assert!(app.store.subscribers().await.is_empty());
}

#[tokio::test]
async fn the_edit_link_in_the_confirmation_email_shows_the_subscription() {
    let app = spawn_app().await;
    Mock::given(path("/v1/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&app.email_server)
        .await;

    app.post_subscription(&json!({ "email": "ursula@gmail.com", "content_types": ["post"] }))
        .await;
    let email_request = &app.email_server.received_requests().await.unwrap()[0];
    let edit_link = app.get_link(email_request, "/subscriptions?");

    let response = reqwest::get(edit_link).await.unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let details: serde_json::Value = response.json().await.unwrap();
    assert_eq!(details["email"], "ursula@gmail.com");
    assert_eq!(details["confirmed"], false);
    assert_eq!(details["everything"], false);
    assert_eq!(details["content_types"], json!(["post"]));
}

#[tokio::test]
async fn the_edit_view_rejects_a_wrong_code() {
    let app = spawn_app().await;
    Mock::given(path("/v1/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&app.email_server)
        .await;
    app.post_subscription(&json!({ "email": "ursula@gmail.com", "everything": true }))
        .await;

    let response = app
        .api_client
        .get(format!("{}/subscriptions", &app.address))
        .query(&[("email", "ursula@gmail.com"), ("code", "not-the-code")])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 401);
}
