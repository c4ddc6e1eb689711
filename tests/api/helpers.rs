use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use herald::{
    configuration::get_configuration,
    domain::{
        ConfirmationState, ContentId, ContentItem, NewSubscriber, PublishStatus, SubscriberEmail,
        SubscriberScope,
    },
    startup::Application,
    store::{InMemoryStore, Stores},
    telemetry::{get_subscriber, init_subscriber},
};
use once_cell::sync::Lazy;
use wiremock::MockServer;

static TRACING: Lazy<()> = Lazy::new(|| {
    let default_filter_level = "info".to_string();
    let subscriber_name = "test".to_string();

    if std::env::var("TEST_LOG").is_ok() {
        let subscriber = get_subscriber(subscriber_name, default_filter_level, std::io::stdout);
        init_subscriber(subscriber);
    } else {
        let subscriber = get_subscriber(subscriber_name, default_filter_level, std::io::sink);
        init_subscriber(subscriber);
    }
});

pub struct TestOperator {
    pub username: String,
    pub password: String,
}

pub struct ConfirmationLinks {
    pub html: reqwest::Url,
}

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub store: Arc<InMemoryStore>,
    pub email_server: MockServer,
    pub api_client: reqwest::Client,
    pub operator: TestOperator,
}

impl TestApp {
    pub async fn post_subscription(&self, body: &serde_json::Value) -> reqwest::Response {
        self.api_client
            .post(format!("{}/subscriptions", &self.address))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    /// The one link in the email whose URL contains `route`, pointed at the test server.
    pub fn get_link(&self, email_request: &wiremock::Request, route: &str) -> reqwest::Url {
        let body: serde_json::Value = serde_json::from_slice(&email_request.body).unwrap();
        let links: Vec<_> = linkify::LinkFinder::new()
            .links(body["html"].as_str().unwrap())
            .filter(|l| *l.kind() == linkify::LinkKind::Url)
            .map(|l| l.as_str().replace("&amp;", "&"))
            .filter(|l| l.contains(route))
            .collect();
        assert_eq!(links.len(), 1);

        let mut link = reqwest::Url::parse(&links[0]).unwrap();
        assert_eq!(link.host_str().unwrap(), "127.0.0.1");
        link.set_port(Some(self.port)).unwrap();
        link
    }

    pub fn get_confirmation_links(&self, email_request: &wiremock::Request) -> ConfirmationLinks {
        ConfirmationLinks {
            html: self.get_link(email_request, "/subscriptions/confirm"),
        }
    }

    fn admin(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.api_client
            .request(method, format!("{}/admin{}", &self.address, path))
            .basic_auth(&self.operator.username, Some(&self.operator.password))
    }

    pub async fn build_queue(&self) -> reqwest::Response {
        self.admin(reqwest::Method::POST, "/queue")
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn dispatch_queue(&self, check_quota: bool) -> reqwest::Response {
        self.admin(reqwest::Method::POST, "/queue/dispatch")
            .query(&[("check_quota", check_quota)])
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn clear_queue(&self) -> reqwest::Response {
        self.admin(reqwest::Method::DELETE, "/queue")
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn queue_statistics(&self) -> serde_json::Value {
        self.admin(reqwest::Method::GET, "/queue/statistics")
            .send()
            .await
            .expect("Failed to execute request.")
            .json()
            .await
            .unwrap()
    }

    pub async fn enqueue(&self, content_id: ContentId) -> reqwest::Response {
        self.admin(reqwest::Method::POST, "/notifications")
            .json(&serde_json::json!({ "content_id": content_id }))
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn list_notifications(&self) -> Vec<serde_json::Value> {
        self.admin(reqwest::Method::GET, "/notifications")
            .send()
            .await
            .expect("Failed to execute request.")
            .json()
            .await
            .unwrap()
    }

    pub async fn manage_notification(
        &self,
        method: reqwest::Method,
        path: &str,
    ) -> reqwest::Response {
        self.admin(method, &format!("/notifications{path}"))
            .send()
            .await
            .expect("Failed to execute request.")
    }

    /// A published post with its notification enqueued.
    pub async fn publish(&self, content_id: ContentId) {
        self.store.put_content(post(content_id)).await;
        let response = self.enqueue(content_id).await;
        assert_eq!(response.status().as_u16(), 200);
    }

    pub async fn confirmed_subscribers(&self, n: usize) {
        for i in 0..n {
            let mut subscriber = NewSubscriber {
                email: SubscriberEmail::parse(format!("reader{i}@example.com")).unwrap(),
                scope: SubscriberScope::everything(),
            }
            .into_subscriber(Utc::now());
            subscriber.confirmation = ConfirmationState::Confirmed;
            self.store.put_subscriber(subscriber).await;
        }
    }
}

pub fn post(id: ContentId) -> ContentItem {
    ContentItem {
        id,
        content_type: "post".into(),
        status: PublishStatus::Publish,
        has_password: false,
        hidden: false,
        excluded: false,
        author_id: 1,
        author_name: "Ursula".into(),
        title: format!("Post number {id}"),
        excerpt: "A new post is out.".into(),
        link: format!("https://example.com/posts/{id}"),
        thumbnail: None,
        parent_id: None,
        parent_title: None,
        parent_link: None,
        term_ids: BTreeSet::new(),
        published_at: Utc::now(),
    }
}

pub async fn spawn_app() -> TestApp {
    Lazy::force(&TRACING);

    let email_server = MockServer::start().await;

    let configuration = {
        let mut c = get_configuration().expect("Failed to read configuration.");
        c.application.port = 0;
        c.email_client.base_url = email_server.uri();
        c.email_client.bulk_limit = 2;
        c.notifications.excluded_posts = vec![42];
        c
    };
    let operator = TestOperator {
        username: configuration.application.operator_username.clone(),
        password: secrecy::ExposeSecret::expose_secret(&configuration.application.operator_password)
            .to_string(),
    };

    let store = Arc::new(InMemoryStore::new());
    let application = Application::build_with_stores(configuration, Stores::shared(store.clone()))
        .await
        .expect("Failed to build application.");
    let port = application.port();
    let _ = tokio::spawn(application.run_until_stopped());

    TestApp {
        address: format!("http://127.0.0.1:{port}"),
        port,
        store,
        email_server,
        api_client: reqwest::Client::new(),
        operator,
    }
}

pub fn subscriber_emails(batch: &wiremock::Request) -> BTreeSet<String> {
    let body: Vec<serde_json::Value> = serde_json::from_slice(&batch.body).unwrap();
    body.iter()
        .map(|email| email["to"][0]["email"].as_str().unwrap().to_string())
        .collect()
}
