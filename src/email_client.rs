use std::time::Duration;

use anyhow::Context;
use reqwest::{Client, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::domain::SubscriberEmail;
use crate::queue::RenderedEmail;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Failed to reach the email provider.")]
    Request(#[from] reqwest::Error),
    #[error("The email provider answered with status {0}.")]
    Status(StatusCode),
}

impl ProviderError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            ProviderError::Request(_) => "provider_unavailable",
            ProviderError::Status(_) => "provider_batch_failure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Quota {
    pub quota: u64,
    pub remaining: u64,
}

/// The remote bulk-email service.
#[async_trait::async_trait]
pub trait EmailProvider: Send + Sync {
    /// Sends one batch in a single request. Success means every email was accepted.
    async fn send_batch(&self, emails: &[RenderedEmail]) -> Result<(), ProviderError>;

    async fn send_email(
        &self,
        recipient: &SubscriberEmail,
        subject: &str,
        html_content: &str,
    ) -> Result<(), ProviderError>;

    async fn quota(&self) -> Result<Quota, ProviderError>;
}

#[derive(Clone, Debug)]
pub struct EmailClient {
    http_client: Client,
    bulk_url: Url,
    single_url: Url,
    quota_url: Url,
    sender: SubscriberEmail,
    sender_name: String,
    auth_token: SecretString,
}

#[derive(Serialize)]
struct EmailUnit<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

impl<'a> EmailUnit<'a> {
    fn new(email: &'a str) -> Self {
        Self { email, name: None }
    }

    fn named(email: &'a str, name: &'a str) -> Self {
        Self {
            email,
            name: Some(name),
        }
    }
}

#[derive(Serialize)]
struct SendEmailRequest<'a> {
    from: EmailUnit<'a>,
    to: Vec<EmailUnit<'a>>,
    subject: &'a str,
    html: &'a str,
}

impl EmailClient {
    pub fn new(
        base_url: Url,
        sender: SubscriberEmail,
        sender_name: String,
        auth_token: SecretString,
        timeout: Duration,
    ) -> Result<Self, anyhow::Error> {
        Ok(Self {
            http_client: Client::builder()
                .timeout(timeout)
                .build()
                .context("Failed to build the provider HTTP client.")?,
            bulk_url: base_url.join("v1/bulk-email")?,
            single_url: base_url.join("v1/email")?,
            quota_url: base_url.join("v1/api-quota")?,
            sender,
            sender_name,
            auth_token,
        })
    }

    fn request<'a>(&'a self, recipient: &'a str, subject: &'a str, html: &'a str) -> SendEmailRequest<'a> {
        SendEmailRequest {
            from: EmailUnit::named(self.sender.as_ref(), &self.sender_name),
            to: vec![EmailUnit::new(recipient)],
            subject,
            html,
        }
    }

    async fn post<T: Serialize + ?Sized>(&self, url: &Url, body: &T) -> Result<(), ProviderError> {
        let response = self
            .http_client
            .post(url.clone())
            .bearer_auth(self.auth_token.expose_secret())
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, provider_response = %body, "Email provider rejected the request");
            return Err(ProviderError::Status(status));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl EmailProvider for EmailClient {
    #[tracing::instrument(name = "Sending a batch to the email provider", skip_all, fields(batch_size = emails.len()))]
    async fn send_batch(&self, emails: &[RenderedEmail]) -> Result<(), ProviderError> {
        let body: Vec<SendEmailRequest> = emails
            .iter()
            .map(|e| self.request(e.to.as_ref(), &e.subject, &e.html))
            .collect();
        self.post(&self.bulk_url, &body).await
    }

    #[tracing::instrument(name = "Sending a single email", skip_all)]
    async fn send_email(
        &self,
        recipient: &SubscriberEmail,
        subject: &str,
        html_content: &str,
    ) -> Result<(), ProviderError> {
        let body = self.request(recipient.as_ref(), subject, html_content);
        self.post(&self.single_url, &body).await
    }

    #[tracing::instrument(name = "Checking the provider quota", skip_all)]
    async fn quota(&self) -> Result<Quota, ProviderError> {
        let response = self
            .http_client
            .get(self.quota_url.clone())
            .bearer_auth(self.auth_token.expose_secret())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status));
        }
        Ok(response.json::<Quota>().await?)
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use claims::{assert_err, assert_matches, assert_ok, assert_ok_eq};
    use fake::{
        Fake, Faker,
        faker::{
            internet::en::SafeEmail,
            lorem::en::{Paragraph, Sentence},
        },
    };
    use reqwest::Url;
    use secrecy::SecretString;
    use uuid::Uuid;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{any, header, header_exists, method, path},
    };

    use super::{EmailProvider, ProviderError, Quota};
    use crate::{domain::SubscriberEmail, email_client::EmailClient, queue::RenderedEmail};

    struct SendEmailBodyMatcher;

    impl wiremock::Match for SendEmailBodyMatcher {
        fn matches(&self, request: &wiremock::Request) -> bool {
            let result: Result<serde_json::Value, _> = serde_json::from_slice(&request.body);

            if let Ok(body) = result {
                body.get("from").is_some()
                    && body.get("to").is_some()
                    && body.get("subject").is_some()
                    && body.get("html").is_some()
            } else {
                false
            }
        }
    }

    struct BulkBodyMatcher(usize);

    impl wiremock::Match for BulkBodyMatcher {
        fn matches(&self, request: &wiremock::Request) -> bool {
            let result: Result<Vec<serde_json::Value>, _> = serde_json::from_slice(&request.body);
            match result {
                Ok(entries) => {
                    entries.len() == self.0
                        && entries.iter().all(|e| {
                            e["to"][0]["email"].is_string()
                                && e["subject"].is_string()
                                && e["html"].is_string()
                        })
                }
                Err(_) => false,
            }
        }
    }

    fn get_subject() -> String {
        Sentence(1..2).fake()
    }

    fn get_content() -> String {
        Paragraph(1..10).fake()
    }

    fn get_email() -> SubscriberEmail {
        SubscriberEmail::parse(SafeEmail().fake()).unwrap()
    }

    fn get_batch(n: usize) -> Vec<RenderedEmail> {
        (0..n)
            .map(|_| RenderedEmail {
                to: get_email(),
                subject: get_subject(),
                html: get_content(),
                subscriber_id: Uuid::new_v4(),
            })
            .collect()
    }

    fn get_email_client(base_url: String) -> EmailClient {
        EmailClient::new(
            Url::parse(&base_url).unwrap(),
            get_email(),
            "Herald".into(),
            SecretString::from(Faker.fake::<String>()),
            Duration::from_millis(200),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn send_email_fires_a_request_to_base_url() {
        let mock_server = MockServer::start().await;
        let email_client = get_email_client(mock_server.uri());

        Mock::given(header_exists("Authorization"))
            .and(header("Content-type", "application/json"))
            .and(path("v1/email"))
            .and(method("POST"))
            .and(SendEmailBodyMatcher)
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let _ = email_client
            .send_email(&get_email(), &get_subject(), &get_content())
            .await;
    }

    #[tokio::test]
    async fn send_batch_posts_every_email_in_one_request() {
        let mock_server = MockServer::start().await;
        let email_client = get_email_client(mock_server.uri());

        Mock::given(header_exists("Authorization"))
            .and(path("v1/bulk-email"))
            .and(method("POST"))
            .and(BulkBodyMatcher(3))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&mock_server)
            .await;

        let outcome = email_client.send_batch(&get_batch(3)).await;

        assert_ok!(outcome);
    }

    #[tokio::test]
    async fn send_batch_fails_if_server_returns_500() {
        let mock_server = MockServer::start().await;
        let email_client = get_email_client(mock_server.uri());

        Mock::given(any())
            .respond_with(ResponseTemplate::new(500).set_body_string("internal details"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let outcome = email_client.send_batch(&get_batch(2)).await;

        assert_matches!(outcome, Err(ProviderError::Status(status)) if status.as_u16() == 500);
    }

    #[tokio::test]
    async fn send_email_times_out_if_server_takes_too_long() {
        let mock_server = MockServer::start().await;
        let email_client = get_email_client(mock_server.uri());

        let response = ResponseTemplate::new(200).set_delay(Duration::from_secs(20));
        Mock::given(any())
            .respond_with(response)
            .expect(1)
            .mount(&mock_server)
            .await;

        let outcome = email_client
            .send_email(&get_email(), &get_subject(), &get_content())
            .await;

        assert_err!(outcome);
    }

    #[tokio::test]
    async fn quota_is_read_from_the_provider() {
        let mock_server = MockServer::start().await;
        let email_client = get_email_client(mock_server.uri());

        Mock::given(path("v1/api-quota"))
            .and(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "quota": 100,
                "remaining": 42,
                "reset": "2024-03-10T00:00:00Z"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        assert_ok_eq!(
            email_client.quota().await,
            Quota {
                quota: 100,
                remaining: 42
            }
        );
    }
}
