use std::sync::Arc;

use chrono::Utc;

use crate::domain::{
    ConfirmationState, NewSubscriber, ScopeRules, Subscriber, SubscriberEmail, SubscriberScope,
};
use crate::email_client::{EmailProvider, ProviderError};
use crate::routes::error_chain_fmt;
use crate::store::SubscriberStore;
use crate::template::{EmailComposer, RenderError};

#[derive(thiserror::Error)]
pub enum SubscriptionError {
    #[error("{0}")]
    ValidationError(String),
    #[error("The email and code do not match a subscription.")]
    InvalidCode,
    #[error("Failed to render the confirmation email.")]
    Render(#[from] RenderError),
    #[error("Failed to send a confirmation email.")]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

impl std::fmt::Debug for SubscriptionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl SubscriptionError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            SubscriptionError::ValidationError(_) => "validation_failed",
            SubscriptionError::InvalidCode => "invalid_credentials",
            SubscriptionError::Render(_) => "subscriber_render_failure",
            SubscriptionError::Provider(_) => "provider_unavailable",
            SubscriptionError::UnexpectedError(_) => "storage_unavailable",
        }
    }
}

/// A subscribe or edit request as submitted by a reader.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SubscriptionRequest {
    pub email: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub everything: bool,
    #[serde(default)]
    pub content_types: Vec<String>,
    #[serde(default)]
    pub collection_ids: Vec<i64>,
    #[serde(default)]
    pub term_ids: Vec<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Created,
    Updated,
    /// Nothing changed. The reply does not reveal whether the email is known.
    Acknowledged,
}

/// A subscription as shown to its owner when they follow an edit link.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SubscriptionDetails {
    pub email: SubscriberEmail,
    pub confirmed: bool,
    #[serde(flatten)]
    pub scope: SubscriberScope,
}

pub struct Subscriptions {
    store: Arc<dyn SubscriberStore>,
    provider: Arc<dyn EmailProvider>,
    composer: EmailComposer,
    rules: ScopeRules,
}

impl Subscriptions {
    pub fn new(
        store: Arc<dyn SubscriberStore>,
        provider: Arc<dyn EmailProvider>,
        composer: EmailComposer,
        rules: ScopeRules,
    ) -> Self {
        Self {
            store,
            provider,
            composer,
            rules,
        }
    }

    #[tracing::instrument(name = "Adding a new subscriber", skip_all)]
    pub async fn subscribe(&self, request: SubscriptionRequest) -> Result<SubscribeOutcome, SubscriptionError> {
        let email = SubscriberEmail::parse(request.email).map_err(SubscriptionError::ValidationError)?;
        let scope = SubscriberScope::parse(
            request.everything,
            request.content_types,
            request.collection_ids,
            request.term_ids,
            &self.rules,
        )
        .map_err(|e| SubscriptionError::ValidationError(e.to_string()))?;

        if let Some(existing) = self.store.find_by_email(&email).await? {
            let code_matches = request
                .code
                .as_deref()
                .is_some_and(|code| existing.code.matches(code));
            if code_matches {
                self.store.update_scope(existing.id, &scope, Utc::now()).await?;
                tracing::info!(subscriber_id = %existing.id, "Subscription updated");
                return Ok(SubscribeOutcome::Updated);
            }
            if existing.confirmation == ConfirmationState::Unconfirmed {
                self.send_confirmation(&existing).await?;
            }
            return Ok(SubscribeOutcome::Acknowledged);
        }

        let subscriber = NewSubscriber { email, scope }.into_subscriber(Utc::now());
        self.store.insert(&subscriber).await?;
        if let Err(e) = self.send_confirmation(&subscriber).await {
            self.store.delete(subscriber.id).await?;
            return Err(e);
        }
        tracing::info!(subscriber_id = %subscriber.id, "Subscriber created");
        Ok(SubscribeOutcome::Created)
    }

    #[tracing::instrument(name = "Sending a confirmation email", skip_all, fields(subscriber_id = %subscriber.id))]
    async fn send_confirmation(&self, subscriber: &Subscriber) -> Result<(), SubscriptionError> {
        let email = self.composer.confirmation(subscriber)?;
        self.provider
            .send_email(&subscriber.email, &email.subject, &email.html)
            .await?;
        Ok(())
    }

    async fn authenticate(&self, email: String, code: &str) -> Result<Subscriber, SubscriptionError> {
        let email = SubscriberEmail::parse(email).map_err(SubscriptionError::ValidationError)?;
        match self.store.find_by_email(&email).await? {
            Some(subscriber) if subscriber.code.matches(code) => Ok(subscriber),
            _ => Err(SubscriptionError::InvalidCode),
        }
    }

    #[tracing::instrument(name = "Fetch a subscription for editing", skip_all)]
    pub async fn details(&self, email: String, code: &str) -> Result<SubscriptionDetails, SubscriptionError> {
        let subscriber = self.authenticate(email, code).await?;
        Ok(SubscriptionDetails {
            confirmed: subscriber.confirmation == ConfirmationState::Confirmed,
            email: subscriber.email,
            scope: subscriber.scope,
        })
    }

    #[tracing::instrument(name = "Confirm a pending subscriber", skip_all)]
    pub async fn confirm(&self, email: String, code: &str) -> Result<(), SubscriptionError> {
        let subscriber = self.authenticate(email, code).await?;
        self.store.confirm(subscriber.id, Utc::now()).await?;
        tracing::info!(subscriber_id = %subscriber.id, "Subscriber confirmed");
        Ok(())
    }

    #[tracing::instrument(name = "Unsubscribe", skip_all)]
    pub async fn unsubscribe(&self, email: String, code: &str) -> Result<(), SubscriptionError> {
        let subscriber = self.authenticate(email, code).await?;
        self.store.delete(subscriber.id).await?;
        tracing::info!(subscriber_id = %subscriber.id, "Subscriber removed");
        Ok(())
    }
}
