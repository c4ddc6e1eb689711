use std::num::NonZeroUsize;
use std::time::Duration;

use anyhow::Context;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde_aux::field_attributes::deserialize_number_from_string;
use sqlx::ConnectOptions;
use sqlx::postgres::{PgConnectOptions, PgSslMode};

use crate::domain::{ScopeRules, SubscriberEmail};
use crate::email_client::EmailClient;
use crate::notifier::NotifierPolicy;
use crate::rate_limiter::RateLimiter;
use crate::scope::{ExclusionRules, ScopeMatcher};
use crate::template::{EmailComposer, EmailTemplates, TemplateError};

#[derive(serde::Deserialize, Debug, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub application: ApplicationSettings,
    pub email_client: EmailClientSettings,
    pub notifications: NotificationSettings,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct ApplicationSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub base_url: String,
    pub site_name: String,
    pub operator_username: String,
    pub operator_password: SecretString,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct EmailClientSettings {
    pub base_url: String,
    pub sender_email: String,
    pub sender_name: String,
    pub authorization_token: SecretString,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub timeout_ms: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub bulk_limit: usize,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub rate_limit_requests: usize,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub rate_limit_interval_ms: u64,
}

impl EmailClientSettings {
    pub fn client(self) -> Result<EmailClient, anyhow::Error> {
        let sender_email = self.sender().map_err(anyhow::Error::msg)?;
        let timeout = self.timeout();
        let base_url = Url::parse(&self.base_url).context("Invalid email provider base url.")?;
        EmailClient::new(
            base_url,
            sender_email,
            self.sender_name,
            self.authorization_token,
            timeout,
        )
    }

    pub fn sender(&self) -> Result<SubscriberEmail, String> {
        SubscriberEmail::parse(self.sender_email.clone())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn bulk_limit(&self) -> Result<NonZeroUsize, anyhow::Error> {
        NonZeroUsize::new(self.bulk_limit).context("The bulk limit must be at least 1.")
    }

    pub fn rate_limiter(&self) -> Result<RateLimiter, anyhow::Error> {
        let max_requests = NonZeroUsize::new(self.rate_limit_requests)
            .context("The rate limit must allow at least 1 request.")?;
        Ok(RateLimiter::new(
            max_requests,
            Duration::from_millis(self.rate_limit_interval_ms),
        ))
    }
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct NotificationSettings {
    #[serde(default)]
    pub excluded_posts: Vec<i64>,
    #[serde(default)]
    pub excluded_authors: Vec<i64>,
    #[serde(default)]
    pub excluded_emails: Vec<String>,
    #[serde(default)]
    pub allow_passwords: bool,
    #[serde(default)]
    pub allow_hidden: bool,
    #[serde(default)]
    pub disable_blocked_enqueue: bool,
    #[serde(default = "default_supported_types")]
    pub supported_types: Vec<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_per_term: usize,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub excerpt_length: usize,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub queue_ttl_hours: i64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub lock_timeout_minutes: i64,
    #[serde(default)]
    pub templates: EmailTemplates,
}

fn default_supported_types() -> Vec<String> {
    vec!["post".into(), "story".into(), "chapter".into()]
}

impl NotificationSettings {
    pub fn exclusion_rules(&self) -> ExclusionRules {
        ExclusionRules {
            excluded_posts: self.excluded_posts.iter().copied().collect(),
            excluded_authors: self.excluded_authors.iter().copied().collect(),
            supported_types: self.supported_types.iter().cloned().collect(),
            allow_passwords: self.allow_passwords,
            allow_hidden: self.allow_hidden,
        }
    }

    pub fn scope_rules(&self) -> ScopeRules {
        ScopeRules {
            supported_types: self.supported_types.iter().cloned().collect(),
            max_per_term: self.max_per_term,
        }
    }

    pub fn matcher(&self) -> Result<ScopeMatcher, anyhow::Error> {
        let suppressed = self
            .excluded_emails
            .iter()
            .map(|e| SubscriberEmail::parse(e.clone()).map_err(anyhow::Error::msg))
            .collect::<Result<Vec<_>, _>>()
            .context("Invalid entry in the excluded emails.")?;
        Ok(ScopeMatcher::new(suppressed))
    }

    pub fn composer(&self, application: &ApplicationSettings) -> Result<EmailComposer, TemplateError> {
        EmailComposer::new(
            &self.templates,
            application.site_name.clone(),
            application.base_url.clone(),
            self.excerpt_length,
        )
    }

    pub fn policy(&self) -> NotifierPolicy {
        NotifierPolicy {
            queue_ttl: chrono::Duration::hours(self.queue_ttl_hours),
            lock_timeout: chrono::Duration::minutes(self.lock_timeout_minutes),
            disable_blocked_enqueue: self.disable_blocked_enqueue,
        }
    }
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: SecretString,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub database_name: String,
    pub require_ssl: bool,
}

impl DatabaseSettings {
    pub fn with_db(&self) -> PgConnectOptions {
        self.without_db()
            .database(&self.database_name)
            .log_statements(tracing::log::LevelFilter::Trace)
    }

    pub fn without_db(&self) -> PgConnectOptions {
        let ssl_mode = if self.require_ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        };

        PgConnectOptions::new()
            .host(&self.host)
            .username(&self.username)
            .password(self.password.expose_secret())
            .port(self.port)
            .ssl_mode(ssl_mode)
    }
}

#[derive(Debug)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "local" => Ok(Environment::Local),
            "production" => Ok(Environment::Production),
            other => Err(format!(
                "{other} is not supported environment. Try to use `local` or `production`",
            )),
        }
    }
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("Failed to determine current directory: {e}")))?;
    let conf_dir = base_path.join("configuration");
    let env: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let settings = config::Config::builder()
        .add_source(config::File::from(conf_dir.join("base.yaml")).required(true))
        .add_source(config::File::from(conf_dir.join(format!("{}.yaml", env.as_str()))).required(true))
        .add_source(
            config::Environment::with_prefix("APP")
                .separator("__")
                .prefix_separator("_"),
        )
        .build()?;

    settings.try_deserialize::<Settings>()
}
