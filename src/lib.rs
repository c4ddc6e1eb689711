pub mod authentication;
pub mod configuration;
pub mod domain;
pub mod email_client;
pub mod notifier;
pub mod purge_worker;
pub mod queue;
pub mod rate_limiter;
pub mod routes;
pub mod scope;
pub mod startup;
pub mod store;
pub mod subscriptions;
pub mod telemetry;
pub mod template;
