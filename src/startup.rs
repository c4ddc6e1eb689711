use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use actix_web::dev::Server;
use actix_web::middleware::from_fn;
use actix_web::{App, HttpServer, web};
use anyhow::Context;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_actix_web::TracingLogger;

use crate::authentication::{OperatorCredentials, reject_unauthorized_operators};
use crate::configuration::{DatabaseSettings, Settings};
use crate::email_client::EmailProvider;
use crate::notifier::Notifier;
use crate::queue::{Dispatcher, QueueBuilder};
use crate::routes::{
    build_queue, clear_queue, confirm, delete_notification, dispatch_queue, enqueue_notification,
    health_check, list_notifications, mark_notification_unsent, pause_notification,
    provider_quota, queue_statistics, remove_sent_notifications, subscribe, subscription_details,
    unpause_notification, unsubscribe,
};
use crate::store::{PgStore, Stores};
use crate::subscriptions::Subscriptions;

pub struct Application {
    port: u16,
    server: Server,
    shutdown: CancellationToken,
}

impl Application {
    pub async fn build(configuration: Settings) -> Result<Self, anyhow::Error> {
        let connection_pool = get_connection_pool(&configuration.database);
        let stores = Stores::shared(Arc::new(PgStore::new(connection_pool)));
        Self::build_with_stores(configuration, stores).await
    }

    /// Wires the pipeline on top of the given stores and binds the listener.
    pub async fn build_with_stores(configuration: Settings, stores: Stores) -> Result<Self, anyhow::Error> {
        let Settings {
            application,
            email_client,
            notifications,
            ..
        } = configuration;

        let bulk_limit = email_client.bulk_limit()?;
        let limiter = Arc::new(email_client.rate_limiter()?);
        let provider: Arc<dyn EmailProvider> = Arc::new(email_client.client()?);
        let composer = notifications
            .composer(&application)
            .context("Invalid email templates.")?;

        let builder = QueueBuilder::new(
            &stores,
            notifications.exclusion_rules(),
            notifications.matcher()?,
            composer.clone(),
            bulk_limit,
        );
        let dispatcher = Dispatcher::new(provider.clone(), limiter, stores.queue.clone());
        let subscriptions = Subscriptions::new(
            stores.subscribers.clone(),
            provider.clone(),
            composer,
            notifications.scope_rules(),
        );
        let notifier = Notifier::new(stores, builder, dispatcher, provider, notifications.policy());
        let shutdown = notifier.shutdown_token();

        let address = format!("{}:{}", application.host, application.port);
        let listener = TcpListener::bind(address)?;
        let port = listener.local_addr()?.port();
        let server = run(
            listener,
            web::Data::new(notifier),
            web::Data::new(subscriptions),
            OperatorCredentials {
                username: application.operator_username,
                password: application.operator_password,
            },
        )?;

        Ok(Self {
            port,
            server,
            shutdown,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serves until the server stops. Ctrl-C also cancels a running dispatch so
    /// the queue lock is released before the workers shut down.
    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        let shutdown = self.shutdown;
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        });
        self.server.await
    }
}

pub fn get_connection_pool(configuration: &DatabaseSettings) -> PgPool {
    PgPoolOptions::new()
        .acquire_timeout(Duration::from_secs(2))
        .connect_lazy_with(configuration.with_db())
}

pub fn run(
    listener: TcpListener,
    notifier: web::Data<Notifier>,
    subscriptions: web::Data<Subscriptions>,
    operator: OperatorCredentials,
) -> Result<Server, anyhow::Error> {
    let operator = web::Data::new(operator);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .route("/health_check", web::get().to(health_check))
            .route("/subscriptions", web::post().to(subscribe))
            .route("/subscriptions", web::get().to(subscription_details))
            .route("/subscriptions/confirm", web::get().to(confirm))
            .route("/subscriptions/unsubscribe", web::get().to(unsubscribe))
            .service(
                web::scope("/admin")
                    .wrap(from_fn(reject_unauthorized_operators))
                    .route("/queue", web::post().to(build_queue))
                    .route("/queue", web::delete().to(clear_queue))
                    .route("/queue/dispatch", web::post().to(dispatch_queue))
                    .route("/queue/statistics", web::get().to(queue_statistics))
                    .route("/quota", web::get().to(provider_quota))
                    .route("/notifications", web::get().to(list_notifications))
                    .route("/notifications", web::post().to(enqueue_notification))
                    .route("/notifications/sent", web::delete().to(remove_sent_notifications))
                    .route("/notifications/{id}", web::delete().to(delete_notification))
                    .route("/notifications/{id}/pause", web::post().to(pause_notification))
                    .route("/notifications/{id}/unpause", web::post().to(unpause_notification))
                    .route("/notifications/{id}/unsent", web::post().to(mark_notification_unsent)),
            )
            .app_data(notifier.clone())
            .app_data(subscriptions.clone())
            .app_data(operator.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}
