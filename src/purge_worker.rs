use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;

use crate::configuration::Settings;
use crate::startup::get_connection_pool;
use crate::store::{PgStore, SubscriberStore};

pub const PURGE_PERIOD: Duration = Duration::from_secs(12 * 60 * 60);

pub async fn run_worker_until_stopped(configuration: Settings) -> Result<(), anyhow::Error> {
    let pool = get_connection_pool(&configuration.database);
    let store = Arc::new(PgStore::new(pool));
    purge_loop(store, PURGE_PERIOD).await
}

/// Removes unconfirmed subscribers past their grace window, once per `period`.
pub async fn purge_loop(store: Arc<dyn SubscriberStore>, period: Duration) -> Result<(), anyhow::Error> {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        purge_once(store.as_ref()).await;
    }
}

#[tracing::instrument(name = "Purge unconfirmed subscribers", skip_all)]
async fn purge_once(store: &dyn SubscriberStore) {
    match store.purge_unconfirmed(Utc::now()).await {
        Ok(purged) => tracing::info!(purged, "Purged unconfirmed subscribers"),
        Err(e) => tracing::error!(
            error.cause_chain = ?e,
            error.message = %e,
            "Failed to purge unconfirmed subscribers. Retrying on the next tick."
        ),
    }
}
