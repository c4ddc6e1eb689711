use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use super::{ContentStore, NotificationStore, QueueStore, SubscriberStore};
use crate::domain::{
    CONFIRMATION_GRACE_HOURS, ContentId, ContentItem, Notification, Subscriber, SubscriberEmail, SubscriberScope,
    VerificationCode,
};
use crate::queue::Queue;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct SubscriberRow {
    id: Uuid,
    email: String,
    confirmation: String,
    code: String,
    scope_everything: bool,
    scope_content_types: Vec<String>,
    scope_collection_ids: Vec<i64>,
    scope_term_ids: Vec<i64>,
    lifecycle: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriberRow> for Subscriber {
    type Error = anyhow::Error;

    fn try_from(row: SubscriberRow) -> Result<Self, Self::Error> {
        Ok(Subscriber {
            id: row.id,
            email: SubscriberEmail::parse(row.email).map_err(anyhow::Error::msg)?,
            confirmation: row.confirmation.try_into().map_err(anyhow::Error::msg)?,
            code: VerificationCode::parse(row.code).map_err(anyhow::Error::msg)?,
            scope: SubscriberScope {
                everything: row.scope_everything,
                content_types: row.scope_content_types.into_iter().collect(),
                collection_ids: row.scope_collection_ids.into_iter().collect(),
                term_ids: row.scope_term_ids.into_iter().collect(),
            },
            lifecycle: row.lifecycle.try_into().map_err(anyhow::Error::msg)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SUBSCRIBER_COLUMNS: &str = r#"
    id, email, confirmation, code, scope_everything, scope_content_types,
    scope_collection_ids, scope_term_ids, lifecycle, created_at, updated_at
"#;

#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: Uuid,
    content_id: i64,
    enqueued_at: DateTime<Utc>,
    paused: bool,
    last_sent: Option<DateTime<Utc>>,
}

impl From<NotificationRow> for Notification {
    fn from(row: NotificationRow) -> Self {
        Notification {
            id: row.id,
            content_id: row.content_id,
            enqueued_at: row.enqueued_at,
            paused: row.paused,
            last_sent: row.last_sent,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ContentRow {
    id: i64,
    content_type: String,
    status: String,
    has_password: bool,
    hidden: bool,
    excluded: bool,
    author_id: i64,
    author_name: String,
    title: String,
    excerpt: String,
    link: String,
    thumbnail: Option<String>,
    parent_id: Option<i64>,
    parent_title: Option<String>,
    parent_link: Option<String>,
    published_at: DateTime<Utc>,
}

#[async_trait::async_trait]
impl SubscriberStore for PgStore {
    #[tracing::instrument(name = "Get deliverable subscribers", skip(self))]
    async fn deliverable(&self) -> Result<Vec<Subscriber>, anyhow::Error> {
        let rows = sqlx::query_as::<_, SubscriberRow>(&format!(
            r#"
            SELECT {SUBSCRIBER_COLUMNS} FROM subscribers
            WHERE confirmation = 'confirmed' AND lifecycle = 'active'
            ORDER BY email
            "#
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch deliverable subscribers.")?;

        // A single bad row must not block everyone else.
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id;
                match Subscriber::try_from(row) {
                    Ok(s) => Some(s),
                    Err(err) => {
                        tracing::warn!(
                            err.cause_chain = ?err,
                            subscriber_id = %id,
                            "Skipping a subscriber. The stored details are invalid."
                        );
                        None
                    }
                }
            })
            .collect())
    }

    #[tracing::instrument(name = "Find subscriber by email", skip_all)]
    async fn find_by_email(&self, email: &SubscriberEmail) -> Result<Option<Subscriber>, anyhow::Error> {
        let row = sqlx::query_as::<_, SubscriberRow>(&format!(
            "SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE email = $1"
        ))
        .bind(email.as_ref())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up a subscriber.")?;
        row.map(Subscriber::try_from).transpose()
    }

    #[tracing::instrument(name = "Saving new subscriber details in the database", skip_all, fields(subscriber_id = %subscriber.id))]
    async fn insert(&self, subscriber: &Subscriber) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            INSERT INTO subscribers (
                id, email, confirmation, code, scope_everything, scope_content_types,
                scope_collection_ids, scope_term_ids, lifecycle, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(subscriber.id)
        .bind(subscriber.email.as_ref())
        .bind(subscriber.confirmation.as_str())
        .bind(subscriber.code.as_ref())
        .bind(subscriber.scope.everything)
        .bind(subscriber.scope.content_types.iter().cloned().collect::<Vec<_>>())
        .bind(subscriber.scope.collection_ids.iter().copied().collect::<Vec<_>>())
        .bind(subscriber.scope.term_ids.iter().copied().collect::<Vec<_>>())
        .bind(subscriber.lifecycle.as_str())
        .bind(subscriber.created_at)
        .bind(subscriber.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert a new subscriber.")?;
        Ok(())
    }

    #[tracing::instrument(name = "Update subscriber scope", skip(self, scope))]
    async fn update_scope(
        &self,
        id: Uuid,
        scope: &SubscriberScope,
        now: DateTime<Utc>,
    ) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            UPDATE subscribers
            SET scope_everything = $2, scope_content_types = $3,
                scope_collection_ids = $4, scope_term_ids = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(scope.everything)
        .bind(scope.content_types.iter().cloned().collect::<Vec<_>>())
        .bind(scope.collection_ids.iter().copied().collect::<Vec<_>>())
        .bind(scope.term_ids.iter().copied().collect::<Vec<_>>())
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to update the subscriber scope.")?;
        Ok(())
    }

    #[tracing::instrument(name = "Mark subscriber as confirmed", skip(self))]
    async fn confirm(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), anyhow::Error> {
        sqlx::query("UPDATE subscribers SET confirmation = 'confirmed', updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await
            .context("Failed to confirm the subscriber.")?;
        Ok(())
    }

    #[tracing::instrument(name = "Delete subscriber", skip(self))]
    async fn delete(&self, id: Uuid) -> Result<(), anyhow::Error> {
        sqlx::query("DELETE FROM subscribers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete the subscriber.")?;
        Ok(())
    }

    #[tracing::instrument(name = "Purge unconfirmed subscribers", skip(self))]
    async fn purge_unconfirmed(&self, now: DateTime<Utc>) -> Result<u64, anyhow::Error> {
        let result = sqlx::query(
            "DELETE FROM subscribers WHERE confirmation = 'unconfirmed' AND created_at < $1",
        )
        .bind(now - Duration::hours(CONFIRMATION_GRACE_HOURS))
        .execute(&self.pool)
        .await
        .context("Failed to purge unconfirmed subscribers.")?;
        Ok(result.rows_affected())
    }
}

const NOTIFICATION_COLUMNS: &str = "id, content_id, enqueued_at, paused, last_sent";

#[async_trait::async_trait]
impl NotificationStore for PgStore {
    #[tracing::instrument(name = "Get pending notifications", skip(self))]
    async fn pending(&self) -> Result<Vec<Notification>, anyhow::Error> {
        let rows = sqlx::query_as::<_, NotificationRow>(&format!(
            r#"
            SELECT {NOTIFICATION_COLUMNS} FROM notifications
            WHERE NOT paused AND last_sent IS NULL
            ORDER BY enqueued_at, content_id
            "#
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch pending notifications.")?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[tracing::instrument(name = "Get all notifications", skip(self))]
    async fn all(&self) -> Result<Vec<Notification>, anyhow::Error> {
        let rows = sqlx::query_as::<_, NotificationRow>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications ORDER BY enqueued_at, content_id"
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch notifications.")?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn find_by_content(&self, content_id: ContentId) -> Result<Option<Notification>, anyhow::Error> {
        let row = sqlx::query_as::<_, NotificationRow>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE content_id = $1"
        ))
        .bind(content_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch a notification.")?;
        Ok(row.map(Into::into))
    }

    #[tracing::instrument(name = "Enqueue notification", skip_all, fields(content_id = notification.content_id))]
    async fn insert(&self, notification: &Notification) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, content_id, enqueued_at, paused, last_sent)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(notification.id)
        .bind(notification.content_id)
        .bind(notification.enqueued_at)
        .bind(notification.paused)
        .bind(notification.last_sent)
        .execute(&self.pool)
        .await
        .context("Failed to insert a notification.")?;
        Ok(())
    }

    async fn set_paused(&self, id: Uuid, paused: bool) -> Result<bool, anyhow::Error> {
        let result = sqlx::query("UPDATE notifications SET paused = $2 WHERE id = $1")
            .bind(id)
            .bind(paused)
            .execute(&self.pool)
            .await
            .context("Failed to update a notification.")?;
        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(name = "Set notification send time", skip(self))]
    async fn set_last_sent(&self, ids: &[Uuid], sent_at: Option<DateTime<Utc>>) -> Result<u64, anyhow::Error> {
        let result = sqlx::query("UPDATE notifications SET last_sent = $2 WHERE id = ANY($1)")
            .bind(ids)
            .bind(sent_at)
            .execute(&self.pool)
            .await
            .context("Failed to update notification send times.")?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, anyhow::Error> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete a notification.")?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_sent(&self) -> Result<u64, anyhow::Error> {
        let result = sqlx::query("DELETE FROM notifications WHERE last_sent IS NOT NULL")
            .execute(&self.pool)
            .await
            .context("Failed to remove sent notifications.")?;
        Ok(result.rows_affected())
    }

    async fn last_sent(&self) -> Result<Option<DateTime<Utc>>, anyhow::Error> {
        let last_sent: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT MAX(last_sent) FROM notifications")
                .fetch_one(&self.pool)
                .await
                .context("Failed to read the last send time.")?;
        Ok(last_sent)
    }
}

#[async_trait::async_trait]
impl ContentStore for PgStore {
    #[tracing::instrument(name = "Read content item", skip(self))]
    async fn content(&self, id: ContentId) -> Result<Option<ContentItem>, anyhow::Error> {
        let row = sqlx::query_as::<_, ContentRow>(
            r#"
            SELECT c.id, c.content_type, c.status, c.has_password, c.hidden, c.excluded,
                   c.author_id, c.author_name, c.title, c.excerpt, c.link, c.thumbnail,
                   c.parent_id, p.title AS parent_title, p.link AS parent_link, c.published_at
            FROM content_items c
            LEFT JOIN content_items p ON p.id = c.parent_id
            WHERE c.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to read a content item.")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let term_ids: Vec<i64> =
            sqlx::query_scalar("SELECT term_id FROM content_terms WHERE content_id = $1")
                .bind(id)
                .fetch_all(&self.pool)
                .await
                .context("Failed to read content terms.")?;

        Ok(Some(ContentItem {
            id: row.id,
            content_type: row.content_type,
            status: row.status.try_into().map_err(anyhow::Error::msg)?,
            has_password: row.has_password,
            hidden: row.hidden,
            excluded: row.excluded,
            author_id: row.author_id,
            author_name: row.author_name,
            title: row.title,
            excerpt: row.excerpt,
            link: row.link,
            thumbnail: row.thumbnail,
            parent_id: row.parent_id,
            parent_title: row.parent_title,
            parent_link: row.parent_link,
            term_ids: term_ids.into_iter().collect(),
            published_at: row.published_at,
        }))
    }

    async fn append_send_history(&self, id: ContentId, sent_at: DateTime<Utc>) -> Result<(), anyhow::Error> {
        sqlx::query("INSERT INTO content_send_history (content_id, sent_at) VALUES ($1, $2)")
            .bind(id)
            .bind(sent_at)
            .execute(&self.pool)
            .await
            .context("Failed to append to the send history.")?;
        Ok(())
    }

    async fn send_history(&self, id: ContentId) -> Result<Vec<DateTime<Utc>>, anyhow::Error> {
        let history = sqlx::query_scalar(
            "SELECT sent_at FROM content_send_history WHERE content_id = $1 ORDER BY sent_at",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to read the send history.")?;
        Ok(history)
    }
}

#[async_trait::async_trait]
impl QueueStore for PgStore {
    #[tracing::instrument(name = "Acquire queue lock", skip(self))]
    async fn try_lock(&self, token: Uuid, now: DateTime<Utc>, stale_after: Duration) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            r#"
            UPDATE queue_lock SET token = $1, acquired_at = $2
            WHERE singleton AND (token IS NULL OR acquired_at < $3)
            "#,
        )
        .bind(token)
        .bind(now)
        .bind(now - stale_after)
        .execute(&self.pool)
        .await
        .context("Failed to acquire the queue lock.")?;
        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(name = "Refresh queue lock", skip(self))]
    async fn refresh_lock(&self, token: Uuid, now: DateTime<Utc>) -> Result<bool, anyhow::Error> {
        let result = sqlx::query("UPDATE queue_lock SET acquired_at = $2 WHERE token = $1")
            .bind(token)
            .bind(now)
            .execute(&self.pool)
            .await
            .context("Failed to refresh the queue lock.")?;
        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(name = "Release queue lock", skip(self))]
    async fn unlock(&self, token: Uuid) -> Result<(), anyhow::Error> {
        sqlx::query("UPDATE queue_lock SET token = NULL, acquired_at = NULL WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await
            .context("Failed to release the queue lock.")?;
        Ok(())
    }

    #[tracing::instrument(name = "Load persisted queue", skip(self))]
    async fn load(&self) -> Result<Option<Queue>, anyhow::Error> {
        let record: Option<Json<Queue>> =
            sqlx::query_scalar("SELECT record FROM notification_queue WHERE singleton")
                .fetch_optional(&self.pool)
                .await
                .context("Failed to load the persisted queue.")?;
        Ok(record.map(|Json(queue)| queue))
    }

    #[tracing::instrument(name = "Persist queue", skip_all, fields(queue_id = %queue.id))]
    async fn insert(&self, queue: &Queue) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            INSERT INTO notification_queue (singleton, queue_id, record, created_at, expires_at)
            VALUES (TRUE, $1, $2, $3, $4)
            ON CONFLICT (singleton) DO UPDATE
            SET queue_id = EXCLUDED.queue_id, record = EXCLUDED.record,
                created_at = EXCLUDED.created_at, expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(queue.id)
        .bind(Json(queue))
        .bind(queue.created_at)
        .bind(queue.expires_at)
        .execute(&self.pool)
        .await
        .context("Failed to persist the queue.")?;
        Ok(())
    }

    #[tracing::instrument(name = "Update persisted queue", skip_all, fields(queue_id = %queue.id))]
    async fn update(&self, queue: &Queue) -> Result<bool, anyhow::Error> {
        let result = sqlx::query("UPDATE notification_queue SET record = $2 WHERE queue_id = $1")
            .bind(queue.id)
            .bind(Json(queue))
            .execute(&self.pool)
            .await
            .context("Failed to update the persisted queue.")?;
        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(name = "Clear persisted queue", skip(self))]
    async fn clear(&self) -> Result<bool, anyhow::Error> {
        let result = sqlx::query("DELETE FROM notification_queue")
            .execute(&self.pool)
            .await
            .context("Failed to clear the persisted queue.")?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_sent(&self, emails: u64) -> Result<u64, anyhow::Error> {
        let total: i64 = sqlx::query_scalar(
            "UPDATE delivery_counters SET value = value + $1 WHERE name = 'emails_sent' RETURNING value",
        )
        .bind(i64::try_from(emails)?)
        .fetch_one(&self.pool)
        .await
        .context("Failed to update the sent counter.")?;
        Ok(u64::try_from(total)?)
    }

    async fn sent_total(&self) -> Result<u64, anyhow::Error> {
        let total: i64 =
            sqlx::query_scalar("SELECT value FROM delivery_counters WHERE name = 'emails_sent'")
                .fetch_one(&self.pool)
                .await
                .context("Failed to read the sent counter.")?;
        Ok(u64::try_from(total)?)
    }
}
