use actix_web::{HttpResponse, web};
use uuid::Uuid;

use crate::domain::ContentId;
use crate::notifier::{Notifier, NotifierError};

pub async fn list_notifications(notifier: web::Data<Notifier>) -> Result<HttpResponse, NotifierError> {
    Ok(HttpResponse::Ok().json(notifier.notifications().await?))
}

#[derive(serde::Deserialize, Debug)]
pub struct EnqueueBody {
    content_id: ContentId,
}

#[tracing::instrument(name = "Operator enqueues a notification", skip(notifier))]
pub async fn enqueue_notification(
    body: web::Json<EnqueueBody>,
    notifier: web::Data<Notifier>,
) -> Result<HttpResponse, NotifierError> {
    let notification = notifier.enqueue(body.content_id).await?;
    Ok(HttpResponse::Ok().json(notification))
}

pub async fn pause_notification(
    id: web::Path<Uuid>,
    notifier: web::Data<Notifier>,
) -> Result<HttpResponse, NotifierError> {
    notifier.pause(id.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn unpause_notification(
    id: web::Path<Uuid>,
    notifier: web::Data<Notifier>,
) -> Result<HttpResponse, NotifierError> {
    notifier.unpause(id.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn mark_notification_unsent(
    id: web::Path<Uuid>,
    notifier: web::Data<Notifier>,
) -> Result<HttpResponse, NotifierError> {
    notifier.mark_unsent(id.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn delete_notification(
    id: web::Path<Uuid>,
    notifier: web::Data<Notifier>,
) -> Result<HttpResponse, NotifierError> {
    notifier.delete(id.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn remove_sent_notifications(
    notifier: web::Data<Notifier>,
) -> Result<HttpResponse, NotifierError> {
    let removed = notifier.remove_sent().await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "removed": removed })))
}
