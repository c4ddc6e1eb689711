use actix_web::{HttpResponse, web};

use crate::notifier::{Notifier, NotifierError};

#[tracing::instrument(name = "Operator builds the queue", skip(notifier))]
pub async fn build_queue(notifier: web::Data<Notifier>) -> Result<HttpResponse, NotifierError> {
    let summary = notifier.build_queue().await?;
    Ok(HttpResponse::Ok().json(summary))
}

#[derive(serde::Deserialize, Debug)]
pub struct DispatchParameters {
    #[serde(default)]
    check_quota: bool,
}

#[tracing::instrument(name = "Operator dispatches the queue", skip(notifier))]
pub async fn dispatch_queue(
    parameters: web::Query<DispatchParameters>,
    notifier: web::Data<Notifier>,
) -> Result<HttpResponse, NotifierError> {
    let summary = notifier.dispatch(parameters.check_quota).await?;
    Ok(HttpResponse::Ok().json(summary))
}

#[tracing::instrument(name = "Operator clears the queue", skip(notifier))]
pub async fn clear_queue(notifier: web::Data<Notifier>) -> Result<HttpResponse, NotifierError> {
    let cleared = notifier.clear_queue().await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "cleared": cleared })))
}

pub async fn queue_statistics(notifier: web::Data<Notifier>) -> Result<HttpResponse, NotifierError> {
    Ok(HttpResponse::Ok().json(notifier.statistics().await?))
}

pub async fn provider_quota(notifier: web::Data<Notifier>) -> Result<HttpResponse, NotifierError> {
    Ok(HttpResponse::Ok().json(notifier.check_quota().await?))
}
