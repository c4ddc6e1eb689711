use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError, web};

use super::error_response;
use crate::subscriptions::{SubscriptionError, SubscriptionRequest, Subscriptions};

impl ResponseError for SubscriptionError {
    fn status_code(&self) -> StatusCode {
        match self {
            SubscriptionError::ValidationError(_) => StatusCode::BAD_REQUEST,
            SubscriptionError::InvalidCode => StatusCode::UNAUTHORIZED,
            SubscriptionError::Render(_)
            | SubscriptionError::Provider(_)
            | SubscriptionError::UnexpectedError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        error_response(self.status_code(), self.reason_code())
    }
}

/// The same reply whether the subscriber was created, updated or already known.
pub async fn subscribe(
    body: web::Json<SubscriptionRequest>,
    subscriptions: web::Data<Subscriptions>,
) -> Result<HttpResponse, SubscriptionError> {
    subscriptions.subscribe(body.into_inner()).await?;
    Ok(HttpResponse::Ok().finish())
}

#[derive(serde::Deserialize)]
pub struct Parameters {
    email: String,
    code: String,
}

/// Target of the edit link in every email.
pub async fn subscription_details(
    parameters: web::Query<Parameters>,
    subscriptions: web::Data<Subscriptions>,
) -> Result<HttpResponse, SubscriptionError> {
    let Parameters { email, code } = parameters.into_inner();
    let details = subscriptions.details(email, &code).await?;
    Ok(HttpResponse::Ok().json(details))
}

pub async fn confirm(
    parameters: web::Query<Parameters>,
    subscriptions: web::Data<Subscriptions>,
) -> Result<HttpResponse, SubscriptionError> {
    let Parameters { email, code } = parameters.into_inner();
    subscriptions.confirm(email, &code).await?;
    Ok(HttpResponse::Ok().finish())
}

pub async fn unsubscribe(
    parameters: web::Query<Parameters>,
    subscriptions: web::Data<Subscriptions>,
) -> Result<HttpResponse, SubscriptionError> {
    let Parameters { email, code } = parameters.into_inner();
    subscriptions.unsubscribe(email, &code).await?;
    Ok(HttpResponse::Ok().finish())
}
