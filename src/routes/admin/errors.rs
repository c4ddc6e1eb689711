use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};

use crate::notifier::NotifierError;
use crate::routes::error_response;

impl ResponseError for NotifierError {
    fn status_code(&self) -> StatusCode {
        match self {
            NotifierError::ContentBlocked(_) => StatusCode::UNPROCESSABLE_ENTITY,
            NotifierError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            NotifierError::ConcurrentBuildOrDispatch | NotifierError::QueuePending => {
                StatusCode::CONFLICT
            }
            NotifierError::QueueMissing | NotifierError::NotFound => StatusCode::NOT_FOUND,
            NotifierError::Provider(_) => StatusCode::BAD_GATEWAY,
            NotifierError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        error_response(self.status_code(), self.reason_code())
    }
}
