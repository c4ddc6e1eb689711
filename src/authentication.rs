use actix_web::body::MessageBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::StatusCode;
use actix_web::http::header::{self, HeaderMap, HeaderValue};
use actix_web::middleware::Next;
use actix_web::{HttpResponse, ResponseError, web};
use anyhow::Context;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};

use crate::routes::{error_chain_fmt, error_response};

#[derive(Debug)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

/// The single operator account allowed on the admin endpoints.
#[derive(Clone)]
pub struct OperatorCredentials {
    pub username: String,
    pub password: SecretString,
}

#[derive(thiserror::Error)]
pub enum AuthError {
    #[error("Invalid credentials.")]
    InvalidCredentials(#[source] anyhow::Error),
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

impl std::fmt::Debug for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl ResponseError for AuthError {
    fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials(_) => StatusCode::UNAUTHORIZED,
            AuthError::UnexpectedError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            AuthError::InvalidCredentials(_) => {
                let mut response = error_response(self.status_code(), "invalid_credentials");
                response.headers_mut().insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static(r#"Basic realm="admin""#),
                );
                response
            }
            AuthError::UnexpectedError(_) => error_response(self.status_code(), "storage_unavailable"),
        }
    }
}

pub fn basic_auth(headers: &HeaderMap) -> Result<Credentials, anyhow::Error> {
    let header_value = headers
        .get("Authorization")
        .context("The 'Authorization' header is missing.")?
        .to_str()
        .context("The 'Authorization' header was not a valid UTF8 string.")?;

    let base64_encoded_segment = header_value
        .strip_prefix("Basic ")
        .context("The authorization scheme is not 'Basic'")?;

    let decoded_bytes = base64::engine::general_purpose::STANDARD
        .decode(base64_encoded_segment)
        .context("Failed to base64-decode 'Basic' credentials")?;

    let decoded_creds =
        String::from_utf8(decoded_bytes).context("The decoded credential string is not UTF8")?;

    let (username, password) = decoded_creds
        .split_once(':')
        .context("A username and a password must be provided in 'Basic' auth.")?;

    Ok(Credentials {
        username: username.to_string(),
        password: SecretString::from(password.to_string()),
    })
}

pub fn validate_credentials(
    credentials: &Credentials,
    operator: &OperatorCredentials,
) -> Result<(), AuthError> {
    let username_matches = credentials.username == operator.username;
    let password_matches =
        credentials.password.expose_secret() == operator.password.expose_secret();
    if username_matches && password_matches {
        Ok(())
    } else {
        Err(AuthError::InvalidCredentials(anyhow::anyhow!(
            "Unknown username or invalid password."
        )))
    }
}

pub async fn reject_unauthorized_operators(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, actix_web::Error> {
    let operator = req
        .app_data::<web::Data<OperatorCredentials>>()
        .context("Operator credentials are not configured.")
        .map_err(AuthError::UnexpectedError)?;
    let credentials = basic_auth(req.headers()).map_err(AuthError::InvalidCredentials)?;
    validate_credentials(&credentials, operator)?;
    next.call(req).await
}
