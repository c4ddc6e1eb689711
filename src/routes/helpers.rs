use std::error::Error;

use actix_web::HttpResponse;
use actix_web::http::StatusCode;

pub fn error_chain_fmt(e: &impl Error, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    writeln!(f, "{e}\n")?;
    let mut current = e.source();

    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{cause}")?;
        current = cause.source();
    }

    Ok(())
}

#[derive(serde::Serialize)]
struct ErrorBody<'a> {
    status: &'static str,
    reason: &'a str,
}

/// The body every failed request gets. The reason is a stable machine code.
pub fn error_response(status: StatusCode, reason: &str) -> HttpResponse {
    let label = if status.is_server_error() {
        "failed"
    } else {
        "rejected"
    };
    HttpResponse::build(status).json(ErrorBody {
        status: label,
        reason,
    })
}
