pub(crate) mod login;
pub(crate) mod mfa;
pub(crate) mod password;
pub(crate) mod register;
pub(crate) mod types;

use axum::{Json, http::StatusCode, response::IntoResponse, response::Response};
use types::ErrorResponse;

/// Internal failures reduce to a generic 500; details stay in the logs.
pub(crate) fn internal_error(err: &anyhow::Error) -> Response {
    tracing::error!("request failed: {err:#}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("Internal server error")),
    )
        .into_response()
}
