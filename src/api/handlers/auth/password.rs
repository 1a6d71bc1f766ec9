use super::internal_error;
use super::types::{ErrorResponse, ForgotPasswordBody, MessageResponse, ResetPasswordBody};
use crate::api::handlers::{client_info, now_unix};
use crate::reset::ConsumeOutcome;
use crate::service::AuthService;
use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{error, instrument};

const FORGOT_MESSAGE: &str = "If the account exists, a reset link has been sent";

#[utoipa::path(
    post,
    path = "/v1/auth/forgot-password",
    request_body = ForgotPasswordBody,
    responses(
        (status = 200, description = "Always the same answer, account or not", body = MessageResponse),
    ),
    tag = "auth"
)]
#[instrument(skip(service, headers, payload))]
pub async fn forgot_password(
    service: Extension<Arc<AuthService>>,
    headers: HeaderMap,
    payload: Option<Json<ForgotPasswordBody>>,
) -> Response {
    let Some(Json(body)) = payload else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Missing payload")),
        )
            .into_response();
    };

    let now = now_unix();
    let client = client_info(&headers);

    // Internal failures get logged but the response stays uniform, so the
    // endpoint cannot be used to probe which emails exist.
    if let Err(err) = service
        .request_password_reset(&body.email, &client, now)
        .await
    {
        error!("password reset request failed: {err:#}");
    }

    Json(MessageResponse {
        message: FORGOT_MESSAGE.to_string(),
    })
    .into_response()
}

#[utoipa::path(
    post,
    path = "/v1/auth/reset-password",
    request_body = ResetPasswordBody,
    responses(
        (status = 200, description = "Password replaced, sessions revoked", body = MessageResponse),
        (status = 400, description = "Invalid or expired token, or unacceptable password", body = ErrorResponse),
    ),
    tag = "auth"
)]
#[instrument(skip(service, headers, payload))]
pub async fn reset_password(
    service: Extension<Arc<AuthService>>,
    headers: HeaderMap,
    payload: Option<Json<ResetPasswordBody>>,
) -> Response {
    let Some(Json(body)) = payload else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Missing payload")),
        )
            .into_response();
    };

    let now = now_unix();
    let client = client_info(&headers);

    match service
        .complete_password_reset(&body.token, &body.password, &client, now)
        .await
    {
        Ok(ConsumeOutcome::Completed { .. }) => Json(MessageResponse {
            message: "Password has been reset".to_string(),
        })
        .into_response(),
        Ok(ConsumeOutcome::Rejected) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Invalid or expired reset token")),
        )
            .into_response(),
        Err(err) => internal_error(&err),
    }
}
