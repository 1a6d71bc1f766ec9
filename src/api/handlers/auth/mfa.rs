use super::internal_error;
use super::types::{ErrorResponse, MfaEnrollResponse, MfaRecoveryResponse, MfaVerifyBody};
use crate::api::handlers::{bearer_account, client_info, now_unix};
use crate::mfa::{ConfirmOutcome, EnrollOutcome};
use crate::service::AuthService;
use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::instrument;

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse::new("Missing or invalid access token")),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/v1/auth/mfa/enroll",
    responses(
        (status = 200, description = "Setup secret and provisioning URL", body = MfaEnrollResponse),
        (status = 400, description = "MFA already enabled", body = ErrorResponse),
        (status = 401, description = "Missing or invalid access token", body = ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "mfa"
)]
#[instrument(skip(service, headers))]
pub async fn enroll(service: Extension<Arc<AuthService>>, headers: HeaderMap) -> Response {
    let now = now_unix();
    let Some(account_id) = bearer_account(&service, &headers, now).await else {
        return unauthorized();
    };
    let client = client_info(&headers);

    match service.begin_mfa_enrollment(account_id, &client, now).await {
        Ok(Some(EnrollOutcome::Started(start))) => Json(MfaEnrollResponse {
            secret: start.secret_base32,
            otpauth_url: start.otpauth_url,
        })
        .into_response(),
        Ok(Some(EnrollOutcome::AlreadyEnabled)) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("MFA is already enabled")),
        )
            .into_response(),
        Ok(None) => unauthorized(),
        Err(err) => internal_error(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/mfa/verify",
    request_body = MfaVerifyBody,
    responses(
        (status = 200, description = "MFA enabled; recovery codes shown exactly once", body = MfaRecoveryResponse),
        (status = 400, description = "Wrong code or expired setup", body = ErrorResponse),
        (status = 401, description = "Missing or invalid access token", body = ErrorResponse),
    ),
    security(("bearer" = [])),
    tag = "mfa"
)]
#[instrument(skip(service, headers, payload))]
pub async fn verify(
    service: Extension<Arc<AuthService>>,
    headers: HeaderMap,
    payload: Option<Json<MfaVerifyBody>>,
) -> Response {
    let now = now_unix();
    let Some(account_id) = bearer_account(&service, &headers, now).await else {
        return unauthorized();
    };
    let Some(Json(body)) = payload else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Missing payload")),
        )
            .into_response();
    };
    let client = client_info(&headers);

    match service
        .confirm_mfa_enrollment(account_id, &body.code, &client, now)
        .await
    {
        Ok(Some(ConfirmOutcome::Enabled { recovery_codes })) => {
            Json(MfaRecoveryResponse { recovery_codes }).into_response()
        }
        Ok(Some(ConfirmOutcome::WrongCode)) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Invalid verification code")),
        )
            .into_response(),
        Ok(Some(ConfirmOutcome::SetupExpired)) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Setup expired, start enrollment again")),
        )
            .into_response(),
        Ok(None) => unauthorized(),
        Err(err) => internal_error(&err),
    }
}
