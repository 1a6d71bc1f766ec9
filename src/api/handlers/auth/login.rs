use super::internal_error;
use super::types::{
    ErrorResponse, LockedResponse, LoginBody, MfaChallengeResponse, RateLimitedResponse,
    TokenResponse,
};
use crate::api::handlers::{client_info, now_unix};
use crate::service::{AuthService, LoginOutcome, LoginRequest};
use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::instrument;

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginBody,
    responses(
        (status = 200, description = "Tokens issued, or an MFA challenge", body = TokenResponse),
        (status = 401, description = "Invalid credentials or MFA code", body = ErrorResponse),
        (status = 423, description = "Account temporarily locked", body = LockedResponse),
        (status = 429, description = "Too many attempts", body = RateLimitedResponse),
    ),
    tag = "auth"
)]
#[instrument(skip(service, headers, payload))]
pub async fn login(
    service: Extension<Arc<AuthService>>,
    headers: HeaderMap,
    payload: Option<Json<LoginBody>>,
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
    let request = LoginRequest {
        email: body.email,
        password: body.password,
        mfa_code: body.mfa_code,
    };

    match service.login(request, &client, now).await {
        Ok(LoginOutcome::Issued(bundle)) => Json(TokenResponse {
            access_token: bundle.access_token,
            refresh_token: bundle.refresh_token,
            expires_in: bundle.expires_in,
        })
        .into_response(),
        Ok(LoginOutcome::MfaRequired) => {
            Json(MfaChallengeResponse { mfa_required: true }).into_response()
        }
        Ok(LoginOutcome::InvalidCredentials) => (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new("Invalid email or password")),
        )
            .into_response(),
        Ok(LoginOutcome::InvalidMfaCode) => (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new("Invalid MFA code")),
        )
            .into_response(),
        Ok(LoginOutcome::Locked { until }) => (
            StatusCode::LOCKED,
            Json(LockedResponse {
                error: "Account temporarily locked".to_string(),
                locked_until: until,
            }),
        )
            .into_response(),
        Ok(LoginOutcome::RateLimited {
            retry_after_seconds,
        }) => (
            StatusCode::TOO_MANY_REQUESTS,
            [(RETRY_AFTER, retry_after_seconds.to_string())],
            Json(RateLimitedResponse {
                error: "Too many attempts".to_string(),
                retry_after_seconds,
            }),
        )
            .into_response(),
        Err(err) => internal_error(&err),
    }
}
