use super::internal_error;
use super::types::{ErrorResponse, RegisterBody, RegisterResponse};
use crate::api::handlers::{client_info, now_unix};
use crate::service::{AuthService, RegisterOutcome, RegisterRejection, RegisterRequest};
use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::instrument;

#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterBody,
    responses(
        (status = 201, description = "Account and organization created", body = RegisterResponse),
        (status = 400, description = "Registration rejected", body = ErrorResponse),
    ),
    tag = "auth"
)]
#[instrument(skip(service, headers, payload))]
pub async fn register(
    service: Extension<Arc<AuthService>>,
    headers: HeaderMap,
    payload: Option<Json<RegisterBody>>,
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
    let request = RegisterRequest {
        email: body.email,
        name: body.name,
        password: body.password,
        organization_name: body.organization_name.unwrap_or_default(),
    };

    match service.register(request, &client, now).await {
        Ok(RegisterOutcome::Created(account)) => (
            StatusCode::CREATED,
            Json(RegisterResponse {
                id: account.id,
                email: account.email,
                name: account.name,
                organization_id: account.organization_id,
            }),
        )
            .into_response(),
        Ok(RegisterOutcome::Rejected(rejection)) => {
            let message = match rejection {
                RegisterRejection::InvalidEmail => "Invalid email",
                RegisterRejection::InvalidName => "Invalid name",
                RegisterRejection::InvalidOrganizationName => "Invalid organization name",
                RegisterRejection::UnacceptablePassword => {
                    "Password must be at least 12 characters with lowercase, uppercase, digit, and special characters"
                }
                RegisterRejection::BreachedPassword => {
                    "Password appears in a known data breach"
                }
                // Deliberately indistinct from validation failures.
                RegisterRejection::EmailUnavailable => "Registration could not be completed",
            };
            (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message))).into_response()
        }
        Err(err) => internal_error(&err),
    }
}
