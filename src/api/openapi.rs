use super::handlers::{auth, health};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    info(
        title = "custos",
        description = "Authentication and account-security core",
        license(name = "BSD-3-Clause", identifier = "BSD-3-Clause"),
    ),
    paths(
        health::health,
        auth::register::register,
        auth::login::login,
        auth::password::forgot_password,
        auth::password::reset_password,
        auth::mfa::enroll,
        auth::mfa::verify,
    ),
    components(schemas(
        health::Health,
        auth::types::RegisterBody,
        auth::types::RegisterResponse,
        auth::types::LoginBody,
        auth::types::TokenResponse,
        auth::types::MfaChallengeResponse,
        auth::types::LockedResponse,
        auth::types::RateLimitedResponse,
        auth::types::ForgotPasswordBody,
        auth::types::ResetPasswordBody,
        auth::types::MfaVerifyBody,
        auth::types::MfaEnrollResponse,
        auth::types::MfaRecoveryResponse,
        auth::types::MessageResponse,
        auth::types::ErrorResponse,
    )),
    tags(
        (name = "auth", description = "Registration, login, and password reset"),
        (name = "mfa", description = "TOTP enrollment"),
        (name = "health", description = "Service health"),
    )
)]
struct ApiDoc;

/// The generated OpenAPI document for the HTTP surface.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_every_route() {
        let spec = openapi();
        for path in [
            "/health",
            "/v1/auth/register",
            "/v1/auth/login",
            "/v1/auth/forgot-password",
            "/v1/auth/reset-password",
            "/v1/auth/mfa/enroll",
            "/v1/auth/mfa/verify",
        ] {
            assert!(spec.paths.paths.contains_key(path), "missing {path}");
        }
    }

    #[test]
    fn tags_are_present() {
        let spec = openapi();
        let tags = spec.tags.unwrap_or_default();
        assert!(tags.iter().any(|tag| tag.name == "auth"));
        assert!(tags.iter().any(|tag| tag.name == "mfa"));
    }
}
