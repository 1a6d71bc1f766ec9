use crate::{
    audit::TracingAuditSink,
    breach::{BreachChecker, BreachConfig},
    cli::globals::GlobalArgs,
    reset::LogResetDelivery,
    service::{AuthBackends, AuthConfig, AuthService},
    store::postgres::{PgCounterStore, PgEphemeralStore, PgSessionStore, PgUserStore},
    vault,
};
use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    routing::{get, post},
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;

pub(crate) mod handlers;
// OpenAPI document generation lives in openapi.rs.
mod openapi;

pub use openapi::openapi;

/// Build the API router around a composed service.
#[must_use]
pub fn router(service: Arc<AuthService>) -> Router {
    Router::new()
        .route("/v1/auth/register", post(handlers::auth::register::register))
        .route("/v1/auth/login", post(handlers::auth::login::login))
        .route(
            "/v1/auth/forgot-password",
            post(handlers::auth::password::forgot_password),
        )
        .route(
            "/v1/auth/reset-password",
            post(handlers::auth::password::reset_password),
        )
        .route(
            "/v1/auth/mfa/enroll",
            post(handlers::auth::mfa::enroll),
        )
        .route(
            "/v1/auth/mfa/verify",
            post(handlers::auth::mfa::verify),
        )
        .route("/health", get(handlers::health::health))
        .layer(Extension(service))
}

/// Start the server.
///
/// # Errors
/// Returns an error if the database, Vault, or listener setup fails.
pub async fn new(
    port: u16,
    dsn: String,
    globals: &GlobalArgs,
    auth_config: AuthConfig,
    breach_config: BreachConfig,
) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let secrets = Arc::new(vault::kv::VaultSecretStore::from_globals(globals)?);
    let breach = BreachChecker::new(breach_config)?;

    let service = Arc::new(AuthService::new(
        AuthBackends {
            users: Arc::new(PgUserStore::new(pool.clone())),
            counters: Arc::new(PgCounterStore::new(pool.clone())),
            ephemeral: Arc::new(PgEphemeralStore::new(pool.clone())),
            sessions: Arc::new(PgSessionStore::new(pool.clone())),
            secrets,
            audit: Arc::new(TracingAuditSink),
            reset_delivery: Arc::new(LogResetDelivery),
        },
        auth_config,
        Some(breach),
    ));

    let app = router(service).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(Extension(pool)),
    );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
