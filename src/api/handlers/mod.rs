pub(crate) mod auth;
pub(crate) mod health;

use crate::service::AuthService;
use crate::session::{AccessCheck, ClientInfo};
use axum::http::HeaderMap;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Current unix time in seconds; the single clock read per request.
pub(crate) fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(0))
}

/// Client metadata from proxy headers for sessions and audit.
pub(crate) fn client_info(headers: &HeaderMap) -> ClientInfo {
    let origin_addr = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        });
    let user_agent = headers
        .get("user-agent")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    ClientInfo {
        origin_addr,
        user_agent,
    }
}

/// Resolve the bearer access token to an account id, if the token verifies.
pub(crate) async fn bearer_account(
    service: &AuthService,
    headers: &HeaderMap,
    now: i64,
) -> Option<Uuid> {
    let token = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())?
        .strip_prefix("Bearer ")?;
    match service.issuer().check_access(token, now).await {
        Ok(AccessCheck::Valid(claims)) => Uuid::parse_str(&claims.sub).ok(),
        Ok(AccessCheck::Invalid(_)) | Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn client_info_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        headers.insert("user-agent", HeaderValue::from_static("cli/1.0"));

        let info = client_info(&headers);
        assert_eq!(info.origin_addr.as_deref(), Some("203.0.113.7"));
        assert_eq!(info.user_agent.as_deref(), Some("cli/1.0"));
    }

    #[test]
    fn client_info_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        let info = client_info(&headers);
        assert_eq!(info.origin_addr.as_deref(), Some("10.0.0.2"));
        assert_eq!(info.user_agent, None);
    }

    #[test]
    fn client_info_handles_missing_headers() {
        let info = client_info(&HeaderMap::new());
        assert_eq!(info.origin_addr, None);
        assert_eq!(info.user_agent, None);
    }
}
