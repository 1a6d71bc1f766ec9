//! Token issuance and refresh-session tracking.
//!
//! The issuer fetches the RS256 private key from the secret store on every
//! call so key rotation takes effect without restarts, signs an access and a
//! refresh token, and records the refresh session keyed by the account plus a
//! stable fragment of the refresh token.

use crate::store::{Account, SecretStore, SessionRecord, SessionStore};
use crate::token::{self, AccessClaims, RefreshClaims, REFRESH_TOKEN_TYPE};
use anyhow::{Context, Result};
use secrecy::ExposeSecret;
use std::sync::Arc;

const DEFAULT_ACCESS_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_REFRESH_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
const TOKEN_FRAGMENT_LEN: usize = 16;

/// Client metadata captured at issuance for session listing and audit.
#[derive(Clone, Debug, Default)]
pub struct ClientInfo {
    pub origin_addr: Option<String>,
    pub user_agent: Option<String>,
}

/// Freshly issued token pair.
#[derive(Clone, Debug)]
pub struct TokenBundle {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

/// Outcome of checking a presented access token. Store failures are `Err`;
/// a bad token is an expected rejection.
#[derive(Debug)]
pub enum AccessCheck {
    Valid(AccessClaims),
    Invalid(token::Error),
}

#[derive(Clone)]
pub struct SessionIssuer {
    secrets: Arc<dyn SecretStore>,
    sessions: Arc<dyn SessionStore>,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
}

impl SessionIssuer {
    #[must_use]
    pub fn new(secrets: Arc<dyn SecretStore>, sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            secrets,
            sessions,
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_ttls(mut self, access_ttl_seconds: i64, refresh_ttl_seconds: i64) -> Self {
        self.access_ttl_seconds = access_ttl_seconds;
        self.refresh_ttl_seconds = refresh_ttl_seconds;
        self
    }

    /// Mint an access/refresh token pair and record the refresh session.
    ///
    /// # Errors
    /// Returns an error if the signing key cannot be fetched, signing fails,
    /// or the session record cannot be stored.
    pub async fn issue(
        &self,
        account: &Account,
        client: &ClientInfo,
        now: i64,
    ) -> Result<TokenBundle> {
        let key = self
            .secrets
            .signing_key_pem()
            .await
            .context("failed to fetch signing key")?;
        let key_bytes = key.expose_secret().as_bytes();

        let access_claims = AccessClaims {
            sub: account.id.to_string(),
            email: account.email.clone(),
            org: account.organization_id.to_string(),
            role: account.role.clone(),
            iat: now,
            exp: now + self.access_ttl_seconds,
        };
        let refresh_claims = RefreshClaims {
            sub: account.id.to_string(),
            typ: REFRESH_TOKEN_TYPE.to_string(),
            iat: now,
            exp: now + self.refresh_ttl_seconds,
        };

        let access_token =
            token::sign_rs256(key_bytes, &access_claims).context("failed to sign access token")?;
        let refresh_token = token::sign_rs256(key_bytes, &refresh_claims)
            .context("failed to sign refresh token")?;

        self.sessions
            .insert(
                SessionRecord {
                    account_id: account.id,
                    token_fragment: token_fragment(&refresh_token),
                    origin_addr: client.origin_addr.clone(),
                    user_agent: client.user_agent.clone(),
                    created_at: now,
                },
                self.refresh_ttl_seconds,
            )
            .await
            .context("failed to record refresh session")?;

        Ok(TokenBundle {
            access_token,
            refresh_token,
            expires_in: self.access_ttl_seconds,
        })
    }

    /// Check a presented access token. The key is fetched fresh, never cached.
    ///
    /// # Errors
    /// Returns an error only when the secret store fails.
    pub async fn check_access(&self, token_str: &str, now: i64) -> Result<AccessCheck> {
        let key = self
            .secrets
            .signing_key_pem()
            .await
            .context("failed to fetch signing key")?;
        match token::verify_access(token_str, key.expose_secret().as_bytes(), now) {
            Ok(claims) => Ok(AccessCheck::Valid(claims)),
            Err(err) => Ok(AccessCheck::Invalid(err)),
        }
    }
}

/// Stable fragment of a refresh token used as the session key suffix.
#[must_use]
pub fn token_fragment(token_str: &str) -> String {
    let chars: Vec<char> = token_str.chars().collect();
    let start = chars.len().saturating_sub(TOKEN_FRAGMENT_LEN);
    chars[start..].iter().collect()
}
