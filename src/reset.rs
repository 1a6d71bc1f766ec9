//! Password reset flow.
//!
//! Requesting a reset is deliberately opaque: the caller always gets the same
//! answer whether or not the email exists, and per-email throttling silently
//! drops excess requests. The raw token leaves the process only through the
//! delivery seam; storage holds its SHA-256 hash.

use crate::audit::{self, AuditAction, AuditEvent, AuditSink};
use crate::credentials::{acceptable_password, hash_password};
use crate::session::ClientInfo;
use crate::store::{SessionStore, UserStore};
use crate::throttle::{AttemptThrottle, ThrottleDecision};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_TOKEN_TTL_SECONDS: i64 = 60 * 60;
const RESET_TOKEN_BYTES: usize = 32;

/// Outcome of consuming a reset token. Every rejection reason collapses into
/// one variant so responses cannot be used to probe token validity.
#[derive(Debug)]
pub enum ConsumeOutcome {
    Completed { account_id: uuid::Uuid },
    Rejected,
}

/// Delivery seam for the raw reset token (email sender in production).
#[async_trait]
pub trait ResetDelivery: Send + Sync {
    async fn deliver(&self, email: &str, token: &str) -> Result<()>;
}

/// Default delivery: log that a reset was issued, never the token itself.
#[derive(Clone, Debug, Default)]
pub struct LogResetDelivery;

#[async_trait]
impl ResetDelivery for LogResetDelivery {
    async fn deliver(&self, email: &str, _token: &str) -> Result<()> {
        info!("password reset token issued for {email}");
        Ok(())
    }
}

pub struct ResetFlow {
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
    throttle: AttemptThrottle,
    delivery: Arc<dyn ResetDelivery>,
    audit: Arc<dyn AuditSink>,
    token_ttl_seconds: i64,
}

impl ResetFlow {
    #[must_use]
    pub fn new(
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        throttle: AttemptThrottle,
        delivery: Arc<dyn ResetDelivery>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            users,
            sessions,
            throttle,
            delivery,
            audit,
            token_ttl_seconds: DEFAULT_TOKEN_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_token_ttl(mut self, token_ttl_seconds: i64) -> Self {
        self.token_ttl_seconds = token_ttl_seconds;
        self
    }

    /// Issue a reset token for `email` if the account exists. The outcome is
    /// identical for unknown emails and throttled requests.
    ///
    /// # Errors
    /// Returns an error only on store or delivery failures for an existing,
    /// unthrottled account.
    pub async fn request_reset(&self, email: &str, client: &ClientInfo, now: i64) -> Result<()> {
        let key = email.to_ascii_lowercase();
        if let ThrottleDecision::Blocked { .. } = self.throttle.consume(&key, now).await? {
            warn!("password reset throttled");
            return Ok(());
        }

        let Some(account) = self
            .users
            .find_by_email(email)
            .await
            .context("reset lookup failed")?
        else {
            return Ok(());
        };

        let token = generate_reset_token();
        self.users
            .set_reset_token(account.id, hash_reset_token(&token), now + self.token_ttl_seconds)
            .await
            .context("failed to store reset token")?;

        self.delivery
            .deliver(&account.email, &token)
            .await
            .context("failed to deliver reset token")?;

        audit::emit(
            &self.audit,
            AuditEvent::new(
                AuditAction::PasswordResetRequested,
                Some(account.id),
                client,
                now,
            ),
        )
        .await;
        Ok(())
    }

    /// Consume a reset token: replace the password, clear lockout state, and
    /// revoke every session for the account.
    ///
    /// # Errors
    /// Returns an error if a store fails; invalid tokens and unacceptable
    /// passwords are `Rejected`, not errors.
    pub async fn consume(
        &self,
        token: &str,
        new_password: &str,
        client: &ClientInfo,
        now: i64,
    ) -> Result<ConsumeOutcome> {
        if !acceptable_password(new_password) {
            return Ok(ConsumeOutcome::Rejected);
        }

        let Some(account) = self
            .users
            .find_by_reset_hash(&hash_reset_token(token))
            .await
            .context("reset token lookup failed")?
        else {
            return Ok(ConsumeOutcome::Rejected);
        };

        match account.reset_token_expires {
            Some(expires) if expires > now => {}
            _ => return Ok(ConsumeOutcome::Rejected),
        }

        let password_hash = hash_password(new_password)?;
        self.users
            .replace_password(account.id, password_hash)
            .await
            .context("failed to replace password")?;
        self.users
            .clear_lock_state(account.id)
            .await
            .context("failed to clear lock state")?;

        let revoked = self
            .sessions
            .delete_all_for_account(account.id)
            .await
            .context("failed to revoke sessions")?;

        audit::emit(
            &self.audit,
            AuditEvent::new(
                AuditAction::PasswordResetCompleted,
                Some(account.id),
                client,
                now,
            )
            .with_detail(serde_json::json!({ "revoked_sessions": revoked })),
        )
        .await;

        Ok(ConsumeOutcome::Completed {
            account_id: account.id,
        })
    }
}

fn generate_reset_token() -> String {
    let mut bytes = [0u8; RESET_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn hash_reset_token(token: &str) -> Vec<u8> {
    Sha256::digest(token.as_bytes()).to_vec()
}
