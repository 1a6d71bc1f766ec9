//! TOTP enrollment and verification.
//!
//! Enrollment is two-step: a generated secret is parked in the ephemeral
//! store until the caller proves possession with a first valid code, at which
//! point the secret is persisted, MFA is switched on, and a recovery-code
//! batch is issued. Login verification accepts either a current TOTP code or
//! an unused recovery code.

pub mod recovery;

use crate::store::{Account, EphemeralStore, UserStore};
use anyhow::{Context, Result, anyhow};
use recovery::{RecoveryCodeBatch, verify_recovery_code};
use std::sync::Arc;
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

const DEFAULT_SETUP_TTL_SECONDS: i64 = 600;
const TOTP_DIGITS: usize = 6;
const TOTP_SKEW: u8 = 1;
const TOTP_STEP: u64 = 30;

/// Secret material handed to the user at the start of enrollment.
#[derive(Clone, Debug)]
pub struct EnrollmentStart {
    pub secret_base32: String,
    pub otpauth_url: String,
}

#[derive(Debug)]
pub enum EnrollOutcome {
    Started(EnrollmentStart),
    AlreadyEnabled,
}

#[derive(Debug)]
pub enum ConfirmOutcome {
    Enabled { recovery_codes: Vec<String> },
    WrongCode,
    /// No pending setup secret: never started or past its TTL.
    SetupExpired,
}

#[derive(Clone)]
pub struct MfaService {
    users: Arc<dyn UserStore>,
    ephemeral: Arc<dyn EphemeralStore>,
    issuer: String,
    setup_ttl_seconds: i64,
}

impl MfaService {
    #[must_use]
    pub fn new(users: Arc<dyn UserStore>, ephemeral: Arc<dyn EphemeralStore>, issuer: String) -> Self {
        Self {
            users,
            ephemeral,
            issuer,
            setup_ttl_seconds: DEFAULT_SETUP_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_setup_ttl(mut self, setup_ttl_seconds: i64) -> Self {
        self.setup_ttl_seconds = setup_ttl_seconds;
        self
    }

    fn setup_key(account_id: Uuid) -> String {
        format!("mfa_setup:{account_id}")
    }

    fn build_totp(&self, secret_base32: &str, account_email: &str) -> Result<TOTP> {
        let secret_bytes = Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .map_err(|e| anyhow!("invalid totp secret: {e}"))?;
        TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW,
            TOTP_STEP,
            secret_bytes,
            Some(self.issuer.clone()),
            account_email.to_string(),
        )
        .map_err(|e| anyhow!("totp init error: {e}"))
    }

    /// Start enrollment: generate a secret, park it with a TTL, and return it
    /// with the otpauth provisioning URL. Restarting replaces any pending
    /// setup secret.
    ///
    /// # Errors
    /// Returns an error if secret generation or the ephemeral store fails.
    pub async fn begin_enrollment(&self, account: &Account, now: i64) -> Result<EnrollOutcome> {
        if account.mfa_enabled {
            return Ok(EnrollOutcome::AlreadyEnabled);
        }

        let secret_bytes = Secret::generate_secret()
            .to_bytes()
            .map_err(|e| anyhow!("secret generation error: {e}"))?;
        let totp = TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW,
            TOTP_STEP,
            secret_bytes,
            Some(self.issuer.clone()),
            account.email.clone(),
        )
        .map_err(|e| anyhow!("totp init error: {e}"))?;
        let secret_base32 = totp.get_secret_base32();

        self.ephemeral
            .put(
                &Self::setup_key(account.id),
                &secret_base32,
                self.setup_ttl_seconds,
                now,
            )
            .await
            .context("failed to park setup secret")?;

        Ok(EnrollOutcome::Started(EnrollmentStart {
            secret_base32,
            otpauth_url: totp.get_url(),
        }))
    }

    /// Confirm enrollment with a first code. On success the secret is
    /// persisted, MFA is enabled, and recovery codes are returned exactly
    /// once.
    ///
    /// # Errors
    /// Returns an error if a store fails or recovery codes cannot be
    /// generated.
    pub async fn confirm_enrollment(
        &self,
        account: &Account,
        code: &str,
        now: i64,
    ) -> Result<ConfirmOutcome> {
        let key = Self::setup_key(account.id);
        let Some(secret_base32) = self
            .ephemeral
            .get(&key, now)
            .await
            .context("failed to read setup secret")?
        else {
            return Ok(ConfirmOutcome::SetupExpired);
        };

        let totp = self.build_totp(&secret_base32, &account.email)?;
        if !totp.check(code, unix_time(now)) {
            return Ok(ConfirmOutcome::WrongCode);
        }

        let batch = RecoveryCodeBatch::generate()?;
        self.users
            .enable_mfa(account.id, secret_base32, batch.code_hashes)
            .await
            .context("failed to enable mfa")?;
        self.ephemeral
            .delete(&key)
            .await
            .context("failed to discard setup secret")?;

        Ok(ConfirmOutcome::Enabled {
            recovery_codes: batch.codes,
        })
    }

    /// Verify a second factor at login: a current TOTP code, or an unused
    /// recovery code which is consumed on match.
    ///
    /// # Errors
    /// Returns an error if a store fails.
    pub async fn verify_login(&self, account: &Account, code: &str, now: i64) -> Result<bool> {
        let Some(secret_base32) = account.mfa_secret.as_deref() else {
            return Ok(false);
        };

        let totp = self.build_totp(secret_base32, &account.email)?;
        if totp.check(code, unix_time(now)) {
            return Ok(true);
        }

        for hash in &account.mfa_recovery_hashes {
            if verify_recovery_code(code, hash) {
                return self.users.consume_recovery_hash(account.id, hash).await;
            }
        }

        Ok(false)
    }
}

fn unix_time(now: i64) -> u64 {
    u64::try_from(now).unwrap_or(0)
}
