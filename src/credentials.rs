//! Password hashing and credential verification.
//!
//! Hashing uses Argon2id with the library's fixed default work factor; the
//! same primitive covers registration, login, and password reset. Lookups for
//! unknown accounts still pay for a full hash comparison against a fallback
//! hash so the rejection timing does not reveal whether the email exists.

use crate::store::{Account, UserStore};
use anyhow::{Context, Result, anyhow};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString,
};
use rand::rngs::OsRng;
use std::sync::Arc;

/// Well-formed Argon2id hash that matches no password. Comparing against it
/// costs the same as a real wrong-password comparison.
const FALLBACK_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$MDEyMzQ1Njc4OWFiY2RlZg$AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

const PASSWORD_MIN_LEN: usize = 12;

/// Hash a password for storage.
///
/// # Errors
/// Returns an error if hashing fails.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|_| anyhow!("failed to hash password"))?
        .to_string();
    Ok(hash)
}

/// Compare a password against a stored hash. Malformed hashes verify as false.
#[must_use]
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Password acceptance policy: minimum length plus lower/upper/digit/special
/// character classes.
#[must_use]
pub fn acceptable_password(password: &str) -> bool {
    password.chars().count() >= PASSWORD_MIN_LEN
        && password.chars().any(|ch| ch.is_ascii_lowercase())
        && password.chars().any(|ch| ch.is_ascii_uppercase())
        && password.chars().any(|ch| ch.is_ascii_digit())
        && password.chars().any(|ch| !ch.is_ascii_alphanumeric())
}

/// Result of verifying an email/password pair.
///
/// `UnknownAccount` and `WrongPassword` must collapse into the same response
/// at the boundary; they are distinct here only so the caller can record the
/// failure against an account that exists.
#[derive(Debug)]
pub enum Verification {
    Valid(Box<Account>),
    WrongPassword(Box<Account>),
    Locked { until: i64 },
    UnknownAccount,
}

pub struct CredentialVerifier {
    users: Arc<dyn UserStore>,
}

impl CredentialVerifier {
    #[must_use]
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    /// Verify credentials for login.
    ///
    /// A locked account is rejected before the password comparison is
    /// attempted. An unknown email burns a comparison against the fallback
    /// hash instead of short-circuiting.
    ///
    /// # Errors
    /// Returns an error if the user store lookup fails.
    pub async fn verify(&self, email: &str, password: &str, now: i64) -> Result<Verification> {
        let account = self
            .users
            .find_by_email(email)
            .await
            .context("credential lookup failed")?;

        let Some(account) = account else {
            let _ = verify_password(password, FALLBACK_HASH);
            return Ok(Verification::UnknownAccount);
        };

        if let Some(until) = account.locked_at(now) {
            return Ok(Verification::Locked { until });
        }

        if verify_password(password, &account.password_hash) {
            Ok(Verification::Valid(Box::new(account)))
        } else {
            Ok(Verification::WrongPassword(Box::new(account)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryUserStore;
    use crate::store::{NewAccount, UserStore};

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn hash_and_verify_round_trip() {
        let hash = hash_password("Str0ng!Pass1").expect("hash");
        assert!(verify_password("Str0ng!Pass1", &hash));
        assert!(!verify_password("Str0ng!Pass2", &hash));
    }

    #[test]
    fn fallback_hash_parses_and_matches_nothing() {
        assert!(PasswordHash::new(FALLBACK_HASH).is_ok());
        assert!(!verify_password("anything", FALLBACK_HASH));
        assert!(!verify_password("", FALLBACK_HASH));
    }

    #[test]
    fn malformed_stored_hash_verifies_false() {
        assert!(!verify_password("password", "not-a-phc-string"));
    }

    #[test]
    fn password_policy() {
        assert!(acceptable_password("Str0ng!Passw0rd"));
        assert!(!acceptable_password("short!A1"));
        assert!(!acceptable_password("nouppercase!123"));
        assert!(!acceptable_password("NOLOWERCASE!123"));
        assert!(!acceptable_password("NoDigitsHere!!"));
        assert!(!acceptable_password("NoSpecials1234"));
    }

    #[tokio::test]
    async fn unknown_and_wrong_password_both_reject() {
        let users = Arc::new(MemoryUserStore::default());
        let hash = hash_password("Str0ng!Pass1").expect("hash");
        users
            .seed(NewAccount {
                email: "a@x.com".to_string(),
                name: "A".to_string(),
                password_hash: hash,
                organization_name: "Org".to_string(),
            })
            .await;

        let verifier = CredentialVerifier::new(users);
        assert!(matches!(
            verifier.verify("missing@x.com", "whatever", NOW).await.expect("verify"),
            Verification::UnknownAccount
        ));
        assert!(matches!(
            verifier.verify("a@x.com", "wrong", NOW).await.expect("verify"),
            Verification::WrongPassword(_)
        ));
        assert!(matches!(
            verifier.verify("a@x.com", "Str0ng!Pass1", NOW).await.expect("verify"),
            Verification::Valid(_)
        ));
    }

    #[tokio::test]
    async fn locked_account_rejected_before_comparison() {
        let users = Arc::new(MemoryUserStore::default());
        let hash = hash_password("Str0ng!Pass1").expect("hash");
        let account = users
            .seed(NewAccount {
                email: "a@x.com".to_string(),
                name: "A".to_string(),
                password_hash: hash,
                organization_name: "Org".to_string(),
            })
            .await;
        users
            .update_lock_state(account.id, 5, Some(NOW + 300))
            .await
            .expect("lock");

        let verifier = CredentialVerifier::new(users);
        // Correct password still rejected while the lock holds.
        match verifier.verify("a@x.com", "Str0ng!Pass1", NOW).await.expect("verify") {
            Verification::Locked { until } => assert_eq!(until, NOW + 300),
            other => panic!("expected Locked, got {other:?}"),
        }
    }
}
