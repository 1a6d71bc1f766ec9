//! Storage contracts for the security core.
//!
//! Every external store the core touches (user records, rate-limit counters,
//! ephemeral secrets, refresh sessions, signing keys) is reached through one
//! of these traits so the components can be exercised against in-memory
//! fakes. The core depends only on the read/write/TTL/atomic-increment
//! contracts, never on a concrete driver.

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use secrecy::SecretString;
use uuid::Uuid;

/// A user record with its mutable security fields.
#[derive(Clone, Debug)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role: String,
    pub organization_id: Uuid,
    pub failed_attempts: i32,
    pub locked_until: Option<i64>,
    pub mfa_enabled: bool,
    pub mfa_secret: Option<String>,
    pub mfa_recovery_hashes: Vec<String>,
    pub reset_token_hash: Option<Vec<u8>>,
    pub reset_token_expires: Option<i64>,
}

impl Account {
    /// Whether the account is locked at `now` (unix seconds).
    #[must_use]
    pub fn locked_at(&self, now: i64) -> Option<i64> {
        self.locked_until.filter(|until| *until > now)
    }
}

/// Input for account creation. The organization is created alongside the
/// account, which becomes its owner.
#[derive(Clone, Debug)]
pub struct NewAccount {
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub organization_name: String,
}

/// Outcome when attempting to create a new account.
#[derive(Debug)]
pub enum CreateOutcome {
    Created(Account),
    DuplicateEmail,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_account(&self, new: NewAccount, now: i64) -> Result<CreateOutcome>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>>;

    /// Persist lockout bookkeeping after a failed login.
    async fn update_lock_state(
        &self,
        id: Uuid,
        failed_attempts: i32,
        locked_until: Option<i64>,
    ) -> Result<()>;

    /// Reset `failed_attempts` to zero and clear `locked_until`.
    async fn clear_lock_state(&self, id: Uuid) -> Result<()>;

    /// Store the reset-token hash and expiry, replacing any pending token.
    async fn set_reset_token(&self, id: Uuid, token_hash: Vec<u8>, expires_at: i64) -> Result<()>;

    async fn find_by_reset_hash(&self, token_hash: &[u8]) -> Result<Option<Account>>;

    /// Replace the password hash and clear the reset-token fields.
    async fn replace_password(&self, id: Uuid, password_hash: String) -> Result<()>;

    /// Persist the verified shared secret, mark MFA enabled, and store the
    /// recovery-code hashes.
    async fn enable_mfa(
        &self,
        id: Uuid,
        secret: String,
        recovery_hashes: Vec<String>,
    ) -> Result<()>;

    /// Remove a matched recovery-code hash. Returns `false` when the hash was
    /// not present (already used or never issued).
    async fn consume_recovery_hash(&self, id: Uuid, hash: &str) -> Result<bool>;
}

/// Per-key failed-attempt counters with fixed windows and block marks.
///
/// `increment` must be atomic at the store level; under concurrent callers a
/// lost update may overshoot the limit by at most one point.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter for `key`, starting a fresh window when the
    /// previous one has elapsed. Returns the points consumed in the current
    /// window, including this call.
    async fn increment(&self, key: &str, window_seconds: i64, now: i64) -> Result<u32>;

    async fn blocked_until(&self, key: &str) -> Result<Option<i64>>;

    async fn set_block(&self, key: &str, until: i64) -> Result<()>;

    /// Drop the counter and any block mark for `key`.
    async fn clear(&self, key: &str) -> Result<()>;
}

/// Short-lived key-value records (MFA setup secrets). Values expire at their
/// TTL and are consumed with `delete`.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    async fn put(&self, key: &str, value: &str, ttl_seconds: i64, now: i64) -> Result<()>;

    /// Fetch a value if present and not expired at `now`.
    async fn get(&self, key: &str, now: i64) -> Result<Option<String>>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Server-tracked metadata for a refresh token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionRecord {
    pub account_id: Uuid,
    pub token_fragment: String,
    pub origin_addr: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: i64,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, record: SessionRecord, ttl_seconds: i64) -> Result<()>;

    async fn list_for_account(&self, account_id: Uuid) -> Result<Vec<SessionRecord>>;

    /// Remove one session by its token fragment (per-device revocation).
    async fn delete(&self, account_id: Uuid, token_fragment: &str) -> Result<()>;

    /// Remove every session for the account. Returns the number removed.
    async fn delete_all_for_account(&self, account_id: Uuid) -> Result<u64>;
}

/// Read-only access to the asymmetric signing key.
///
/// The key is fetched at issuance time, never cached by callers, so rotation
/// in the backing store takes effect on the next issue/verify call.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn signing_key_pem(&self) -> Result<SecretString>;
}
