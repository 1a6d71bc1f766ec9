//! Postgres-backed store implementations.
//!
//! Timestamps are BIGINT unix seconds supplied by the caller, matching the
//! deterministic clock the core components use. Counter increments are a
//! single statement so concurrent logins cannot lose updates.

use super::{
    Account, CounterStore, CreateOutcome, EphemeralStore, NewAccount, SessionRecord, SessionStore,
    UserStore,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::Instrument;
use uuid::Uuid;

/// Postgres unique-violation SQLSTATE.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err.as_database_error().and_then(|db| db.code()),
        Some(code) if code == "23505"
    )
}

fn row_to_account(row: &PgRow) -> Account {
    Account {
        id: row.get("id"),
        email: row.get("email"),
        name: row.get("name"),
        password_hash: row.get("password_hash"),
        role: row.get("role"),
        organization_id: row.get("organization_id"),
        failed_attempts: row.get("failed_attempts"),
        locked_until: row.get("locked_until"),
        mfa_enabled: row.get("mfa_enabled"),
        mfa_secret: row.get("mfa_secret"),
        mfa_recovery_hashes: row.get("mfa_recovery_hashes"),
        reset_token_hash: row.get("reset_token_hash"),
        reset_token_expires: row.get("reset_token_expires"),
    }
}

const ACCOUNT_COLUMNS: &str = r"
    id, email, name, password_hash, role, organization_id,
    failed_attempts, locked_until, mfa_enabled, mfa_secret,
    mfa_recovery_hashes, reset_token_hash, reset_token_expires
";

pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create_account(&self, new: NewAccount, now: i64) -> Result<CreateOutcome> {
        // Organization and owner account are created together or not at all.
        let mut tx = self.pool.begin().await.context("begin signup transaction")?;

        let query = r"
            INSERT INTO organizations (id, name, created_at)
            VALUES ($1, $2, $3)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let organization_id = Uuid::new_v4();
        sqlx::query(query)
            .bind(organization_id)
            .bind(&new.organization_name)
            .bind(now)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to insert organization")?;

        let query = format!(
            r"
            INSERT INTO accounts
                (id, email, name, password_hash, role, organization_id, created_at)
            VALUES ($1, $2, $3, $4, 'owner', $5, $6)
            RETURNING {ACCOUNT_COLUMNS}
            "
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(Uuid::new_v4())
            .bind(&new.email)
            .bind(&new.name)
            .bind(&new.password_hash)
            .bind(organization_id)
            .bind(now)
            .fetch_one(&mut *tx)
            .instrument(span)
            .await;

        let account = match row {
            Ok(row) => row_to_account(&row),
            Err(err) => {
                if is_unique_violation(&err) {
                    let _ = tx.rollback().await;
                    return Ok(CreateOutcome::DuplicateEmail);
                }
                return Err(err).context("failed to insert account");
            }
        };

        tx.commit().await.context("commit signup transaction")?;
        Ok(CreateOutcome::Created(account))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE lower(email) = lower($1)");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup account by email")?;
        Ok(row.as_ref().map(row_to_account))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup account by id")?;
        Ok(row.as_ref().map(row_to_account))
    }

    async fn update_lock_state(
        &self,
        id: Uuid,
        failed_attempts: i32,
        locked_until: Option<i64>,
    ) -> Result<()> {
        let query = r"
            UPDATE accounts
            SET failed_attempts = $2, locked_until = $3
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(failed_attempts)
            .bind(locked_until)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update lock state")?;
        Ok(())
    }

    async fn clear_lock_state(&self, id: Uuid) -> Result<()> {
        let query = r"
            UPDATE accounts
            SET failed_attempts = 0, locked_until = NULL
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to clear lock state")?;
        Ok(())
    }

    async fn set_reset_token(&self, id: Uuid, token_hash: Vec<u8>, expires_at: i64) -> Result<()> {
        let query = r"
            UPDATE accounts
            SET reset_token_hash = $2, reset_token_expires = $3
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(token_hash)
            .bind(expires_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to set reset token")?;
        Ok(())
    }

    async fn find_by_reset_hash(&self, token_hash: &[u8]) -> Result<Option<Account>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE reset_token_hash = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup account by reset hash")?;
        Ok(row.as_ref().map(row_to_account))
    }

    async fn replace_password(&self, id: Uuid, password_hash: String) -> Result<()> {
        let query = r"
            UPDATE accounts
            SET password_hash = $2,
                reset_token_hash = NULL,
                reset_token_expires = NULL
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(password_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to replace password")?;
        Ok(())
    }

    async fn enable_mfa(
        &self,
        id: Uuid,
        secret: String,
        recovery_hashes: Vec<String>,
    ) -> Result<()> {
        let query = r"
            UPDATE accounts
            SET mfa_enabled = TRUE, mfa_secret = $2, mfa_recovery_hashes = $3
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(secret)
            .bind(recovery_hashes)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to enable mfa")?;
        Ok(())
    }

    async fn consume_recovery_hash(&self, id: Uuid, hash: &str) -> Result<bool> {
        // array_remove only changes the row when the hash is present, so the
        // affected-row count doubles as the consumed flag.
        let query = r"
            UPDATE accounts
            SET mfa_recovery_hashes = array_remove(mfa_recovery_hashes, $2)
            WHERE id = $1 AND $2 = ANY(mfa_recovery_hashes)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(id)
            .bind(hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to consume recovery hash")?;
        Ok(result.rows_affected() > 0)
    }
}

pub struct PgCounterStore {
    pool: PgPool,
}

impl PgCounterStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CounterStore for PgCounterStore {
    async fn increment(&self, key: &str, window_seconds: i64, now: i64) -> Result<u32> {
        // Single upsert keeps the increment atomic; an elapsed window restarts
        // counting inside the same statement.
        let query = r"
            INSERT INTO rate_limit_counters (key, points, window_started_at)
            VALUES ($1, 1, $2)
            ON CONFLICT (key) DO UPDATE
            SET points = CASE
                    WHEN $2 - rate_limit_counters.window_started_at >= $3 THEN 1
                    ELSE rate_limit_counters.points + 1
                END,
                window_started_at = CASE
                    WHEN $2 - rate_limit_counters.window_started_at >= $3 THEN $2
                    ELSE rate_limit_counters.window_started_at
                END
            RETURNING points
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(key)
            .bind(now)
            .bind(window_seconds)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to increment counter")?;
        let points: i32 = row.get("points");
        Ok(u32::try_from(points).unwrap_or(0))
    }

    async fn blocked_until(&self, key: &str) -> Result<Option<i64>> {
        let query = "SELECT blocked_until FROM rate_limit_counters WHERE key = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(key)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to read block mark")?;
        Ok(row.and_then(|row| row.get("blocked_until")))
    }

    async fn set_block(&self, key: &str, until: i64) -> Result<()> {
        let query = r"
            INSERT INTO rate_limit_counters (key, points, window_started_at, blocked_until)
            VALUES ($1, 0, $2, $2)
            ON CONFLICT (key) DO UPDATE SET blocked_until = $2
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(key)
            .bind(until)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to set block mark")?;
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<()> {
        let query = "DELETE FROM rate_limit_counters WHERE key = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(key)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to clear counter")?;
        Ok(())
    }
}

pub struct PgEphemeralStore {
    pool: PgPool,
}

impl PgEphemeralStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EphemeralStore for PgEphemeralStore {
    async fn put(&self, key: &str, value: &str, ttl_seconds: i64, now: i64) -> Result<()> {
        // Opportunistic pruning keeps the table from accumulating dead rows.
        let query = "DELETE FROM ephemeral_secrets WHERE expires_at <= $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to prune ephemeral secrets")?;

        let query = r"
            INSERT INTO ephemeral_secrets (key, value, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (key) DO UPDATE SET value = $2, expires_at = $3
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(key)
            .bind(value)
            .bind(now + ttl_seconds)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to store ephemeral secret")?;
        Ok(())
    }

    async fn get(&self, key: &str, now: i64) -> Result<Option<String>> {
        let query = "SELECT value FROM ephemeral_secrets WHERE key = $1 AND expires_at > $2";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(key)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to read ephemeral secret")?;
        Ok(row.map(|row| row.get("value")))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let query = "DELETE FROM ephemeral_secrets WHERE key = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(key)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete ephemeral secret")?;
        Ok(())
    }
}

pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn insert(&self, record: SessionRecord, ttl_seconds: i64) -> Result<()> {
        let query = r"
            INSERT INTO refresh_sessions
                (account_id, token_fragment, origin_addr, user_agent, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (account_id, token_fragment) DO UPDATE
            SET origin_addr = $3, user_agent = $4, created_at = $5, expires_at = $6
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(record.account_id)
            .bind(&record.token_fragment)
            .bind(&record.origin_addr)
            .bind(&record.user_agent)
            .bind(record.created_at)
            .bind(record.created_at + ttl_seconds)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert refresh session")?;
        Ok(())
    }

    async fn list_for_account(&self, account_id: Uuid) -> Result<Vec<SessionRecord>> {
        let query = r"
            SELECT account_id, token_fragment, origin_addr, user_agent, created_at
            FROM refresh_sessions
            WHERE account_id = $1
              AND expires_at > (EXTRACT(EPOCH FROM NOW()))::BIGINT
            ORDER BY created_at DESC
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(account_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list refresh sessions")?;
        Ok(rows
            .into_iter()
            .map(|row| SessionRecord {
                account_id: row.get("account_id"),
                token_fragment: row.get("token_fragment"),
                origin_addr: row.get("origin_addr"),
                user_agent: row.get("user_agent"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn delete(&self, account_id: Uuid, token_fragment: &str) -> Result<()> {
        // Per-device revocation is idempotent.
        let query = r"
            DELETE FROM refresh_sessions
            WHERE account_id = $1 AND token_fragment = $2
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(account_id)
            .bind(token_fragment)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete refresh session")?;
        Ok(())
    }

    async fn delete_all_for_account(&self, account_id: Uuid) -> Result<u64> {
        let query = "DELETE FROM refresh_sessions WHERE account_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(account_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete refresh sessions")?;
        Ok(result.rows_affected())
    }
}
