//! In-memory store implementations.
//!
//! Backed by `tokio::sync::Mutex<HashMap>`; used by the test suites and handy
//! for local runs without a database. TTL semantics mirror the Postgres
//! implementations: expiry is judged against the caller-supplied clock.

use super::{
    Account, CounterStore, CreateOutcome, EphemeralStore, NewAccount, SecretStore, SessionRecord,
    SessionStore, UserStore,
};
use anyhow::Result;
use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryUserStore {
    accounts: Mutex<HashMap<Uuid, Account>>,
}

impl MemoryUserStore {
    /// Insert an account directly, bypassing duplicate checks. Test helper.
    pub async fn seed(&self, new: NewAccount) -> Account {
        let account = Account {
            id: Uuid::new_v4(),
            email: new.email,
            name: new.name,
            password_hash: new.password_hash,
            role: "owner".to_string(),
            organization_id: Uuid::new_v4(),
            failed_attempts: 0,
            locked_until: None,
            mfa_enabled: false,
            mfa_secret: None,
            mfa_recovery_hashes: Vec::new(),
            reset_token_hash: None,
            reset_token_expires: None,
        };
        self.accounts
            .lock()
            .await
            .insert(account.id, account.clone());
        account
    }

    async fn update<F>(&self, id: Uuid, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Account),
    {
        let mut accounts = self.accounts.lock().await;
        if let Some(account) = accounts.get_mut(&id) {
            apply(account);
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create_account(&self, new: NewAccount, _now: i64) -> Result<CreateOutcome> {
        {
            let accounts = self.accounts.lock().await;
            if accounts
                .values()
                .any(|a| a.email.eq_ignore_ascii_case(&new.email))
            {
                return Ok(CreateOutcome::DuplicateEmail);
            }
        }
        Ok(CreateOutcome::Created(self.seed(new).await))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        let accounts = self.accounts.lock().await;
        Ok(accounts
            .values()
            .find(|a| a.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>> {
        Ok(self.accounts.lock().await.get(&id).cloned())
    }

    async fn update_lock_state(
        &self,
        id: Uuid,
        failed_attempts: i32,
        locked_until: Option<i64>,
    ) -> Result<()> {
        self.update(id, |account| {
            account.failed_attempts = failed_attempts;
            account.locked_until = locked_until;
        })
        .await
    }

    async fn clear_lock_state(&self, id: Uuid) -> Result<()> {
        self.update(id, |account| {
            account.failed_attempts = 0;
            account.locked_until = None;
        })
        .await
    }

    async fn set_reset_token(&self, id: Uuid, token_hash: Vec<u8>, expires_at: i64) -> Result<()> {
        self.update(id, |account| {
            account.reset_token_hash = Some(token_hash);
            account.reset_token_expires = Some(expires_at);
        })
        .await
    }

    async fn find_by_reset_hash(&self, token_hash: &[u8]) -> Result<Option<Account>> {
        let accounts = self.accounts.lock().await;
        Ok(accounts
            .values()
            .find(|a| a.reset_token_hash.as_deref() == Some(token_hash))
            .cloned())
    }

    async fn replace_password(&self, id: Uuid, password_hash: String) -> Result<()> {
        self.update(id, |account| {
            account.password_hash = password_hash;
            account.reset_token_hash = None;
            account.reset_token_expires = None;
        })
        .await
    }

    async fn enable_mfa(
        &self,
        id: Uuid,
        secret: String,
        recovery_hashes: Vec<String>,
    ) -> Result<()> {
        self.update(id, |account| {
            account.mfa_enabled = true;
            account.mfa_secret = Some(secret);
            account.mfa_recovery_hashes = recovery_hashes;
        })
        .await
    }

    async fn consume_recovery_hash(&self, id: Uuid, hash: &str) -> Result<bool> {
        let mut accounts = self.accounts.lock().await;
        let Some(account) = accounts.get_mut(&id) else {
            return Ok(false);
        };
        let before = account.mfa_recovery_hashes.len();
        account.mfa_recovery_hashes.retain(|h| h != hash);
        Ok(account.mfa_recovery_hashes.len() < before)
    }
}

struct CounterEntry {
    points: u32,
    window_started_at: i64,
    blocked_until: Option<i64>,
}

#[derive(Default)]
pub struct MemoryCounterStore {
    counters: Mutex<HashMap<String, CounterEntry>>,
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, window_seconds: i64, now: i64) -> Result<u32> {
        let mut counters = self.counters.lock().await;
        let entry = counters.entry(key.to_string()).or_insert(CounterEntry {
            points: 0,
            window_started_at: now,
            blocked_until: None,
        });
        if now - entry.window_started_at >= window_seconds {
            entry.points = 0;
            entry.window_started_at = now;
        }
        entry.points += 1;
        Ok(entry.points)
    }

    async fn blocked_until(&self, key: &str) -> Result<Option<i64>> {
        let counters = self.counters.lock().await;
        Ok(counters.get(key).and_then(|entry| entry.blocked_until))
    }

    async fn set_block(&self, key: &str, until: i64) -> Result<()> {
        let mut counters = self.counters.lock().await;
        if let Some(entry) = counters.get_mut(key) {
            entry.blocked_until = Some(until);
        } else {
            counters.insert(
                key.to_string(),
                CounterEntry {
                    points: 0,
                    window_started_at: until,
                    blocked_until: Some(until),
                },
            );
        }
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<()> {
        self.counters.lock().await.remove(key);
        Ok(())
    }
}

struct EphemeralEntry {
    value: String,
    expires_at: i64,
}

#[derive(Default)]
pub struct MemoryEphemeralStore {
    entries: Mutex<HashMap<String, EphemeralEntry>>,
}

#[async_trait]
impl EphemeralStore for MemoryEphemeralStore {
    async fn put(&self, key: &str, value: &str, ttl_seconds: i64, now: i64) -> Result<()> {
        let mut entries = self.entries.lock().await;
        // Opportunistic pruning keeps the map from accumulating dead entries.
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            key.to_string(),
            EphemeralEntry {
                value: value.to_string(),
                expires_at: now + ttl_seconds,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str, now: i64) -> Result<Option<String>> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<Vec<SessionRecord>>,
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, record: SessionRecord, _ttl_seconds: i64) -> Result<()> {
        self.sessions.lock().await.push(record);
        Ok(())
    }

    async fn list_for_account(&self, account_id: Uuid) -> Result<Vec<SessionRecord>> {
        let sessions = self.sessions.lock().await;
        Ok(sessions
            .iter()
            .filter(|record| record.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn delete(&self, account_id: Uuid, token_fragment: &str) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|record| {
            record.account_id != account_id || record.token_fragment != token_fragment
        });
        Ok(())
    }

    async fn delete_all_for_account(&self, account_id: Uuid) -> Result<u64> {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|record| record.account_id != account_id);
        Ok((before - sessions.len()) as u64)
    }
}

/// Secret store with a fixed key. Tests and local runs.
pub struct StaticSecretStore {
    key: SecretString,
}

impl StaticSecretStore {
    #[must_use]
    pub fn new(key_pem: &str) -> Self {
        Self {
            key: SecretString::from(key_pem.to_string()),
        }
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn signing_key_pem(&self) -> Result<SecretString> {
        Ok(self.key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn new_account(email: &str) -> NewAccount {
        NewAccount {
            email: email.to_string(),
            name: "A".to_string(),
            password_hash: "hash".to_string(),
            organization_name: "Org".to_string(),
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_reported_case_insensitively() {
        let store = MemoryUserStore::default();
        let created = store
            .create_account(new_account("a@x.com"), NOW)
            .await
            .expect("create");
        assert!(matches!(created, CreateOutcome::Created(_)));

        let duplicate = store
            .create_account(new_account("A@X.COM"), NOW)
            .await
            .expect("create");
        assert!(matches!(duplicate, CreateOutcome::DuplicateEmail));
    }

    #[tokio::test]
    async fn recovery_hash_consumed_at_most_once() {
        let store = MemoryUserStore::default();
        let account = store.seed(new_account("a@x.com")).await;
        store
            .enable_mfa(account.id, "secret".to_string(), vec!["h1".to_string()])
            .await
            .expect("enable");

        assert!(store.consume_recovery_hash(account.id, "h1").await.expect("consume"));
        assert!(!store.consume_recovery_hash(account.id, "h1").await.expect("consume"));
        assert!(!store.consume_recovery_hash(account.id, "h2").await.expect("consume"));
    }

    #[tokio::test]
    async fn ephemeral_entries_expire_at_ttl() {
        let store = MemoryEphemeralStore::default();
        store.put("k", "v", 600, NOW).await.expect("put");
        assert_eq!(store.get("k", NOW + 599).await.expect("get").as_deref(), Some("v"));
        assert_eq!(store.get("k", NOW + 600).await.expect("get"), None);
    }

    #[tokio::test]
    async fn replace_password_clears_reset_fields() {
        let store = MemoryUserStore::default();
        let account = store.seed(new_account("a@x.com")).await;
        store
            .set_reset_token(account.id, vec![1, 2, 3], NOW + 3600)
            .await
            .expect("set");
        assert!(store
            .find_by_reset_hash(&[1, 2, 3])
            .await
            .expect("find")
            .is_some());

        store
            .replace_password(account.id, "new-hash".to_string())
            .await
            .expect("replace");
        assert!(store
            .find_by_reset_hash(&[1, 2, 3])
            .await
            .expect("find")
            .is_none());
        let reloaded = store.find_by_id(account.id).await.expect("find").expect("account");
        assert_eq!(reloaded.password_hash, "new-hash");
        assert_eq!(reloaded.reset_token_expires, None);
    }

    #[tokio::test]
    async fn delete_all_sessions_reports_count() {
        let store = MemorySessionStore::default();
        let account_id = Uuid::new_v4();
        for fragment in ["aaaa", "bbbb"] {
            store
                .insert(
                    SessionRecord {
                        account_id,
                        token_fragment: fragment.to_string(),
                        origin_addr: None,
                        user_agent: None,
                        created_at: NOW,
                    },
                    3600,
                )
                .await
                .expect("insert");
        }
        assert_eq!(store.delete_all_for_account(account_id).await.expect("delete"), 2);
        assert!(store.list_for_account(account_id).await.expect("list").is_empty());
    }
}
