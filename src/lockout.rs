//! Escalating account lockout.
//!
//! Consecutive failed logins increment `failed_attempts`; once the count
//! reaches the threshold the account is locked for a duration taken from an
//! escalating schedule, holding at the final step. A successful login clears
//! both fields.

use crate::store::{Account, UserStore};
use anyhow::Result;

const DEFAULT_THRESHOLD: i32 = 5;
const DEFAULT_SCHEDULE_MINUTES: [i64; 4] = [1, 5, 15, 60];

/// Result of recording a failed login.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FailureUpdate {
    pub failed_attempts: i32,
    pub locked_until: Option<i64>,
    /// Lock duration applied by this failure, if the threshold was crossed.
    pub lock_minutes: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct LockoutPolicy {
    threshold: i32,
    schedule_minutes: Vec<i64>,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            schedule_minutes: DEFAULT_SCHEDULE_MINUTES.to_vec(),
        }
    }
}

impl LockoutPolicy {
    #[must_use]
    pub fn new(threshold: i32, schedule_minutes: Vec<i64>) -> Self {
        Self {
            threshold: threshold.max(1),
            schedule_minutes,
        }
    }

    /// Same escalation schedule, different threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: i32) -> Self {
        self.threshold = threshold.max(1);
        self
    }

    /// Compute the state after one more consecutive failure.
    ///
    /// The schedule is indexed by how far past the threshold the counter is,
    /// one step per `threshold` further failures, holding at the last entry.
    #[must_use]
    pub fn on_failure(&self, failed_attempts_before: i32, now: i64) -> FailureUpdate {
        let failed_attempts = failed_attempts_before.saturating_add(1);
        if failed_attempts < self.threshold || self.schedule_minutes.is_empty() {
            return FailureUpdate {
                failed_attempts,
                locked_until: None,
                lock_minutes: None,
            };
        }

        let past_threshold = (failed_attempts - self.threshold) / self.threshold;
        let index = usize::try_from(past_threshold)
            .unwrap_or(usize::MAX)
            .min(self.schedule_minutes.len() - 1);
        let minutes = self.schedule_minutes[index];

        FailureUpdate {
            failed_attempts,
            locked_until: Some(now + minutes * 60),
            lock_minutes: Some(minutes),
        }
    }

    /// Record a failure against the account and persist the updated state.
    ///
    /// # Errors
    /// Returns an error if the store update fails.
    pub async fn record_failure(
        &self,
        users: &dyn UserStore,
        account: &Account,
        now: i64,
    ) -> Result<FailureUpdate> {
        let update = self.on_failure(account.failed_attempts, now);
        users
            .update_lock_state(account.id, update.failed_attempts, update.locked_until)
            .await?;
        Ok(update)
    }

    /// Clear the failure counter and lock after a successful authentication.
    ///
    /// # Errors
    /// Returns an error if the store update fails.
    pub async fn record_success(&self, users: &dyn UserStore, account: &Account) -> Result<()> {
        users.clear_lock_state(account.id).await
    }
}
