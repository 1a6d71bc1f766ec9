//! Fixed-window attempt throttling.
//!
//! Tracks consumed points per identity key inside a fixed window; exceeding
//! the point limit blocks the key for a separate, longer duration. Atomicity
//! of the increment is the counter store's contract, so concurrent callers
//! can overshoot the limit by at most one point.

use crate::store::CounterStore;
use anyhow::Result;
use std::sync::Arc;

const DEFAULT_POINTS: u32 = 5;
const DEFAULT_WINDOW_SECONDS: i64 = 15 * 60;
const DEFAULT_BLOCK_SECONDS: i64 = 60 * 60;

/// Decision for a single consumed attempt. Rejection is an expected branch,
/// not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThrottleDecision {
    Allowed,
    Blocked { retry_after_seconds: i64 },
}

#[derive(Clone, Copy, Debug)]
pub struct ThrottlePolicy {
    pub points: u32,
    pub window_seconds: i64,
    pub block_seconds: i64,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            points: DEFAULT_POINTS,
            window_seconds: DEFAULT_WINDOW_SECONDS,
            block_seconds: DEFAULT_BLOCK_SECONDS,
        }
    }
}

#[derive(Clone)]
pub struct AttemptThrottle {
    store: Arc<dyn CounterStore>,
    policy: ThrottlePolicy,
    key_prefix: &'static str,
}

impl AttemptThrottle {
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>, policy: ThrottlePolicy, key_prefix: &'static str) -> Self {
        Self {
            store,
            policy,
            key_prefix,
        }
    }

    fn store_key(&self, key: &str) -> String {
        format!("{}:{key}", self.key_prefix)
    }

    /// Consume one point for `key` at `now` (unix seconds).
    ///
    /// An active block short-circuits without consuming; crossing the point
    /// limit installs a block for the configured duration, independent of the
    /// window.
    ///
    /// # Errors
    /// Returns an error if the counter store fails.
    pub async fn consume(&self, key: &str, now: i64) -> Result<ThrottleDecision> {
        let store_key = self.store_key(key);

        if let Some(until) = self.store.blocked_until(&store_key).await? {
            if until > now {
                return Ok(ThrottleDecision::Blocked {
                    retry_after_seconds: until - now,
                });
            }
            // Block elapsed; evaluate fresh.
            self.store.clear(&store_key).await?;
        }

        let points = self
            .store
            .increment(&store_key, self.policy.window_seconds, now)
            .await?;

        if points <= self.policy.points {
            return Ok(ThrottleDecision::Allowed);
        }

        let until = now + self.policy.block_seconds;
        self.store.set_block(&store_key, until).await?;
        Ok(ThrottleDecision::Blocked {
            retry_after_seconds: self.policy.block_seconds,
        })
    }

    /// Clear consumed points for `key` after a successful authentication.
    ///
    /// # Errors
    /// Returns an error if the counter store fails.
    pub async fn reset(&self, key: &str) -> Result<()> {
        self.store.clear(&self.store_key(key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryCounterStore;

    const NOW: i64 = 1_700_000_000;

    fn throttle(policy: ThrottlePolicy) -> AttemptThrottle {
        AttemptThrottle::new(Arc::new(MemoryCounterStore::default()), policy, "login_fail")
    }

    #[tokio::test]
    async fn allows_up_to_the_point_limit() {
        let throttle = throttle(ThrottlePolicy::default());
        for _ in 0..5 {
            assert_eq!(
                throttle.consume("a@x.com", NOW).await.expect("consume"),
                ThrottleDecision::Allowed
            );
        }
    }

    #[tokio::test]
    async fn blocks_past_the_limit_with_positive_retry_after() {
        let throttle = throttle(ThrottlePolicy::default());
        for _ in 0..5 {
            throttle.consume("a@x.com", NOW).await.expect("consume");
        }
        match throttle.consume("a@x.com", NOW).await.expect("consume") {
            ThrottleDecision::Blocked {
                retry_after_seconds,
            } => assert_eq!(retry_after_seconds, 60 * 60),
            ThrottleDecision::Allowed => panic!("expected block"),
        }

        // Retry-after shrinks as time passes while the block holds.
        match throttle.consume("a@x.com", NOW + 100).await.expect("consume") {
            ThrottleDecision::Blocked {
                retry_after_seconds,
            } => assert_eq!(retry_after_seconds, 60 * 60 - 100),
            ThrottleDecision::Allowed => panic!("expected block"),
        }
    }

    #[tokio::test]
    async fn block_expiry_evaluates_fresh() {
        let policy = ThrottlePolicy {
            points: 2,
            window_seconds: 60,
            block_seconds: 120,
        };
        let throttle = throttle(policy);
        for _ in 0..3 {
            throttle.consume("key", NOW).await.expect("consume");
        }
        assert!(matches!(
            throttle.consume("key", NOW).await.expect("consume"),
            ThrottleDecision::Blocked { .. }
        ));

        // After the block elapses the key starts a fresh window.
        assert_eq!(
            throttle.consume("key", NOW + 121).await.expect("consume"),
            ThrottleDecision::Allowed
        );
    }

    #[tokio::test]
    async fn window_expiry_resets_points() {
        let policy = ThrottlePolicy {
            points: 2,
            window_seconds: 60,
            block_seconds: 120,
        };
        let throttle = throttle(policy);
        throttle.consume("key", NOW).await.expect("consume");
        throttle.consume("key", NOW).await.expect("consume");
        // Next window: counting restarts.
        assert_eq!(
            throttle.consume("key", NOW + 61).await.expect("consume"),
            ThrottleDecision::Allowed
        );
        assert_eq!(
            throttle.consume("key", NOW + 62).await.expect("consume"),
            ThrottleDecision::Allowed
        );
    }

    #[tokio::test]
    async fn reset_clears_consumed_points() {
        let policy = ThrottlePolicy {
            points: 1,
            window_seconds: 60,
            block_seconds: 120,
        };
        let throttle = throttle(policy);
        throttle.consume("key", NOW).await.expect("consume");
        throttle.reset("key").await.expect("reset");
        assert_eq!(
            throttle.consume("key", NOW).await.expect("consume"),
            ThrottleDecision::Allowed
        );
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let policy = ThrottlePolicy {
            points: 1,
            window_seconds: 60,
            block_seconds: 120,
        };
        let throttle = throttle(policy);
        throttle.consume("a", NOW).await.expect("consume");
        assert!(matches!(
            throttle.consume("a", NOW).await.expect("consume"),
            ThrottleDecision::Blocked { .. }
        ));
        assert_eq!(
            throttle.consume("b", NOW).await.expect("consume"),
            ThrottleDecision::Allowed
        );
    }
}
