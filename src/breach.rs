//! k-anonymity breach-corpus check for registration passwords.
//!
//! Only the first five hex characters of the password's SHA-1 leave the
//! process; the corpus answers with candidate suffixes and counts. Corpus
//! degradation falls back to a fixed policy with a bounded timeout instead of
//! propagating: open (registration proceeds) by default, closed for
//! deployments that prefer strictness.

use anyhow::{Context, Result, anyhow};
use reqwest::Client;
use sha1::{Digest, Sha1};
use std::time::Duration;
use tracing::{Instrument, info_span, warn};

const DEFAULT_RANGE_URL: &str = "https://api.pwnedpasswords.com/range";
const DEFAULT_TIMEOUT_SECONDS: u64 = 2;
const PREFIX_LEN: usize = 5;

#[derive(Clone, Debug)]
pub struct BreachConfig {
    pub range_url: String,
    pub timeout: Duration,
    /// When the corpus is unreachable: `true` treats the password as clear,
    /// `false` rejects the registration.
    pub fail_open: bool,
}

impl Default for BreachConfig {
    fn default() -> Self {
        Self {
            range_url: DEFAULT_RANGE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            fail_open: true,
        }
    }
}

#[derive(Clone)]
pub struct BreachChecker {
    client: Client,
    config: BreachConfig,
}

impl BreachChecker {
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: BreachConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(config.timeout)
            .build()
            .context("failed to build breach-check client")?;
        Ok(Self { client, config })
    }

    /// Whether the password appears in the breach corpus.
    ///
    /// # Errors
    /// Returns an error only when the corpus is unreachable and the checker
    /// is configured fail-closed; fail-open degrades to `Ok(false)`.
    pub async fn is_breached(&self, password: &str) -> Result<bool> {
        let hex = sha1_hex_upper(password.as_bytes());
        let (prefix, suffix) = hex.split_at(PREFIX_LEN);

        match self.query_range(prefix).await {
            Ok(body) => Ok(body
                .lines()
                .filter_map(|line| line.split(':').next())
                .any(|candidate| candidate.eq_ignore_ascii_case(suffix))),
            Err(err) if self.config.fail_open => {
                warn!("breach check degraded, failing open: {err}");
                Ok(false)
            }
            Err(err) => Err(err.context("breach check degraded while configured fail-closed")),
        }
    }

    async fn query_range(&self, prefix: &str) -> Result<String> {
        let url = format!("{}/{prefix}", self.config.range_url.trim_end_matches('/'));
        let span = info_span!("breach.range", http.method = "GET", url = %url);
        let response = self
            .client
            .get(&url)
            .send()
            .instrument(span)
            .await
            .context("breach range request failed")?;

        if !response.status().is_success() {
            return Err(anyhow!("breach range request returned {}", response.status()));
        }

        response
            .text()
            .await
            .context("breach range response unreadable")
    }
}

fn sha1_hex_upper(input: &[u8]) -> String {
    Sha1::digest(input)
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect()
}
