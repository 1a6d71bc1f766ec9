//! Token signing key sourced from a Vault KV v2 secret.

use crate::{cli::globals::GlobalArgs, store::SecretStore, vault};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{Instrument, info_span};

const SIGNING_KEY_FIELD: &str = "private_key_pem";

/// Reads the RS256 private key from Vault on every call, so a rotated key
/// takes effect without a restart.
pub struct VaultSecretStore {
    client: Client,
    url: String,
    token: SecretString,
}

impl VaultSecretStore {
    /// # Errors
    /// Returns an error if the Vault URL is invalid or the HTTP client cannot
    /// be built.
    pub fn from_globals(globals: &GlobalArgs) -> Result<Self> {
        let path = format!("/v1/{}/data/{}", globals.kv_mount, globals.kv_path);
        let url = vault::endpoint_url(&globals.vault_url, &path)?;
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            url,
            token: globals.vault_token.clone(),
        })
    }
}

#[async_trait]
impl SecretStore for VaultSecretStore {
    async fn signing_key_pem(&self) -> Result<SecretString> {
        let span = info_span!(
            "vault.kv.read",
            http.method = "GET",
            url = %self.url
        );
        let response = self
            .client
            .get(&self.url)
            .header("X-Vault-Token", self.token.expose_secret())
            .send()
            .instrument(span)
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("vault kv read failed: {status} {body}"));
        }

        let json: Value = response.json().await?;
        let pem = json
            .get("data")
            .and_then(|data| data.get("data"))
            .and_then(|data| data.get(SIGNING_KEY_FIELD))
            .and_then(Value::as_str)
            .context("signing key missing from vault response")?;

        Ok(SecretString::from(pem.to_string()))
    }
}
