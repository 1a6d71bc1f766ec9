use crate::{
    api,
    breach::BreachConfig,
    cli::globals::GlobalArgs,
    lockout::LockoutPolicy,
    service::AuthConfig,
    throttle::ThrottlePolicy,
};
use anyhow::Result;
use secrecy::SecretString;
use std::time::Duration;

/// Full server configuration extracted from the CLI.
#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub vault_url: String,
    pub vault_token: String,
    pub vault_kv_mount: String,
    pub vault_kv_path: String,
    pub mfa_issuer: String,
    pub access_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
    pub reset_token_ttl_seconds: i64,
    pub throttle_points: u32,
    pub throttle_window_seconds: i64,
    pub throttle_block_seconds: i64,
    pub lockout_threshold: i32,
    pub breach_range_url: String,
    pub breach_timeout_seconds: u64,
    pub breach_fail_closed: bool,
}

/// Execute the server action.
///
/// # Errors
/// Returns an error if the database, Vault, or listener setup fails.
pub async fn handle(args: Args) -> Result<()> {
    let mut globals = GlobalArgs::new(
        args.vault_url,
        args.vault_kv_mount,
        args.vault_kv_path,
    );
    globals.set_token(SecretString::from(args.vault_token));

    let auth_config = AuthConfig::default()
        .with_login_throttle(ThrottlePolicy {
            points: args.throttle_points,
            window_seconds: args.throttle_window_seconds,
            block_seconds: args.throttle_block_seconds,
        })
        .with_lockout(LockoutPolicy::default().with_threshold(args.lockout_threshold))
        .with_mfa_issuer(args.mfa_issuer)
        .with_token_ttls(args.access_ttl_seconds, args.refresh_ttl_seconds)
        .with_reset_token_ttl(args.reset_token_ttl_seconds);

    let breach_config = BreachConfig {
        range_url: args.breach_range_url,
        timeout: Duration::from_secs(args.breach_timeout_seconds),
        fail_open: !args.breach_fail_closed,
    };

    api::new(args.port, args.dsn, &globals, auth_config, breach_config).await
}
