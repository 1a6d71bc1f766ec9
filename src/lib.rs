//! # Custos (Authentication & Account Security Core)
//!
//! `custos` is an authentication and account-security service. It handles
//! registration, credential verification, and session token issuance, with
//! the account-protection machinery wrapped around them.
//!
//! ## Registration
//!
//! - **Email uniqueness:** emails are matched case-insensitively and a taken
//!   email is indistinguishable from a validation failure in the response.
//! - **Password policy:** at least 12 characters drawn from four character
//!   classes, hashed with Argon2id, optionally screened against a
//!   k-anonymity breached-password corpus.
//! - **Organizations:** every account owns a fresh organization created in
//!   the same transaction.
//!
//! ## Login protection
//!
//! Failed logins are rate limited per identifier before the user store is
//! touched, and consecutive failures escalate into timed account locks.
//! Unknown accounts and wrong passwords produce identical responses and
//! comparable timing.
//!
//! ## MFA, reset, and tokens
//!
//! TOTP enrollment parks the secret in an ephemeral store until the first
//! code verifies, then single-use recovery codes are issued. Password resets
//! use hashed single-use tokens and revoke every refresh session. Access and
//! refresh tokens are RS256 JWTs signed with a key read from Vault.

pub mod api;
pub mod audit;
pub mod breach;
pub mod cli;
pub mod credentials;
pub mod lockout;
pub mod mfa;
pub mod reset;
pub mod service;
pub mod session;
pub mod store;
pub mod throttle;
pub mod token;
pub mod vault;

#[cfg(test)]
pub(crate) mod testkeys;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
