//! Authentication service: composition of the security components.
//!
//! The service owns the login control flow ordering. Throttling is consulted
//! before anything touches the user store, lockout is checked before the
//! password comparison, and MFA runs only after the password verifies. Every
//! rejection reason an attacker could distinguish collapses into
//! `InvalidCredentials` at this boundary.

use crate::audit::{self, AuditAction, AuditEvent, AuditSink};
use crate::breach::BreachChecker;
use crate::credentials::{CredentialVerifier, Verification, acceptable_password, hash_password};
use crate::lockout::LockoutPolicy;
use crate::mfa::{ConfirmOutcome, EnrollOutcome, MfaService};
use crate::reset::{ConsumeOutcome, ResetDelivery, ResetFlow};
use crate::session::{ClientInfo, SessionIssuer, TokenBundle};
use crate::store::{
    Account, CounterStore, CreateOutcome, EphemeralStore, NewAccount, SecretStore, SessionStore,
    UserStore,
};
use crate::throttle::{AttemptThrottle, ThrottleDecision, ThrottlePolicy};
use anyhow::{Context, Result};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

const LOGIN_THROTTLE_PREFIX: &str = "login_fail";
const RESET_THROTTLE_PREFIX: &str = "pwd_reset";

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap_or_else(|_| unreachable!())
    })
}

/// Whether the string passes the registration email shape check.
#[must_use]
pub fn acceptable_email(email: &str) -> bool {
    email.len() <= 254 && email_pattern().is_match(email)
}

/// Tunable policy knobs, separate from the store wiring.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    login_throttle: ThrottlePolicy,
    reset_throttle: ThrottlePolicy,
    lockout: LockoutPolicy,
    mfa_issuer: String,
    mfa_setup_ttl_seconds: i64,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
    reset_token_ttl_seconds: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            login_throttle: ThrottlePolicy::default(),
            reset_throttle: ThrottlePolicy {
                points: 3,
                window_seconds: 3600,
                block_seconds: 3600,
            },
            lockout: LockoutPolicy::default(),
            mfa_issuer: "custos".to_string(),
            mfa_setup_ttl_seconds: 600,
            access_ttl_seconds: 3600,
            refresh_ttl_seconds: 7 * 24 * 3600,
            reset_token_ttl_seconds: 3600,
        }
    }
}

impl AuthConfig {
    #[must_use]
    pub fn with_login_throttle(mut self, policy: ThrottlePolicy) -> Self {
        self.login_throttle = policy;
        self
    }

    #[must_use]
    pub fn with_reset_throttle(mut self, policy: ThrottlePolicy) -> Self {
        self.reset_throttle = policy;
        self
    }

    #[must_use]
    pub fn with_lockout(mut self, policy: LockoutPolicy) -> Self {
        self.lockout = policy;
        self
    }

    #[must_use]
    pub fn with_mfa_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.mfa_issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn with_mfa_setup_ttl(mut self, seconds: i64) -> Self {
        self.mfa_setup_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_token_ttls(mut self, access_seconds: i64, refresh_seconds: i64) -> Self {
        self.access_ttl_seconds = access_seconds;
        self.refresh_ttl_seconds = refresh_seconds;
        self
    }

    #[must_use]
    pub fn with_reset_token_ttl(mut self, seconds: i64) -> Self {
        self.reset_token_ttl_seconds = seconds;
        self
    }
}

/// Store and sink wiring for the service.
pub struct AuthBackends {
    pub users: Arc<dyn UserStore>,
    pub counters: Arc<dyn CounterStore>,
    pub ephemeral: Arc<dyn EphemeralStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub secrets: Arc<dyn SecretStore>,
    pub audit: Arc<dyn AuditSink>,
    pub reset_delivery: Arc<dyn ResetDelivery>,
}

/// Registration input.
#[derive(Clone, Debug)]
pub struct RegisterRequest {
    pub email: String,
    pub name: String,
    pub password: String,
    pub organization_name: String,
}

/// Login input. `mfa_code` is absent on the first round trip.
#[derive(Clone, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub mfa_code: Option<String>,
}

#[derive(Debug)]
pub enum RegisterOutcome {
    Created(Box<Account>),
    Rejected(RegisterRejection),
}

/// Rejection reasons for registration. `EmailUnavailable` must not be
/// distinguishable from validation failures at the boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegisterRejection {
    InvalidEmail,
    InvalidName,
    InvalidOrganizationName,
    UnacceptablePassword,
    BreachedPassword,
    EmailUnavailable,
}

#[derive(Debug)]
pub enum LoginOutcome {
    Issued(TokenBundle),
    MfaRequired,
    InvalidCredentials,
    InvalidMfaCode,
    Locked { until: i64 },
    RateLimited { retry_after_seconds: i64 },
}

pub struct AuthService {
    users: Arc<dyn UserStore>,
    audit: Arc<dyn AuditSink>,
    verifier: CredentialVerifier,
    throttle: AttemptThrottle,
    lockout: LockoutPolicy,
    mfa: MfaService,
    issuer: SessionIssuer,
    reset: ResetFlow,
    breach: Option<BreachChecker>,
}

impl AuthService {
    #[must_use]
    pub fn new(backends: AuthBackends, config: AuthConfig, breach: Option<BreachChecker>) -> Self {
        let verifier = CredentialVerifier::new(backends.users.clone());
        let throttle = AttemptThrottle::new(
            backends.counters.clone(),
            config.login_throttle,
            LOGIN_THROTTLE_PREFIX,
        );
        let mfa = MfaService::new(
            backends.users.clone(),
            backends.ephemeral.clone(),
            config.mfa_issuer.clone(),
        )
        .with_setup_ttl(config.mfa_setup_ttl_seconds);
        let issuer = SessionIssuer::new(backends.secrets.clone(), backends.sessions.clone())
            .with_ttls(config.access_ttl_seconds, config.refresh_ttl_seconds);
        let reset = ResetFlow::new(
            backends.users.clone(),
            backends.sessions.clone(),
            AttemptThrottle::new(
                backends.counters.clone(),
                config.reset_throttle,
                RESET_THROTTLE_PREFIX,
            ),
            backends.reset_delivery,
            backends.audit.clone(),
        )
        .with_token_ttl(config.reset_token_ttl_seconds);

        Self {
            users: backends.users,
            audit: backends.audit,
            verifier,
            throttle,
            lockout: config.lockout,
            mfa,
            issuer,
            reset,
            breach,
        }
    }

    #[must_use]
    pub fn issuer(&self) -> &SessionIssuer {
        &self.issuer
    }

    /// Register a new account and its organization.
    ///
    /// # Errors
    /// Returns an error on store failures or, when the breach checker is
    /// fail-closed, on corpus degradation.
    pub async fn register(
        &self,
        request: RegisterRequest,
        client: &ClientInfo,
        now: i64,
    ) -> Result<RegisterOutcome> {
        if !acceptable_email(&request.email) {
            return Ok(RegisterOutcome::Rejected(RegisterRejection::InvalidEmail));
        }
        let name = request.name.trim();
        if !(2..=100).contains(&name.chars().count()) {
            return Ok(RegisterOutcome::Rejected(RegisterRejection::InvalidName));
        }
        let organization_name = request.organization_name.trim();
        if !organization_name.is_empty() && !(2..=200).contains(&organization_name.chars().count())
        {
            return Ok(RegisterOutcome::Rejected(
                RegisterRejection::InvalidOrganizationName,
            ));
        }
        if !acceptable_password(&request.password) {
            return Ok(RegisterOutcome::Rejected(
                RegisterRejection::UnacceptablePassword,
            ));
        }
        if let Some(breach) = &self.breach {
            if breach.is_breached(&request.password).await? {
                return Ok(RegisterOutcome::Rejected(
                    RegisterRejection::BreachedPassword,
                ));
            }
        }

        let password_hash = hash_password(&request.password)?;
        let organization_name = if organization_name.is_empty() {
            format!("{name}'s organization")
        } else {
            organization_name.to_string()
        };

        let created = self
            .users
            .create_account(
                NewAccount {
                    email: request.email.to_ascii_lowercase(),
                    name: name.to_string(),
                    password_hash,
                    organization_name,
                },
                now,
            )
            .await
            .context("account creation failed")?;

        match created {
            CreateOutcome::Created(account) => {
                audit::emit(
                    &self.audit,
                    AuditEvent::new(AuditAction::UserRegistered, Some(account.id), client, now),
                )
                .await;
                Ok(RegisterOutcome::Created(Box::new(account)))
            }
            CreateOutcome::DuplicateEmail => Ok(RegisterOutcome::Rejected(
                RegisterRejection::EmailUnavailable,
            )),
        }
    }

    /// Authenticate and issue tokens.
    ///
    /// # Errors
    /// Returns an error only on store, signing, or audit-path failures; every
    /// expected rejection is a `LoginOutcome` variant.
    pub async fn login(
        &self,
        request: LoginRequest,
        client: &ClientInfo,
        now: i64,
    ) -> Result<LoginOutcome> {
        let throttle_key = request.email.to_ascii_lowercase();
        if let ThrottleDecision::Blocked {
            retry_after_seconds,
        } = self.throttle.consume(&throttle_key, now).await?
        {
            audit::emit(
                &self.audit,
                AuditEvent::new(AuditAction::LoginRateLimited, None, client, now),
            )
            .await;
            return Ok(LoginOutcome::RateLimited {
                retry_after_seconds,
            });
        }

        let account = match self
            .verifier
            .verify(&request.email, &request.password, now)
            .await?
        {
            Verification::UnknownAccount => {
                audit::emit(
                    &self.audit,
                    AuditEvent::new(AuditAction::LoginFailed, None, client, now),
                )
                .await;
                return Ok(LoginOutcome::InvalidCredentials);
            }
            Verification::Locked { until } => {
                return Ok(LoginOutcome::Locked { until });
            }
            Verification::WrongPassword(account) => {
                self.record_login_failure(&account, client, now).await?;
                return Ok(LoginOutcome::InvalidCredentials);
            }
            Verification::Valid(account) => account,
        };

        if account.mfa_enabled {
            let Some(code) = request.mfa_code.as_deref() else {
                return Ok(LoginOutcome::MfaRequired);
            };
            if !self.mfa.verify_login(&account, code, now).await? {
                self.record_login_failure(&account, client, now).await?;
                audit::emit(
                    &self.audit,
                    AuditEvent::new(AuditAction::MfaFailed, Some(account.id), client, now),
                )
                .await;
                return Ok(LoginOutcome::InvalidMfaCode);
            }
        }

        let bundle = self.issuer.issue(&account, client, now).await?;
        self.lockout
            .record_success(self.users.as_ref(), &account)
            .await
            .context("failed to clear lockout state")?;
        self.throttle.reset(&throttle_key).await?;
        audit::emit(
            &self.audit,
            AuditEvent::new(AuditAction::LoginSuccess, Some(account.id), client, now),
        )
        .await;
        Ok(LoginOutcome::Issued(bundle))
    }

    async fn record_login_failure(
        &self,
        account: &Account,
        client: &ClientInfo,
        now: i64,
    ) -> Result<()> {
        let update = self
            .lockout
            .record_failure(self.users.as_ref(), account, now)
            .await
            .context("failed to record login failure")?;

        audit::emit(
            &self.audit,
            AuditEvent::new(AuditAction::LoginFailed, Some(account.id), client, now)
                .with_detail(serde_json::json!({ "failed_attempts": update.failed_attempts })),
        )
        .await;

        if let Some(minutes) = update.lock_minutes {
            audit::emit(
                &self.audit,
                AuditEvent::new(AuditAction::AccountLocked, Some(account.id), client, now)
                    .with_detail(serde_json::json!({ "lock_minutes": minutes })),
            )
            .await;
        }
        Ok(())
    }

    /// Start TOTP enrollment for an authenticated account.
    ///
    /// # Errors
    /// Returns an error on store failures.
    pub async fn begin_mfa_enrollment(
        &self,
        account_id: Uuid,
        client: &ClientInfo,
        now: i64,
    ) -> Result<Option<EnrollOutcome>> {
        let Some(account) = self.users.find_by_id(account_id).await? else {
            return Ok(None);
        };
        let outcome = self.mfa.begin_enrollment(&account, now).await?;
        if matches!(outcome, EnrollOutcome::Started(_)) {
            audit::emit(
                &self.audit,
                AuditEvent::new(AuditAction::MfaSetupStarted, Some(account.id), client, now),
            )
            .await;
        }
        Ok(Some(outcome))
    }

    /// Confirm TOTP enrollment with a first code.
    ///
    /// # Errors
    /// Returns an error on store failures.
    pub async fn confirm_mfa_enrollment(
        &self,
        account_id: Uuid,
        code: &str,
        client: &ClientInfo,
        now: i64,
    ) -> Result<Option<ConfirmOutcome>> {
        let Some(account) = self.users.find_by_id(account_id).await? else {
            return Ok(None);
        };
        let outcome = self.mfa.confirm_enrollment(&account, code, now).await?;
        match &outcome {
            ConfirmOutcome::Enabled { .. } => {
                audit::emit(
                    &self.audit,
                    AuditEvent::new(AuditAction::MfaEnabled, Some(account.id), client, now),
                )
                .await;
            }
            ConfirmOutcome::WrongCode => {
                audit::emit(
                    &self.audit,
                    AuditEvent::new(AuditAction::MfaFailed, Some(account.id), client, now),
                )
                .await;
            }
            ConfirmOutcome::SetupExpired => {}
        }
        Ok(Some(outcome))
    }

    /// Request a password reset. Opaque to the caller in every case.
    ///
    /// # Errors
    /// Returns an error on store or delivery failures.
    pub async fn request_password_reset(
        &self,
        email: &str,
        client: &ClientInfo,
        now: i64,
    ) -> Result<()> {
        self.reset.request_reset(email, client, now).await
    }

    /// Complete a password reset with a delivered token.
    ///
    /// # Errors
    /// Returns an error on store failures.
    pub async fn complete_password_reset(
        &self,
        token: &str,
        new_password: &str,
        client: &ClientInfo,
        now: i64,
    ) -> Result<ConsumeOutcome> {
        self.reset.consume(token, new_password, client, now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::testing::CapturingAuditSink;
    use crate::reset::LogResetDelivery;
    use crate::store::memory::{
        MemoryCounterStore, MemoryEphemeralStore, MemorySessionStore, MemoryUserStore,
        StaticSecretStore,
    };
    use crate::testkeys::TEST_PRIVATE_KEY_PEM;

    const NOW: i64 = 1_700_000_000;

    struct Fixture {
        users: Arc<MemoryUserStore>,
        audit: Arc<CapturingAuditSink>,
        service: AuthService,
    }

    fn fixture(config: AuthConfig) -> Fixture {
        let users = Arc::new(MemoryUserStore::default());
        let audit = Arc::new(CapturingAuditSink::default());
        let service = AuthService::new(
            AuthBackends {
                users: users.clone(),
                counters: Arc::new(MemoryCounterStore::default()),
                ephemeral: Arc::new(MemoryEphemeralStore::default()),
                sessions: Arc::new(MemorySessionStore::default()),
                secrets: Arc::new(StaticSecretStore::new(TEST_PRIVATE_KEY_PEM)),
                audit: audit.clone(),
                reset_delivery: Arc::new(LogResetDelivery),
            },
            config,
            None,
        );
        Fixture {
            users,
            audit,
            service,
        }
    }

    fn register_request(email: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            name: "Ada".to_string(),
            password: "Str0ng!Passw0rd".to_string(),
            organization_name: "Org".to_string(),
        }
    }

    fn login_request(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
            mfa_code: None,
        }
    }

    async fn register(f: &Fixture, email: &str) -> Account {
        match f
            .service
            .register(register_request(email), &ClientInfo::default(), NOW)
            .await
            .expect("register")
        {
            RegisterOutcome::Created(account) => *account,
            RegisterOutcome::Rejected(why) => panic!("unexpected rejection: {why:?}"),
        }
    }

    #[tokio::test]
    async fn register_then_login_issues_tokens() {
        let f = fixture(AuthConfig::default());
        let account = register(&f, "ada@x.com").await;
        assert_eq!(account.role, "owner");
        assert!(f.audit.saw(AuditAction::UserRegistered).await);

        match f
            .service
            .login(
                login_request("ada@x.com", "Str0ng!Passw0rd"),
                &ClientInfo::default(),
                NOW,
            )
            .await
            .expect("login")
        {
            LoginOutcome::Issued(bundle) => assert_eq!(bundle.expires_in, 3600),
            other => panic!("expected issued tokens, got {other:?}"),
        }
        assert!(f.audit.saw(AuditAction::LoginSuccess).await);
    }

    #[tokio::test]
    async fn registration_validation_rejections() {
        let f = fixture(AuthConfig::default());

        let mut request = register_request("not-an-email");
        assert!(matches!(
            f.service
                .register(request.clone(), &ClientInfo::default(), NOW)
                .await
                .expect("register"),
            RegisterOutcome::Rejected(RegisterRejection::InvalidEmail)
        ));

        request = register_request("ada@x.com");
        request.password = "weak".to_string();
        assert!(matches!(
            f.service
                .register(request, &ClientInfo::default(), NOW)
                .await
                .expect("register"),
            RegisterOutcome::Rejected(RegisterRejection::UnacceptablePassword)
        ));

        request = register_request("ada@x.com");
        request.name = "A".to_string();
        assert!(matches!(
            f.service
                .register(request, &ClientInfo::default(), NOW)
                .await
                .expect("register"),
            RegisterOutcome::Rejected(RegisterRejection::InvalidName)
        ));

        request = register_request("ada@x.com");
        request.organization_name = "O".to_string();
        assert!(matches!(
            f.service
                .register(request, &ClientInfo::default(), NOW)
                .await
                .expect("register"),
            RegisterOutcome::Rejected(RegisterRejection::InvalidOrganizationName)
        ));
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let f = fixture(AuthConfig::default());
        register(&f, "ada@x.com").await;

        assert!(matches!(
            f.service
                .register(register_request("ADA@X.COM"), &ClientInfo::default(), NOW)
                .await
                .expect("register"),
            RegisterOutcome::Rejected(RegisterRejection::EmailUnavailable)
        ));
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_are_indistinguishable() {
        let f = fixture(AuthConfig::default());
        register(&f, "ada@x.com").await;

        let unknown = f
            .service
            .login(
                login_request("ghost@x.com", "Str0ng!Passw0rd"),
                &ClientInfo::default(),
                NOW,
            )
            .await
            .expect("login");
        let wrong = f
            .service
            .login(
                login_request("ada@x.com", "Wr0ng!Passw0rd"),
                &ClientInfo::default(),
                NOW,
            )
            .await
            .expect("login");
        assert!(matches!(unknown, LoginOutcome::InvalidCredentials));
        assert!(matches!(wrong, LoginOutcome::InvalidCredentials));
    }

    #[tokio::test]
    async fn sixth_attempt_is_rate_limited_even_with_correct_password() {
        let f = fixture(AuthConfig::default());
        register(&f, "ada@x.com").await;

        for _ in 0..5 {
            f.service
                .login(
                    login_request("ada@x.com", "Wr0ng!Passw0rd"),
                    &ClientInfo::default(),
                    NOW,
                )
                .await
                .expect("login");
        }

        match f
            .service
            .login(
                login_request("ada@x.com", "Str0ng!Passw0rd"),
                &ClientInfo::default(),
                NOW,
            )
            .await
            .expect("login")
        {
            LoginOutcome::RateLimited {
                retry_after_seconds,
            } => assert_eq!(retry_after_seconds, 3600),
            other => panic!("expected rate limit, got {other:?}"),
        }
        assert!(f.audit.saw(AuditAction::LoginRateLimited).await);
    }

    #[tokio::test]
    async fn fifth_failure_locks_the_account() {
        // Generous throttle so the lockout path is what rejects.
        let config = AuthConfig::default().with_login_throttle(ThrottlePolicy {
            points: 100,
            window_seconds: 900,
            block_seconds: 3600,
        });
        let f = fixture(config);
        register(&f, "ada@x.com").await;

        for _ in 0..5 {
            f.service
                .login(
                    login_request("ada@x.com", "Wr0ng!Passw0rd"),
                    &ClientInfo::default(),
                    NOW,
                )
                .await
                .expect("login");
        }
        assert!(f.audit.saw(AuditAction::AccountLocked).await);

        match f
            .service
            .login(
                login_request("ada@x.com", "Str0ng!Passw0rd"),
                &ClientInfo::default(),
                NOW,
            )
            .await
            .expect("login")
        {
            LoginOutcome::Locked { until } => assert_eq!(until, NOW + 60),
            other => panic!("expected lock, got {other:?}"),
        }

        // After the lock expires the correct password works again.
        match f
            .service
            .login(
                login_request("ada@x.com", "Str0ng!Passw0rd"),
                &ClientInfo::default(),
                NOW + 61,
            )
            .await
            .expect("login")
        {
            LoginOutcome::Issued(_) => {}
            other => panic!("expected issued tokens, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn success_clears_failure_state() {
        let f = fixture(AuthConfig::default());
        let account = register(&f, "ada@x.com").await;

        for _ in 0..3 {
            f.service
                .login(
                    login_request("ada@x.com", "Wr0ng!Passw0rd"),
                    &ClientInfo::default(),
                    NOW,
                )
                .await
                .expect("login");
        }
        f.service
            .login(
                login_request("ada@x.com", "Str0ng!Passw0rd"),
                &ClientInfo::default(),
                NOW,
            )
            .await
            .expect("login");

        let reloaded = f
            .users
            .find_by_id(account.id)
            .await
            .expect("find")
            .expect("account");
        assert_eq!(reloaded.failed_attempts, 0);

        // Throttle points were reset too: five fresh attempts fit again.
        for _ in 0..5 {
            let outcome = f
                .service
                .login(
                    login_request("ada@x.com", "Wr0ng!Passw0rd"),
                    &ClientInfo::default(),
                    NOW,
                )
                .await
                .expect("login");
            assert!(matches!(outcome, LoginOutcome::InvalidCredentials));
        }
    }

    #[tokio::test]
    async fn mfa_round_trip_through_login() {
        let f = fixture(AuthConfig::default());
        let account = register(&f, "ada@x.com").await;

        let EnrollOutcome::Started(start) = f
            .service
            .begin_mfa_enrollment(account.id, &ClientInfo::default(), NOW)
            .await
            .expect("begin")
            .expect("account exists")
        else {
            panic!("expected enrollment start");
        };
        assert!(f.audit.saw(AuditAction::MfaSetupStarted).await);

        let code = totp_code(&start.secret_base32, NOW);
        let ConfirmOutcome::Enabled { recovery_codes } = f
            .service
            .confirm_mfa_enrollment(account.id, &code, &ClientInfo::default(), NOW)
            .await
            .expect("confirm")
            .expect("account exists")
        else {
            panic!("expected enrollment confirmation");
        };
        assert_eq!(recovery_codes.len(), 10);
        assert!(f.audit.saw(AuditAction::MfaEnabled).await);

        // Password alone now yields the MFA challenge.
        assert!(matches!(
            f.service
                .login(
                    login_request("ada@x.com", "Str0ng!Passw0rd"),
                    &ClientInfo::default(),
                    NOW,
                )
                .await
                .expect("login"),
            LoginOutcome::MfaRequired
        ));

        // Wrong code is its own rejection.
        let mut request = login_request("ada@x.com", "Str0ng!Passw0rd");
        request.mfa_code = Some("000000".to_string());
        assert!(matches!(
            f.service
                .login(request, &ClientInfo::default(), NOW)
                .await
                .expect("login"),
            LoginOutcome::InvalidMfaCode
        ));
        assert!(f.audit.saw(AuditAction::MfaFailed).await);

        // Password plus a current code issues tokens.
        let mut request = login_request("ada@x.com", "Str0ng!Passw0rd");
        request.mfa_code = Some(totp_code(&start.secret_base32, NOW));
        assert!(matches!(
            f.service
                .login(request, &ClientInfo::default(), NOW)
                .await
                .expect("login"),
            LoginOutcome::Issued(_)
        ));
    }

    #[tokio::test]
    async fn reset_flow_reachable_through_the_service() {
        let f = fixture(AuthConfig::default());
        register(&f, "ada@x.com").await;

        f.service
            .request_password_reset("ada@x.com", &ClientInfo::default(), NOW)
            .await
            .expect("request");
        assert!(f.audit.saw(AuditAction::PasswordResetRequested).await);

        assert!(matches!(
            f.service
                .complete_password_reset(
                    "bogus-token",
                    "N3w!Passw0rdXY",
                    &ClientInfo::default(),
                    NOW,
                )
                .await
                .expect("consume"),
            ConsumeOutcome::Rejected
        ));
    }

    #[test]
    fn email_shape_check() {
        assert!(acceptable_email("a@x.com"));
        assert!(acceptable_email("first.last@sub.example.org"));
        assert!(!acceptable_email("missing-at.example.org"));
        assert!(!acceptable_email("spaces in@x.com"));
        assert!(!acceptable_email("a@nodot"));
    }

    fn totp_code(secret_base32: &str, at: i64) -> String {
        use totp_rs::{Algorithm, Secret, TOTP};
        let secret = Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .expect("secret");
        let totp = TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            secret,
            Some("custos".to_string()),
            "ada@x.com".to_string(),
        )
        .expect("totp");
        totp.generate(u64::try_from(at).expect("time"))
    }
}
