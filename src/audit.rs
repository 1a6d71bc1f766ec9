//! Structured security audit events.
//!
//! Events are append-only facts handed to an `AuditSink`. Recording is
//! fire-and-forget from the flows' perspective, but a failed write is always
//! logged so forensically relevant events never vanish silently.

use crate::session::ClientInfo;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Security-relevant actions recorded by the core.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditAction {
    UserRegistered,
    LoginSuccess,
    LoginFailed,
    LoginRateLimited,
    AccountLocked,
    MfaSetupStarted,
    MfaEnabled,
    MfaFailed,
    PasswordResetRequested,
    PasswordResetCompleted,
}

impl AuditAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserRegistered => "USER_REGISTERED",
            Self::LoginSuccess => "LOGIN_SUCCESS",
            Self::LoginFailed => "LOGIN_FAILED",
            Self::LoginRateLimited => "LOGIN_RATE_LIMITED",
            Self::AccountLocked => "ACCOUNT_LOCKED",
            Self::MfaSetupStarted => "MFA_SETUP_STARTED",
            Self::MfaEnabled => "MFA_ENABLED",
            Self::MfaFailed => "MFA_FAILED",
            Self::PasswordResetRequested => "PASSWORD_RESET_REQUESTED",
            Self::PasswordResetCompleted => "PASSWORD_RESET_COMPLETED",
        }
    }
}

/// Immutable audit fact.
#[derive(Clone, Debug)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub account_id: Option<Uuid>,
    pub origin_addr: Option<String>,
    pub user_agent: Option<String>,
    pub detail: Value,
    pub recorded_at: i64,
}

impl AuditEvent {
    #[must_use]
    pub fn new(action: AuditAction, account_id: Option<Uuid>, client: &ClientInfo, now: i64) -> Self {
        Self {
            action,
            account_id,
            origin_addr: client.origin_addr.clone(),
            user_agent: client.user_agent.clone(),
            detail: Value::Null,
            recorded_at: now,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<()>;
}

/// Emit the event to the sink, logging (never swallowing) sink failures.
pub async fn emit(sink: &Arc<dyn AuditSink>, event: AuditEvent) {
    let action = event.action;
    if let Err(err) = sink.record(event).await {
        error!("failed to record audit event {}: {err}", action.as_str());
    }
}

/// Default sink: structured tracing events on the `audit` target.
#[derive(Clone, Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        info!(
            target: "audit",
            action = event.action.as_str(),
            account_id = event.account_id.map(|id| id.to_string()),
            origin_addr = event.origin_addr.as_deref(),
            user_agent = event.user_agent.as_deref(),
            detail = %event.detail,
            recorded_at = event.recorded_at,
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{AuditAction, AuditEvent, AuditSink};
    use anyhow::Result;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    /// Sink that captures actions for assertions.
    #[derive(Default)]
    pub(crate) struct CapturingAuditSink {
        pub(crate) actions: Mutex<Vec<AuditAction>>,
    }

    #[async_trait]
    impl AuditSink for CapturingAuditSink {
        async fn record(&self, event: AuditEvent) -> Result<()> {
            self.actions.lock().await.push(event.action);
            Ok(())
        }
    }

    impl CapturingAuditSink {
        pub(crate) async fn saw(&self, action: AuditAction) -> bool {
            self.actions.lock().await.contains(&action)
        }
    }
}
