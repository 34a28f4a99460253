use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::pin::Pin;
use tokio_stream::Stream;

// Declare modules
pub mod adapters;
pub mod config;
pub mod domain;

use domain::failed_login::FailedLoginAttempt;
use domain::kpi::MetricRow;
use domain::records::RawRecord;
use domain::tenant::{ScopeStrategy, ScopedRelation, Tenant, TenantMembership};

// Common error type for the core library
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Account locked: {0}")]
    Locked(String),
    #[error("Infrastructure error: {0}")]
    Infrastructure(#[from] Box<dyn StdError + Send + Sync>),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Wraps any driver/client error as an infrastructure failure.
    pub fn infra<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        CoreError::Infrastructure(Box::new(err))
    }
}

// Allows '?' to convert domain errors into CoreError in handlers
impl From<domain::records::RecordError> for CoreError {
    fn from(err: domain::records::RecordError) -> Self {
        CoreError::Validation(err.to_string())
    }
}

impl From<domain::tenant::TenantError> for CoreError {
    fn from(err: domain::tenant::TenantError) -> Self {
        match err {
            domain::tenant::TenantError::Core(ce) => ce,
            domain::tenant::TenantError::NotProvisioned => {
                CoreError::Forbidden("No clinic is provisioned for this account".into())
            }
            domain::tenant::TenantError::SwitchNotPermitted { role, tenants } => {
                CoreError::Forbidden(format!(
                    "Tenant switching not permitted (role: {}, tenants: {})",
                    role.as_deref().unwrap_or("none"),
                    tenants
                ))
            }
            domain::tenant::TenantError::UnknownTenant(id) => {
                CoreError::NotFound(format!("Tenant not found: {}", id))
            }
        }
    }
}

impl From<domain::kpi::KpiError> for CoreError {
    fn from(err: domain::kpi::KpiError) -> Self {
        match err {
            domain::kpi::KpiError::Core(ce) => ce,
            domain::kpi::KpiError::MissingRecipient => {
                CoreError::Validation("No digest recipient configured".into())
            }
        }
    }
}

/// Equality/time-range filter handed to a [`RecordStore`].
///
/// The time range is half-open: `start <= field < end`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordQuery {
    pub relation: ScopedRelation,
    pub time_range: Option<TimeRange>,
    pub equals: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeRange {
    pub field: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl RecordQuery {
    pub fn new(relation: ScopedRelation) -> Self {
        Self {
            relation,
            time_range: None,
            equals: Vec::new(),
        }
    }

    pub fn within(
        mut self,
        field: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        self.time_range = Some(TimeRange {
            field: field.into(),
            start,
            end,
        });
        self
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.equals.push((field.into(), value.into()));
        self
    }
}

/// Identity of a signed-in user as reported by the authentication provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub email: String,
}

/// Credentials handed out by a successful sign-in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub token: String,
    pub user: AuthenticatedUser,
}

/// One row of the best-effort audit trail.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub user_id: Option<String>,
    pub tenant_id: Option<String>,
    pub action: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            user_id: None,
            tenant_id: None,
            action: action.into(),
            details: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn by_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn in_tenant(mut self, tenant_id: Option<String>) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// A rendered message for the notification channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
}

/// A notice as delivered to a listener.
#[derive(Clone, Debug, PartialEq)]
pub struct Notice {
    pub topic: String,
    pub event_type: String,
    pub payload: Vec<u8>,
}

pub type NoticeStream = Pin<Box<dyn Stream<Item = Notice> + Send>>;

// Port for reading raw rows from the hosted database
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn fetch(&self, query: &RecordQuery) -> Result<Vec<RawRecord>, CoreError>;
}

// Port for reading tenant memberships (tenant identity joined with role)
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Memberships in the order the backing query returns them.
    async fn memberships_for(&self, user_id: &str) -> Result<Vec<TenantMembership>, CoreError>;
}

// Port for tenant administration: listing, enrolling users, creating scoped relations
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn tenants(&self) -> Result<Vec<Tenant>, CoreError>;
    /// Adds `user_id` to the membership's tenant, creating the tenant if needed. Idempotent.
    async fn enroll(&self, user_id: &str, membership: &TenantMembership) -> Result<(), CoreError>;
    /// Creates the tenant's scoped relations if they do not exist yet. Idempotent.
    async fn provision(&self, tenant: &Tenant, strategy: ScopeStrategy) -> Result<(), CoreError>;
}

// Port for the append-only failed login log
#[async_trait]
pub trait FailedAttemptStore: Send + Sync {
    async fn append(&self, attempt: &FailedLoginAttempt) -> Result<(), CoreError>;
    async fn count_since(&self, email: &str, since: DateTime<Utc>) -> Result<u64, CoreError>;
}

// Port for the audit trail
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> Result<(), CoreError>;
}

// Port for persisting KPI snapshot rows
#[async_trait]
pub trait KpiStore: Send + Sync {
    async fn insert_metric(&self, row: &MetricRow) -> Result<(), CoreError>;
}

// Port for the outbound notification channel (email)
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<(), CoreError>;
}

// Port for the external IP lookup service
#[async_trait]
pub trait IpLookup: Send + Sync {
    async fn client_ip(&self) -> Result<String, CoreError>;
}

// Port for the hosted authentication provider. The core only calls it.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Fails with `CoreError::Unauthorized` on bad credentials.
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, CoreError>;
    async fn current_user(&self, token: &str) -> Result<Option<AuthenticatedUser>, CoreError>;
    async fn sign_out(&self, token: &str) -> Result<(), CoreError>;
    async fn update_password(&self, token: &str, new_password: &str) -> Result<(), CoreError>;
}

// Port for publishing user-visible notices (e.g. forced sign-out)
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        event_type: &str,
        event_payload: &[u8],
    ) -> Result<(), CoreError>;
}

// Port for listening to notices on a topic
#[async_trait]
pub trait NoticeFeed: Send + Sync {
    /// Only notices published after this returns are delivered.
    async fn listen(&self, topic: &str) -> Result<NoticeStream, CoreError>;
}

// Port for caching data
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CoreError>;
    async fn set(&self, key: &str, value: &[u8], ttl_seconds: Option<u64>)
    -> Result<(), CoreError>;
    async fn delete(&self, key: &str) -> Result<(), CoreError>;
}
