//! Failed login tracking and the lockout check.
//!
//! Both operations are side channels of the login form: tracking never
//! propagates an error, and the lockout check fails open (an unreachable
//! log means "not locked") so an outage of the log cannot lock everyone out.

use crate::config::SecurityConfig;
use crate::{FailedAttemptStore, IpLookup};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

pub const UNKNOWN_IP: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedLoginAttempt {
    pub email: String,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub reason: String,
    pub attempted_at: DateTime<Utc>,
}

/// Request metadata known at the call site.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailedLoginContext {
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LockStatus {
    pub locked: bool,
    pub attempts: u64,
    pub max_attempts: u32,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub struct FailedLoginTracker {
    store: Arc<dyn FailedAttemptStore>,
    ip_lookup: Arc<dyn IpLookup>,
    config: SecurityConfig,
}

impl FailedLoginTracker {
    pub fn new(
        store: Arc<dyn FailedAttemptStore>,
        ip_lookup: Arc<dyn IpLookup>,
        config: SecurityConfig,
    ) -> Self {
        Self {
            store,
            ip_lookup,
            config,
        }
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Appends one failed-attempt row. Errors are logged and swallowed.
    pub async fn track_failed_login(&self, email: &str, reason: &str, ctx: FailedLoginContext) {
        let ip_address = match ctx.client_ip.filter(|ip| !ip.trim().is_empty()) {
            Some(ip) => ip,
            None => match self.ip_lookup.client_ip().await {
                Ok(ip) => ip,
                Err(e) => {
                    warn!("IP lookup failed, recording attempt as unknown: {}", e);
                    UNKNOWN_IP.to_string()
                }
            },
        };

        let attempt = FailedLoginAttempt {
            email: normalize_email(email),
            ip_address,
            user_agent: ctx.user_agent,
            reason: reason.to_string(),
            attempted_at: Utc::now(),
        };

        match self.store.append(&attempt).await {
            Ok(()) => info!(
                "Recorded failed login for {} ({}) from {}",
                attempt.email, attempt.reason, attempt.ip_address
            ),
            Err(e) => error!("Failed to record failed login for {}: {}", attempt.email, e),
        }
    }

    /// Lockout state for `email` over the trailing window.
    ///
    /// Lookup failures fail open: the account is reported unlocked.
    pub async fn lock_status(&self, email: &str) -> LockStatus {
        let email = normalize_email(email);
        let since = Utc::now() - self.config.lockout_window();
        let attempts = match self.store.count_since(&email, since).await {
            Ok(count) => count,
            Err(e) => {
                error!("Lockout lookup failed for {}, failing open: {}", email, e);
                0
            }
        };
        LockStatus {
            locked: attempts >= u64::from(self.config.max_failed_attempts),
            attempts,
            max_attempts: self.config.max_failed_attempts,
        }
    }

    pub async fn check_account_lock(&self, email: &str) -> bool {
        self.lock_status(email).await.locked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CoreError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct VecStore {
        rows: Mutex<Vec<FailedLoginAttempt>>,
    }

    #[async_trait]
    impl FailedAttemptStore for VecStore {
        async fn append(&self, attempt: &FailedLoginAttempt) -> Result<(), CoreError> {
            self.rows.lock().unwrap().push(attempt.clone());
            Ok(())
        }

        async fn count_since(&self, email: &str, since: DateTime<Utc>) -> Result<u64, CoreError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.email == email && r.attempted_at >= since)
                .count() as u64)
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl FailedAttemptStore for BrokenStore {
        async fn append(&self, _attempt: &FailedLoginAttempt) -> Result<(), CoreError> {
            Err(CoreError::Internal("insert failed".into()))
        }

        async fn count_since(&self, _email: &str, _since: DateTime<Utc>) -> Result<u64, CoreError> {
            Err(CoreError::Internal("query failed".into()))
        }
    }

    struct FixedIp(Option<&'static str>);

    #[async_trait]
    impl IpLookup for FixedIp {
        async fn client_ip(&self) -> Result<String, CoreError> {
            self.0
                .map(String::from)
                .ok_or_else(|| CoreError::Internal("lookup unavailable".into()))
        }
    }

    fn config(max: u32) -> SecurityConfig {
        SecurityConfig {
            max_failed_attempts: max,
            ..SecurityConfig::default()
        }
    }

    #[tokio::test]
    async fn test_lock_after_max_attempts() {
        let store = Arc::new(VecStore::default());
        let tracker = FailedLoginTracker::new(store.clone(), Arc::new(FixedIp(Some("10.0.0.1"))), config(3));

        for _ in 0..2 {
            tracker
                .track_failed_login("Jane@Clinic.test", "invalid_credentials", FailedLoginContext::default())
                .await;
        }
        assert!(!tracker.check_account_lock("jane@clinic.test").await);

        tracker
            .track_failed_login("jane@clinic.test ", "invalid_credentials", FailedLoginContext::default())
            .await;
        let status = tracker.lock_status("JANE@clinic.test").await;
        assert!(status.locked);
        assert_eq!(status.attempts, 3);
        assert_eq!(status.max_attempts, 3);

        let rows = store.rows.lock().unwrap();
        assert!(rows.iter().all(|r| r.email == "jane@clinic.test"));
        assert!(rows.iter().all(|r| r.ip_address == "10.0.0.1"));
    }

    #[tokio::test]
    async fn test_attempts_outside_window_are_ignored() {
        let store = Arc::new(VecStore::default());
        let stale = Utc::now() - chrono::Duration::minutes(60);
        for _ in 0..10 {
            store.rows.lock().unwrap().push(FailedLoginAttempt {
                email: "old@clinic.test".into(),
                ip_address: UNKNOWN_IP.into(),
                user_agent: None,
                reason: "invalid_credentials".into(),
                attempted_at: stale,
            });
        }
        let tracker = FailedLoginTracker::new(store, Arc::new(FixedIp(None)), config(5));
        assert!(!tracker.check_account_lock("old@clinic.test").await);
    }

    #[tokio::test]
    async fn test_ip_falls_back_to_unknown_and_context_wins() {
        let store = Arc::new(VecStore::default());
        let tracker = FailedLoginTracker::new(store.clone(), Arc::new(FixedIp(None)), config(5));

        tracker
            .track_failed_login("a@clinic.test", "invalid_credentials", FailedLoginContext::default())
            .await;
        tracker
            .track_failed_login(
                "a@clinic.test",
                "account_locked",
                FailedLoginContext {
                    client_ip: Some("192.168.1.20".into()),
                    user_agent: Some("Mozilla/5.0".into()),
                },
            )
            .await;

        let rows = store.rows.lock().unwrap();
        assert_eq!(rows[0].ip_address, UNKNOWN_IP);
        assert_eq!(rows[1].ip_address, "192.168.1.20");
        assert_eq!(rows[1].user_agent.as_deref(), Some("Mozilla/5.0"));
        assert_eq!(rows[1].reason, "account_locked");
    }

    #[tokio::test]
    async fn test_store_failures_are_swallowed_and_fail_open() {
        let tracker = FailedLoginTracker::new(Arc::new(BrokenStore), Arc::new(FixedIp(None)), config(1));
        // Must not panic or propagate.
        tracker
            .track_failed_login("b@clinic.test", "invalid_credentials", FailedLoginContext::default())
            .await;
        let status = tracker.lock_status("b@clinic.test").await;
        assert!(!status.locked);
        assert_eq!(status.attempts, 0);
    }
}
