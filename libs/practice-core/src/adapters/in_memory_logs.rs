use crate::domain::failed_login::FailedLoginAttempt;
use crate::domain::kpi::MetricRow;
use crate::{AuditEntry, AuditLog, CoreError, FailedAttemptStore, KpiStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Append-only failed login log, partitioned by email.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFailedAttemptStore {
    attempts: Arc<DashMap<String, Vec<FailedLoginAttempt>>>,
}

impl InMemoryFailedAttemptStore {
    pub fn attempts_for(&self, email: &str) -> Vec<FailedLoginAttempt> {
        self.attempts
            .get(email)
            .map(|a| a.value().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl FailedAttemptStore for InMemoryFailedAttemptStore {
    async fn append(&self, attempt: &FailedLoginAttempt) -> Result<(), CoreError> {
        self.attempts
            .entry(attempt.email.clone())
            .or_default()
            .push(attempt.clone());
        Ok(())
    }

    async fn count_since(&self, email: &str, since: DateTime<Utc>) -> Result<u64, CoreError> {
        Ok(self
            .attempts
            .get(email)
            .map(|rows| rows.iter().filter(|a| a.attempted_at >= since).count() as u64)
            .unwrap_or(0))
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryAuditLog {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl InMemoryAuditLog {
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn append(&self, entry: &AuditEntry) -> Result<(), CoreError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryKpiStore {
    rows: Arc<Mutex<Vec<MetricRow>>>,
}

impl InMemoryKpiStore {
    pub fn rows(&self) -> Vec<MetricRow> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl KpiStore for InMemoryKpiStore {
    async fn insert_metric(&self, row: &MetricRow) -> Result<(), CoreError> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(row.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn attempt(email: &str, minutes_ago: i64) -> FailedLoginAttempt {
        FailedLoginAttempt {
            email: email.into(),
            ip_address: "unknown".into(),
            user_agent: None,
            reason: "invalid_credentials".into(),
            attempted_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[tokio::test]
    async fn test_count_since_respects_lower_bound_and_email() {
        let store = InMemoryFailedAttemptStore::default();
        store.append(&attempt("a@clinic.test", 1)).await.unwrap();
        store.append(&attempt("a@clinic.test", 30)).await.unwrap();
        store.append(&attempt("b@clinic.test", 1)).await.unwrap();

        let since = Utc::now() - Duration::minutes(15);
        assert_eq!(store.count_since("a@clinic.test", since).await.unwrap(), 1);
        assert_eq!(store.count_since("c@clinic.test", since).await.unwrap(), 0);
        assert_eq!(store.attempts_for("a@clinic.test").len(), 2);
    }

    #[tokio::test]
    async fn test_audit_and_kpi_rows_are_appended_in_order() {
        let audit = InMemoryAuditLog::default();
        audit.append(&AuditEntry::new("auth.login")).await.unwrap();
        audit.append(&AuditEntry::new("auth.logout")).await.unwrap();
        let actions: Vec<String> = audit.entries().into_iter().map(|e| e.action).collect();
        assert_eq!(actions, vec!["auth.login", "auth.logout"]);

        let kpis = InMemoryKpiStore::default();
        let day = chrono::NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        kpis.insert_metric(&MetricRow {
            metric_name: "appointments_today".into(),
            metric_value: 3.0,
            period_start: day,
            period_end: day,
        })
        .await
        .unwrap();
        assert_eq!(kpis.rows().len(), 1);
    }
}
