use crate::domain::failed_login::FailedLoginAttempt;
use crate::domain::kpi::MetricRow;
use crate::domain::records::RawRecord;
use crate::domain::tenant::{
    PUBLIC_SCHEMA, ScopeStrategy, ScopedRelation, Tenant, TenantMembership, tenant_relations,
};
use crate::{
    AuditEntry, AuditLog, CoreError, FailedAttemptStore, KpiStore, MembershipStore, RecordQuery,
    RecordStore, TenantDirectory,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::{debug, info};

/// Postgres implementation of the record, membership, tenant directory,
/// failed-login, audit and KPI ports.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    // Qualified relations already created by this process.
    provisioned: Arc<DashSet<String>>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            provisioned: Arc::new(DashSet::new()),
        }
    }
}

/// Identifiers are interpolated into SQL, so only `[a-z0-9_]+` is accepted.
pub fn validate_identifier(ident: &str) -> Result<&str, CoreError> {
    let valid = !ident.is_empty()
        && ident
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(ident)
    } else {
        Err(CoreError::Validation(format!("Invalid SQL identifier: {:?}", ident)))
    }
}

/// Builds the SELECT for `query`; placeholders are numbered in bind order
/// (range start, range end, then each equality value).
pub fn build_select(query: &RecordQuery) -> Result<String, CoreError> {
    let schema = validate_identifier(&query.relation.schema)?;
    let table = validate_identifier(&query.relation.table)?;

    let mut clauses = Vec::new();
    let mut param = 0;
    if let Some(range) = &query.time_range {
        let field = validate_identifier(&range.field)?;
        clauses.push(format!("t.{f} >= ${} AND t.{f} < ${}", param + 1, param + 2, f = field));
        param += 2;
    }
    for (field, _) in &query.equals {
        let field = validate_identifier(field)?;
        param += 1;
        clauses.push(format!("t.{}::text = ${}", field, param));
    }

    let mut sql = format!("SELECT to_jsonb(t) AS row FROM {}.{} t", schema, table);
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    Ok(sql)
}

/// DDL creating `relation` with the shape of `public.{base}`.
pub fn provision_statements(base: &str, relation: &ScopedRelation) -> Result<Vec<String>, CoreError> {
    let base = validate_identifier(base)?;
    let schema = validate_identifier(&relation.schema)?;
    let table = validate_identifier(&relation.table)?;

    let mut statements = Vec::new();
    if schema != PUBLIC_SCHEMA {
        statements.push(format!("CREATE SCHEMA IF NOT EXISTS {}", schema));
    }
    statements.push(format!(
        "CREATE TABLE IF NOT EXISTS {}.{} (LIKE {}.{} INCLUDING ALL)",
        schema, table, PUBLIC_SCHEMA, base
    ));
    Ok(statements)
}

fn tenant_from_row(row: &PgRow) -> Result<Tenant, CoreError> {
    Ok(Tenant {
        id: row.try_get("id").map_err(CoreError::infra)?,
        name: row.try_get("name").map_err(CoreError::infra)?,
        code: row.try_get("code").map_err(CoreError::infra)?,
        email: row.try_get("email").map_err(CoreError::infra)?,
        phone: row.try_get("phone").map_err(CoreError::infra)?,
        address: row.try_get("address").map_err(CoreError::infra)?,
        settings: row.try_get("settings").map_err(CoreError::infra)?,
    })
}

#[async_trait]
impl RecordStore for PostgresStore {
    async fn fetch(&self, query: &RecordQuery) -> Result<Vec<RawRecord>, CoreError> {
        let sql = build_select(query)?;
        debug!("Record query: {}", sql);

        let mut statement = sqlx::query(&sql);
        if let Some(range) = &query.time_range {
            statement = statement.bind(range.start).bind(range.end);
        }
        for (_, value) in &query.equals {
            statement = statement.bind(value.as_str());
        }

        let rows = statement
            .fetch_all(&self.pool)
            .await
            .map_err(CoreError::infra)?;

        rows.iter()
            .map(|row| {
                let value: Value = row.try_get("row").map_err(CoreError::infra)?;
                match value {
                    Value::Object(map) => Ok(map),
                    other => Err(CoreError::Internal(format!(
                        "Expected a JSON object row, got {}",
                        other
                    ))),
                }
            })
            .collect()
    }
}

#[async_trait]
impl MembershipStore for PostgresStore {
    async fn memberships_for(&self, user_id: &str) -> Result<Vec<TenantMembership>, CoreError> {
        let rows = sqlx::query(
            r#"
            SELECT t.id, t.name, t.code, t.email, t.phone, t.address, t.settings, m.role
            FROM tenant_members m
            JOIN tenants t ON t.id = m.tenant_id
            WHERE m.user_id = $1
            ORDER BY m.created_at ASC, m.id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::infra)?;

        rows.iter()
            .map(|row| {
                Ok(TenantMembership {
                    tenant: tenant_from_row(row)?,
                    role: row.try_get("role").map_err(CoreError::infra)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl TenantDirectory for PostgresStore {
    async fn tenants(&self) -> Result<Vec<Tenant>, CoreError> {
        let rows = sqlx::query(
            "SELECT id, name, code, email, phone, address, settings FROM tenants ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::infra)?;
        rows.iter().map(tenant_from_row).collect()
    }

    /// An existing tenant with the same scope code is reused.
    async fn enroll(&self, user_id: &str, membership: &TenantMembership) -> Result<(), CoreError> {
        let tenant = &membership.tenant;
        let settings = match &tenant.settings {
            Value::Null => serde_json::json!({}),
            other => other.clone(),
        };

        let mut tx = self.pool.begin().await.map_err(CoreError::infra)?;
        sqlx::query(
            "INSERT INTO tenants (id, name, code, email, phone, address, settings) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT DO NOTHING",
        )
        .bind(&tenant.id)
        .bind(&tenant.name)
        .bind(&tenant.code)
        .bind(tenant.email.as_deref())
        .bind(tenant.phone.as_deref())
        .bind(tenant.address.as_deref())
        .bind(&settings)
        .execute(&mut *tx)
        .await
        .map_err(CoreError::infra)?;
        sqlx::query(
            "INSERT INTO tenant_members (tenant_id, user_id, role) \
             SELECT id, $2, $3 FROM tenants WHERE tenant_scope_code(code) = tenant_scope_code($1) \
             ON CONFLICT (tenant_id, user_id) DO NOTHING",
        )
        .bind(&tenant.code)
        .bind(user_id)
        .bind(&membership.role)
        .execute(&mut *tx)
        .await
        .map_err(CoreError::infra)?;
        tx.commit().await.map_err(CoreError::infra)?;
        Ok(())
    }

    async fn provision(&self, tenant: &Tenant, strategy: ScopeStrategy) -> Result<(), CoreError> {
        let relations = tenant_relations(tenant, strategy).ok_or_else(|| {
            CoreError::Validation(format!("Tenant {} has no usable code", tenant.id))
        })?;

        for (base, relation) in relations {
            let key = relation.qualified();
            if self.provisioned.contains(&key) {
                continue;
            }
            let statements = provision_statements(base, &relation)?;

            // Concurrent CREATE ... IF NOT EXISTS on the same name can still collide.
            let mut tx = self.pool.begin().await.map_err(CoreError::infra)?;
            sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
                .bind(&key)
                .execute(&mut *tx)
                .await
                .map_err(CoreError::infra)?;
            for statement in &statements {
                debug!("Provisioning DDL: {}", statement);
                sqlx::query(statement)
                    .execute(&mut *tx)
                    .await
                    .map_err(CoreError::infra)?;
            }
            tx.commit().await.map_err(CoreError::infra)?;

            info!("Provisioned {} for tenant {}", key, tenant.id);
            self.provisioned.insert(key);
        }
        Ok(())
    }
}

#[async_trait]
impl FailedAttemptStore for PostgresStore {
    async fn append(&self, attempt: &FailedLoginAttempt) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO failed_login_attempts (email, ip_address, user_agent, reason, attempted_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&attempt.email)
        .bind(&attempt.ip_address)
        .bind(attempt.user_agent.as_deref())
        .bind(&attempt.reason)
        .bind(attempt.attempted_at)
        .execute(&self.pool)
        .await
        .map_err(CoreError::infra)?;
        Ok(())
    }

    async fn count_since(&self, email: &str, since: DateTime<Utc>) -> Result<u64, CoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM failed_login_attempts WHERE email = $1 AND attempted_at >= $2",
        )
        .bind(email)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(CoreError::infra)?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl AuditLog for PostgresStore {
    async fn append(&self, entry: &AuditEntry) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO audit_logs (user_id, tenant_id, action, details, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(entry.user_id.as_deref())
        .bind(entry.tenant_id.as_deref())
        .bind(&entry.action)
        .bind(&entry.details)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(CoreError::infra)?;
        Ok(())
    }
}

#[async_trait]
impl KpiStore for PostgresStore {
    async fn insert_metric(&self, row: &MetricRow) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO kpi_snapshots (metric_name, metric_value, period_start, period_end) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&row.metric_name)
        .bind(row.metric_value)
        .bind(row.period_start)
        .bind(row.period_end)
        .execute(&self.pool)
        .await
        .map_err(CoreError::infra)?;
        Ok(())
    }
}
