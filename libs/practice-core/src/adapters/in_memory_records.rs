use crate::domain::records::{RawRecord, parse_record_instant};
use crate::domain::tenant::{ScopeStrategy, ScopedRelation, Tenant, TenantMembership, tenant_relations};
use crate::{CoreError, MembershipStore, RecordQuery, RecordStore, TenantDirectory};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

/// In-memory RecordStore keyed by qualified relation name (`schema.table`).
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecordStore {
    tables: Arc<DashMap<String, Vec<RawRecord>>>,
}

impl InMemoryRecordStore {
    pub fn insert(&self, relation: &ScopedRelation, row: RawRecord) {
        self.tables.entry(relation.qualified()).or_default().push(row);
    }

    /// Appends every JSON object in `rows`; other values are skipped.
    pub fn seed(&self, relation: &ScopedRelation, rows: Vec<Value>) {
        let mut table = self.tables.entry(relation.qualified()).or_default();
        table.extend(rows.into_iter().filter_map(|row| match row {
            Value::Object(map) => Some(map),
            _ => None,
        }));
    }
}

fn field_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn matches(row: &RawRecord, query: &RecordQuery) -> bool {
    if let Some(range) = &query.time_range {
        let instant = match row.get(&range.field) {
            Some(Value::String(raw)) => parse_record_instant(raw),
            _ => None,
        };
        // Rows without a comparable timestamp never satisfy a range filter.
        match instant {
            Some(at) if at >= range.start && at < range.end => {}
            _ => return false,
        }
    }
    query
        .equals
        .iter()
        .all(|(field, expected)| field_text(row.get(field)).as_deref() == Some(expected.as_str()))
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn fetch(&self, query: &RecordQuery) -> Result<Vec<RawRecord>, CoreError> {
        Ok(self
            .tables
            .get(&query.relation.qualified())
            .map(|rows| rows.iter().filter(|row| matches(row, query)).cloned().collect())
            .unwrap_or_default())
    }
}

/// In-memory MembershipStore preserving insertion order per user.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMembershipStore {
    memberships: Arc<DashMap<String, Vec<TenantMembership>>>,
}

impl InMemoryMembershipStore {
    pub fn add(&self, user_id: &str, membership: TenantMembership) {
        self.memberships
            .entry(user_id.to_string())
            .or_default()
            .push(membership);
    }
}

#[async_trait]
impl MembershipStore for InMemoryMembershipStore {
    async fn memberships_for(&self, user_id: &str) -> Result<Vec<TenantMembership>, CoreError> {
        Ok(self
            .memberships
            .get(user_id)
            .map(|m| m.value().clone())
            .unwrap_or_default())
    }
}

/// Relations need no creation in memory; provisioning only checks the tenant has a scope.
#[async_trait]
impl TenantDirectory for InMemoryMembershipStore {
    async fn tenants(&self) -> Result<Vec<Tenant>, CoreError> {
        let mut tenants: Vec<Tenant> = Vec::new();
        for entry in self.memberships.iter() {
            for membership in entry.value() {
                if !tenants.iter().any(|t| t.id == membership.tenant.id) {
                    tenants.push(membership.tenant.clone());
                }
            }
        }
        tenants.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tenants)
    }

    async fn enroll(&self, user_id: &str, membership: &TenantMembership) -> Result<(), CoreError> {
        let mut memberships = self.memberships.entry(user_id.to_string()).or_default();
        if !memberships.iter().any(|m| m.tenant.id == membership.tenant.id) {
            memberships.push(membership.clone());
        }
        Ok(())
    }

    async fn provision(&self, tenant: &Tenant, strategy: ScopeStrategy) -> Result<(), CoreError> {
        tenant_relations(tenant, strategy)
            .map(|_| ())
            .ok_or_else(|| CoreError::Validation(format!("Tenant {} has no usable code", tenant.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tenant::Tenant;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[tokio::test]
    async fn test_range_is_half_open_and_equals_filters() {
        let store = InMemoryRecordStore::default();
        let relation = ScopedRelation::public("appointments");
        store.seed(
            &relation,
            vec![
                json!({"id": 1, "appointment_date": "2024-03-04", "dentist_id": "d1"}),
                json!({"id": 2, "appointment_date": "2024-03-04T23:59:59Z", "dentist_id": "d2"}),
                json!({"id": 3, "appointment_date": "2024-03-05", "dentist_id": "d1"}),
                json!({"id": 4, "dentist_id": "d1"}),
                json!("not an object"),
            ],
        );

        let start = Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap();
        let in_day = store
            .fetch(&RecordQuery::new(relation.clone()).within("appointment_date", start, end))
            .await
            .unwrap();
        let ids: Vec<&Value> = in_day.iter().map(|r| &r["id"]).collect();
        assert_eq!(ids, vec![&json!(1), &json!(2)]);

        let for_d1 = store
            .fetch(&RecordQuery::new(relation).where_eq("dentist_id", "d1"))
            .await
            .unwrap();
        assert_eq!(for_d1.len(), 3);
    }

    #[tokio::test]
    async fn test_relations_are_isolated() {
        let store = InMemoryRecordStore::default();
        let clinic = ScopedRelation {
            schema: "public".into(),
            table: "north_appointments".into(),
        };
        store.seed(&clinic, vec![json!({"id": "a"})]);

        let other = store
            .fetch(&RecordQuery::new(ScopedRelation::public("appointments")))
            .await
            .unwrap();
        assert!(other.is_empty());
        assert_eq!(store.fetch(&RecordQuery::new(clinic)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_memberships_keep_insertion_order() {
        let store = InMemoryMembershipStore::default();
        for code in ["first", "second"] {
            store.add(
                "user-1",
                TenantMembership {
                    tenant: Tenant {
                        id: code.into(),
                        name: code.into(),
                        code: code.into(),
                        email: None,
                        phone: None,
                        address: None,
                        settings: json!({}),
                    },
                    role: "admin".into(),
                },
            );
        }
        let memberships = store.memberships_for("user-1").await.unwrap();
        assert_eq!(memberships[0].tenant.id, "first");
        assert_eq!(memberships[1].tenant.id, "second");
        assert!(store.memberships_for("user-2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_directory_enrolls_once_and_lists_tenants() {
        let store = InMemoryMembershipStore::default();
        let clinic = TenantMembership {
            tenant: Tenant {
                id: "t-north".into(),
                name: "North Dental".into(),
                code: "north".into(),
                email: None,
                phone: None,
                address: None,
                settings: json!({}),
            },
            role: "admin".into(),
        };
        store.enroll("user-1", &clinic).await.unwrap();
        store.enroll("user-1", &clinic).await.unwrap();
        store.enroll("user-2", &clinic).await.unwrap();

        assert_eq!(store.memberships_for("user-1").await.unwrap().len(), 1);
        let tenants = store.tenants().await.unwrap();
        assert_eq!(tenants.len(), 1);
        assert!(store.provision(&tenants[0], ScopeStrategy::Schema).await.is_ok());

        let mut blank = tenants[0].clone();
        blank.code = " ".into();
        assert!(matches!(
            store.provision(&blank, ScopeStrategy::TablePrefix).await,
            Err(CoreError::Validation(_))
        ));
    }
}
