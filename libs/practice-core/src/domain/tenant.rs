//! Tenant (clinic) resolution and tenant-scoped identifiers.

use crate::domain::kpi::{APPOINTMENTS_TABLE, INVOICES_TABLE};
use crate::{CoreError, MembershipStore, TenantDirectory};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, info, warn};

pub const ADMIN_ROLE: &str = "admin";
pub const PUBLIC_SCHEMA: &str = "public";

/// Base tables every tenant owns a scoped copy of.
pub const TENANT_TABLES: [&str; 2] = [APPOINTMENTS_TABLE, INVOICES_TABLE];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    /// Short code used to derive scoped table and schema names.
    pub code: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    #[serde(default)]
    pub settings: serde_json::Value,
}

impl Tenant {
    /// Normalised code, or `None` when nothing usable is left of it.
    pub fn scope_code(&self) -> Option<String> {
        let code = normalize_code(&self.code);
        (!code.is_empty()).then_some(code)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantMembership {
    pub tenant: Tenant,
    pub role: String,
}

#[derive(thiserror::Error, Debug)]
pub enum TenantError {
    #[error("Core Error: {0}")]
    Core(#[from] CoreError),
    #[error("No tenant is provisioned for this user")]
    NotProvisioned,
    #[error("Tenant switching requires the admin role and more than one tenant (role: {role:?}, tenants: {tenants})")]
    SwitchNotPermitted { role: Option<String>, tenants: usize },
    #[error("User is not a member of tenant {0}")]
    UnknownTenant(String),
}

/// How tenant isolation is expressed in relation names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeStrategy {
    /// `public.{code}_{table}`
    #[default]
    TablePrefix,
    /// `tenant_{code}.{table}`
    Schema,
}

/// A schema-qualified relation name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ScopedRelation {
    pub schema: String,
    pub table: String,
}

impl ScopedRelation {
    pub fn public(table: impl Into<String>) -> Self {
        Self {
            schema: PUBLIC_SCHEMA.to_string(),
            table: table.into(),
        }
    }

    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

/// Lowercases a tenant code and replaces anything outside `[a-z0-9_]` with `_`.
///
/// Kept in step with the `tenant_scope_code` SQL function behind the unique index.
pub fn normalize_code(code: &str) -> String {
    code.trim_matches(&[' ', '\t', '\r', '\n'][..])
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn scoped_relation(code: Option<&str>, base: &str, strategy: ScopeStrategy) -> ScopedRelation {
    match (code, strategy) {
        (None, _) => ScopedRelation::public(base),
        (Some(code), ScopeStrategy::TablePrefix) => ScopedRelation::public(format!("{}_{}", code, base)),
        (Some(code), ScopeStrategy::Schema) => ScopedRelation {
            schema: format!("tenant_{}", code),
            table: base.to_string(),
        },
    }
}

/// `(base table, scoped relation)` for every tenant table, or `None` for a
/// tenant without a usable code.
pub fn tenant_relations(tenant: &Tenant, strategy: ScopeStrategy) -> Option<Vec<(&'static str, ScopedRelation)>> {
    let code = tenant.scope_code()?;
    Some(
        TENANT_TABLES
            .iter()
            .map(|base| (*base, scoped_relation(Some(&code), base, strategy)))
            .collect(),
    )
}

/// Provisions the scoped relations of every tenant in `directory`.
///
/// Per-tenant failures are logged and skipped; returns how many succeeded.
pub async fn provision_known_tenants(
    directory: &dyn TenantDirectory,
    strategy: ScopeStrategy,
) -> Result<usize, CoreError> {
    let tenants = directory.tenants().await?;
    let mut provisioned = 0;
    for tenant in &tenants {
        match directory.provision(tenant, strategy).await {
            Ok(()) => provisioned += 1,
            Err(e) => error!("Failed to provision tenant {} ({}): {}", tenant.id, tenant.code, e),
        }
    }
    info!("Provisioned {} of {} tenant(s)", provisioned, tenants.len());
    Ok(provisioned)
}

/// Tenant state for one authenticated user.
///
/// Invariant: `active` always indexes into `memberships`, or is `None` when
/// there are no memberships.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TenantSession {
    memberships: Vec<TenantMembership>,
    active: Option<usize>,
}

impl TenantSession {
    /// The first membership returned by the store becomes the active tenant.
    ///
    /// Memberships whose code normalises to nothing, or to the same scope as an
    /// earlier membership, are dropped: they would read another clinic's rows.
    pub fn from_memberships(memberships: Vec<TenantMembership>) -> Self {
        let mut scopes = HashSet::new();
        let memberships: Vec<TenantMembership> = memberships
            .into_iter()
            .filter(|m| match m.tenant.scope_code() {
                Some(code) if scopes.insert(code.clone()) => true,
                Some(code) => {
                    error!(
                        "Dropping membership in tenant {}: code {:?} collides with scope {}",
                        m.tenant.id, m.tenant.code, code
                    );
                    false
                }
                None => {
                    error!(
                        "Dropping membership in tenant {}: code {:?} yields no scope",
                        m.tenant.id, m.tenant.code
                    );
                    false
                }
            })
            .collect();
        let active = if memberships.is_empty() { None } else { Some(0) };
        Self {
            memberships,
            active,
        }
    }

    pub fn tenants(&self) -> Vec<&Tenant> {
        self.memberships.iter().map(|m| &m.tenant).collect()
    }

    pub fn tenant_count(&self) -> usize {
        self.memberships.len()
    }

    pub fn current_tenant(&self) -> Option<&Tenant> {
        self.active.map(|i| &self.memberships[i].tenant)
    }

    /// Role held in the active tenant.
    pub fn role(&self) -> Option<&str> {
        self.active.map(|i| self.memberships[i].role.as_str())
    }

    pub fn is_provisioned(&self) -> bool {
        self.active.is_some()
    }

    pub fn can_switch_tenants(&self) -> bool {
        self.role() == Some(ADMIN_ROLE) && self.memberships.len() > 1
    }

    fn scope_code(&self) -> Option<String> {
        self.current_tenant().and_then(Tenant::scope_code)
    }

    /// `{code}_{base}` for the active tenant, `base` when there is none.
    pub fn table_name(&self, base: &str) -> String {
        self.relation(base, ScopeStrategy::TablePrefix).table
    }

    /// `tenant_{code}` for the active tenant, `public` when there is none.
    pub fn schema_name(&self) -> String {
        self.relation("", ScopeStrategy::Schema).schema
    }

    pub fn relation(&self, base: &str, strategy: ScopeStrategy) -> ScopedRelation {
        scoped_relation(self.scope_code().as_deref(), base, strategy)
    }

    pub fn switch_to(&mut self, tenant_id: &str) -> Result<(), TenantError> {
        if !self.can_switch_tenants() {
            return Err(TenantError::SwitchNotPermitted {
                role: self.role().map(String::from),
                tenants: self.memberships.len(),
            });
        }
        let index = self
            .memberships
            .iter()
            .position(|m| m.tenant.id == tenant_id)
            .ok_or_else(|| TenantError::UnknownTenant(tenant_id.to_string()))?;
        self.active = Some(index);
        Ok(())
    }

    pub fn view(&self) -> TenantSessionView {
        TenantSessionView {
            tenants: self.tenants().into_iter().cloned().collect(),
            current_tenant: self.current_tenant().cloned(),
            role: self.role().map(String::from),
            can_switch_tenants: self.can_switch_tenants(),
            schema: self.schema_name(),
        }
    }
}

/// Serializable snapshot handed to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantSessionView {
    pub tenants: Vec<Tenant>,
    pub current_tenant: Option<Tenant>,
    pub role: Option<String>,
    pub can_switch_tenants: bool,
    pub schema: String,
}

#[derive(Debug, Default)]
struct ResolverState {
    // Bumped on every reset; a fetch only lands if its generation is still current.
    generation: u64,
    session: TenantSession,
}

/// Owns the tenant session for one authenticated user.
pub struct TenantResolver {
    store: Arc<dyn MembershipStore>,
    state: RwLock<ResolverState>,
}

impl TenantResolver {
    pub fn new(store: Arc<dyn MembershipStore>) -> Self {
        Self {
            store,
            state: RwLock::new(ResolverState::default()),
        }
    }

    /// Resets the state, then fetches and applies memberships for `user_id`.
    ///
    /// Fetch failures are logged and leave the session empty.
    pub async fn resolve(&self, user_id: &str) -> TenantSession {
        let generation = self.reset();

        let fetched = self.store.memberships_for(user_id).await;

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.generation != generation {
            debug!("Discarding stale tenant fetch for user {}", user_id);
            return state.session.clone();
        }
        match fetched {
            Ok(memberships) => {
                info!(
                    "Resolved {} tenant membership(s) for user {}",
                    memberships.len(),
                    user_id
                );
                state.session = TenantSession::from_memberships(memberships);
            }
            Err(e) => {
                error!("Failed to fetch tenant memberships for {}: {}", user_id, e);
            }
        }
        state.session.clone()
    }

    /// Synchronously clears all tenant state; any fetch still in flight is discarded.
    pub fn logout(&self) {
        self.reset();
    }

    fn reset(&self) -> u64 {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.generation += 1;
        state.session = TenantSession::default();
        state.generation
    }

    /// Rejected switches are a logged no-op.
    pub fn switch_tenant(&self, tenant_id: &str) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        match state.session.switch_to(tenant_id) {
            Ok(()) => {
                info!("Switched active tenant to {}", tenant_id);
                true
            }
            Err(e) => {
                warn!("Tenant switch to {} rejected: {}", tenant_id, e);
                false
            }
        }
    }

    pub fn snapshot(&self) -> TenantSession {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .session
            .clone()
    }

    pub fn table_name(&self, base: &str) -> String {
        self.snapshot().table_name(base)
    }

    pub fn schema_name(&self) -> String {
        self.snapshot().schema_name()
    }
}
