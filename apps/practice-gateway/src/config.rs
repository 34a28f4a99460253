use practice_core::CoreError;
use practice_core::adapters::http_ip_lookup::DEFAULT_IP_LOOKUP_URL;
use practice_core::config::{SecurityConfig, env_opt, env_or};
use practice_core::domain::tenant::{ADMIN_ROLE, ScopeStrategy, Tenant, TenantMembership};
use std::net::SocketAddr;
use tracing::Level;

/// A local account created at start-up (development and single-clinic installs).
#[derive(Debug, Clone)]
pub struct BootstrapUser {
    pub user_id: String,
    pub email: String,
    pub password: String,
    /// Clinic the account administers; without it the account has no tenant.
    pub tenant_code: Option<String>,
    pub tenant_name: Option<String>,
}

impl BootstrapUser {
    /// Admin membership in the bootstrap clinic, keyed by its code.
    pub fn membership(&self) -> Option<TenantMembership> {
        let code = self.tenant_code.clone()?;
        Some(TenantMembership {
            tenant: Tenant {
                id: code.clone(),
                name: self.tenant_name.clone().unwrap_or_else(|| code.clone()),
                code,
                email: None,
                phone: None,
                address: None,
                settings: serde_json::json!({}),
            },
            role: ADMIN_ROLE.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub security: SecurityConfig,
    pub scope: ScopeStrategy,
    pub ip_lookup_url: String,
    pub session_ttl_seconds: u64,
    pub bootstrap: Option<BootstrapUser>,
    pub log_level: Level,
}

pub fn parse_scope_strategy(raw: &str) -> Result<ScopeStrategy, CoreError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "table" | "table_prefix" => Ok(ScopeStrategy::TablePrefix),
        "schema" => Ok(ScopeStrategy::Schema),
        other => Err(CoreError::Configuration(format!(
            "TENANT_SCOPING must be 'table' or 'schema', got '{}'",
            other
        ))),
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, CoreError> {
        let scope = match env_opt("TENANT_SCOPING") {
            Some(raw) => parse_scope_strategy(&raw)?,
            None => ScopeStrategy::default(),
        };
        let bootstrap = match (env_opt("BOOTSTRAP_EMAIL"), env_opt("BOOTSTRAP_PASSWORD")) {
            (Some(email), Some(password)) => Some(BootstrapUser {
                user_id: env_opt("BOOTSTRAP_USER_ID").unwrap_or_else(|| "bootstrap-admin".into()),
                email,
                password,
                tenant_code: env_opt("BOOTSTRAP_TENANT_CODE"),
                tenant_name: env_opt("BOOTSTRAP_TENANT_NAME"),
            }),
            _ => None,
        };

        Ok(Self {
            bind_addr: env_or("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?,
            database_url: env_opt("DATABASE_URL"),
            redis_url: env_opt("REDIS_URL"),
            security: SecurityConfig::from_env()?,
            scope,
            ip_lookup_url: env_opt("IP_LOOKUP_URL").unwrap_or_else(|| DEFAULT_IP_LOOKUP_URL.into()),
            session_ttl_seconds: env_or("SESSION_TTL_SECONDS", 8 * 3600)?,
            bootstrap,
            log_level: env_or("LOG_LEVEL", Level::INFO)?,
        })
    }
}
