use practice_core::CoreError;
use practice_core::config::{env_opt, env_or};
use practice_core::domain::kpi::DigestConfig;
use std::net::SocketAddr;
use tracing::Level;

pub const DEFAULT_EMAIL_API_URL: &str = "https://api.resend.com/emails";

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub bind_addr: SocketAddr,
    pub database_url: Option<String>,
    pub email_api_url: String,
    pub email_api_key: Option<String>,
    pub digest: DigestConfig,
    pub log_level: Level,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, CoreError> {
        let defaults = DigestConfig::default();
        Ok(Self {
            bind_addr: env_or("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3100)))?,
            database_url: env_opt("DATABASE_URL"),
            email_api_url: env_opt("EMAIL_API_URL").unwrap_or_else(|| DEFAULT_EMAIL_API_URL.into()),
            email_api_key: env_opt("EMAIL_API_KEY"),
            digest: DigestConfig {
                from: env_opt("KPI_DIGEST_FROM").unwrap_or(defaults.from),
                default_recipient: env_opt("KPI_DIGEST_RECIPIENT"),
            },
            log_level: env_or("LOG_LEVEL", Level::INFO)?,
        })
    }
}
