//! Security policy settings shared by the gateway and the session guard.

use crate::CoreError;
use std::str::FromStr;
use std::time::Duration;

/// Idle-timeout and lockout policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityConfig {
    /// Minutes without recognized interaction before a forced sign-out (default: 30).
    pub idle_timeout_minutes: u64,
    /// Failed attempts inside the window that lock the account (default: 5).
    pub max_failed_attempts: u32,
    /// Trailing window over which failed attempts are counted (default: 15).
    pub lockout_window_minutes: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: 30,
            max_failed_attempts: 5,
            lockout_window_minutes: 15,
        }
    }
}

impl SecurityConfig {
    /// Reads `IDLE_TIMEOUT_MINUTES`, `MAX_FAILED_ATTEMPTS` and `LOCKOUT_WINDOW_MINUTES`,
    /// falling back to the defaults for unset variables.
    pub fn from_env() -> Result<Self, CoreError> {
        let defaults = Self::default();
        Ok(Self {
            idle_timeout_minutes: env_or("IDLE_TIMEOUT_MINUTES", defaults.idle_timeout_minutes)?,
            max_failed_attempts: env_or("MAX_FAILED_ATTEMPTS", defaults.max_failed_attempts)?,
            lockout_window_minutes: env_or(
                "LOCKOUT_WINDOW_MINUTES",
                defaults.lockout_window_minutes,
            )?,
        })
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_minutes * 60)
    }

    pub fn lockout_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.lockout_window_minutes as i64)
    }
}

/// Parses an optional environment variable, keeping `default` when it is unset.
pub fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, CoreError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|_| CoreError::Configuration(format!("{} has an invalid value: {}", key, raw))),
        _ => Ok(default),
    }
}

/// Reads an optional string variable, treating blank values as unset.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
