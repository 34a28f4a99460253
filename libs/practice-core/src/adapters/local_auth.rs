//! Self-hosted stand-in for the hosted authentication provider.
//!
//! Credentials are argon2 hashes held in memory; session tokens live in the
//! [`Cache`] port so they can be shared through Redis.

use crate::domain::failed_login::normalize_email;
use crate::{AuthProvider, AuthSession, AuthenticatedUser, Cache, CoreError};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Argon2, password_hash::rand_core::OsRng};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub const SESSION_KEY_PREFIX: &str = "session:";

#[derive(Debug, Clone)]
struct Credential {
    user_id: String,
    email: String,
    password_hash: String,
}

pub struct LocalAuthProvider {
    credentials: DashMap<String, Credential>,
    sessions: Arc<dyn Cache>,
    session_ttl_seconds: u64,
}

fn hash_password(password: &str) -> Result<String, CoreError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| CoreError::Internal(format!("Password hashing failed: {}", e)))
}

fn verify_password(password: &str, stored_hash: &str) -> Result<bool, CoreError> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| CoreError::Internal(format!("Stored password hash is invalid: {}", e)))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

fn session_key(token: &str) -> String {
    format!("{}{}", SESSION_KEY_PREFIX, token)
}

impl LocalAuthProvider {
    pub fn new(sessions: Arc<dyn Cache>, session_ttl_seconds: u64) -> Self {
        Self {
            credentials: DashMap::new(),
            sessions,
            session_ttl_seconds,
        }
    }

    /// Registers (or replaces) a user with a fresh id.
    pub fn register(&self, email: &str, password: &str) -> Result<AuthenticatedUser, CoreError> {
        self.register_with_id(&Uuid::new_v4().to_string(), email, password)
    }

    pub fn register_with_id(
        &self,
        user_id: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthenticatedUser, CoreError> {
        let email = normalize_email(email);
        if email.is_empty() || password.is_empty() {
            return Err(CoreError::Validation("Email and password are required".into()));
        }
        let credential = Credential {
            user_id: user_id.to_string(),
            email: email.clone(),
            password_hash: hash_password(password)?,
        };
        self.credentials.insert(email.clone(), credential);
        info!("Registered local user {} ({})", user_id, email);
        Ok(AuthenticatedUser {
            user_id: user_id.to_string(),
            email,
        })
    }
}

#[async_trait]
impl AuthProvider for LocalAuthProvider {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, CoreError> {
        let email = normalize_email(email);
        let credential = self
            .credentials
            .get(&email)
            .map(|c| c.value().clone())
            .ok_or_else(|| CoreError::Unauthorized("Invalid email or password".into()))?;

        if !verify_password(password, &credential.password_hash)? {
            warn!("Password mismatch for {}", email);
            return Err(CoreError::Unauthorized("Invalid email or password".into()));
        }

        let user = AuthenticatedUser {
            user_id: credential.user_id,
            email: credential.email,
        };
        let token = format!("sess-{}", Uuid::new_v4());
        let encoded = serde_json::to_vec(&user)
            .map_err(|e| CoreError::Internal(format!("Failed to encode session: {}", e)))?;
        self.sessions
            .set(&session_key(&token), &encoded, Some(self.session_ttl_seconds))
            .await?;

        Ok(AuthSession { token, user })
    }

    async fn current_user(&self, token: &str) -> Result<Option<AuthenticatedUser>, CoreError> {
        match self.sessions.get(&session_key(token)).await? {
            Some(bytes) => match serde_json::from_slice::<AuthenticatedUser>(&bytes) {
                Ok(user) => Ok(Some(user)),
                Err(e) => {
                    warn!("Discarding unreadable session entry: {}", e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn sign_out(&self, token: &str) -> Result<(), CoreError> {
        self.sessions.delete(&session_key(token)).await
    }

    async fn update_password(&self, token: &str, new_password: &str) -> Result<(), CoreError> {
        let user = self
            .current_user(token)
            .await?
            .ok_or_else(|| CoreError::Unauthorized("Session expired".into()))?;
        let password_hash = hash_password(new_password)?;
        match self.credentials.get_mut(&user.email) {
            Some(mut credential) => {
                credential.password_hash = password_hash;
                info!("Password updated for user {}", user.user_id);
                Ok(())
            }
            None => Err(CoreError::NotFound(format!("User not found: {}", user.user_id))),
        }
    }
}
