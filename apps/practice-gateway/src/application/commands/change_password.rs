use crate::application::middleware::SessionContext;
use crate::application::record_audit;
use crate::{AppState, map_core_error};
use axum::{Extension, Json, extract::State, http::StatusCode};
use practice_core::AuditEntry;
use serde::Deserialize;
use tracing::{info, warn};

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const PASSWORD_CHANGED_ACTION: &str = "auth.password_changed";

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub new_password: String,
    pub confirm_password: String,
}

pub fn validate_new_password(new_password: &str, confirm_password: &str) -> Result<(), String> {
    if new_password != confirm_password {
        return Err("Passwords do not match".into());
    }
    if new_password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        ));
    }
    Ok(())
}

pub async fn handle_change_password_request(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<StatusCode, StatusCode> {
    if let Err(reason) = validate_new_password(&payload.new_password, &payload.confirm_password) {
        warn!("Password change rejected for {}: {}", ctx.user.user_id, reason);
        return Err(StatusCode::BAD_REQUEST);
    }

    state
        .auth
        .update_password(&ctx.token, &payload.new_password)
        .await
        .map_err(map_core_error)?;

    record_audit(
        state.audit.as_ref(),
        AuditEntry::new(PASSWORD_CHANGED_ACTION)
            .by_user(ctx.user.user_id.clone())
            .in_tenant(
                ctx.session
                    .tenants
                    .snapshot()
                    .current_tenant()
                    .map(|t| t.id.clone()),
            ),
    )
    .await;

    info!("Password changed for user {}", ctx.user.user_id);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_new_password() {
        assert!(validate_new_password("correct horse", "correct horse").is_ok());
        assert_eq!(
            validate_new_password("correct horse", "correct house"),
            Err("Passwords do not match".to_string())
        );
        assert!(validate_new_password("short", "short").is_err());
        // Counted in characters, not bytes.
        assert!(validate_new_password("ééééééé", "ééééééé").is_err());
        assert!(validate_new_password("éééééééé", "éééééééé").is_ok());
    }
}
