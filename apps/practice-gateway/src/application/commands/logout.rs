use crate::AppState;
use crate::application::middleware::SessionContext;
use crate::application::record_audit;
use axum::{Extension, extract::State, http::StatusCode};
use practice_core::AuditEntry;
use tracing::{info, warn};

pub const LOGOUT_ACTION: &str = "auth.logout";

/// Clears tenant state and the idle timer before revoking the token.
pub async fn handle_logout_request(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
) -> StatusCode {
    let tenant_id = ctx
        .session
        .tenants
        .snapshot()
        .current_tenant()
        .map(|t| t.id.clone());

    state.sessions.close(&ctx.token);
    if let Err(e) = state.auth.sign_out(&ctx.token).await {
        // The server-side session is gone either way.
        warn!("Sign-out failed for user {}: {}", ctx.user.user_id, e);
    }

    record_audit(
        state.audit.as_ref(),
        AuditEntry::new(LOGOUT_ACTION)
            .by_user(ctx.user.user_id.clone())
            .in_tenant(tenant_id),
    )
    .await;

    info!("User {} logged out", ctx.user.user_id);
    StatusCode::NO_CONTENT
}
