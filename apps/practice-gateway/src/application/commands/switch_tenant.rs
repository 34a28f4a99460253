use crate::AppState;
use crate::application::middleware::SessionContext;
use crate::application::record_audit;
use axum::{Extension, Json, extract::State, http::StatusCode};
use practice_core::AuditEntry;
use practice_core::domain::tenant::TenantSessionView;
use serde::Deserialize;
use serde_json::json;

pub const TENANT_SWITCH_ACTION: &str = "tenant.switch";

#[derive(Deserialize)]
pub struct SwitchTenantRequest {
    pub tenant_id: String,
}

/// Only admins holding more than one membership may switch; anything else is 403
/// and leaves the active tenant untouched.
pub async fn handle_switch_tenant_request(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    Json(payload): Json<SwitchTenantRequest>,
) -> Result<Json<TenantSessionView>, StatusCode> {
    let previous = ctx
        .session
        .tenants
        .snapshot()
        .current_tenant()
        .map(|t| t.id.clone());

    if !ctx.session.tenants.switch_tenant(&payload.tenant_id) {
        return Err(StatusCode::FORBIDDEN);
    }

    record_audit(
        state.audit.as_ref(),
        AuditEntry::new(TENANT_SWITCH_ACTION)
            .by_user(ctx.user.user_id.clone())
            .in_tenant(Some(payload.tenant_id.clone()))
            .with_details(json!({ "from": previous, "to": payload.tenant_id })),
    )
    .await;

    Ok(Json(ctx.session.tenants.snapshot().view()))
}
