use axum::{
    Router,
    middleware::{self},
    routing::{get, post},
};
use http::StatusCode;
use practice_core::{
    AuditLog, AuthProvider, CoreError, EventPublisher, MembershipStore, NoticeFeed, RecordStore,
    TenantDirectory, config::SecurityConfig, domain::failed_login::FailedLoginTracker,
    domain::tenant::ScopeStrategy,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

pub mod application;
pub mod config;

use application::{
    commands::{
        change_password::handle_change_password_request, login::handle_login_request,
        logout::handle_logout_request, record_activity::handle_record_activity_request,
        switch_tenant::handle_switch_tenant_request,
    },
    events::handle_session_events,
    middleware::session_auth,
    query::{
        handle_appointment_trend, handle_current_tenant, handle_lock_status,
        handle_revenue_trend, handle_staff_performance, handle_treatment_mix,
    },
    sessions::SessionRegistry,
};

// Holds shared dependencies
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<dyn AuthProvider>,
    pub records: Arc<dyn RecordStore>,
    pub memberships: Arc<dyn MembershipStore>,
    pub directory: Arc<dyn TenantDirectory>,
    pub failed_logins: Arc<FailedLoginTracker>,
    pub audit: Arc<dyn AuditLog>,
    pub notices: Arc<dyn EventPublisher>,
    pub notice_feed: Arc<dyn NoticeFeed>,
    pub sessions: SessionRegistry,
    pub security: SecurityConfig,
    pub scope: ScopeStrategy,
}

pub fn create_app(app_state: AppState) -> Router {
    let auth = middleware::from_fn_with_state(app_state.clone(), session_auth);

    let protected = Router::new()
        .route("/auth/logout", post(handle_logout_request))
        .route("/auth/password", post(handle_change_password_request))
        .route("/session/activity", post(handle_record_activity_request))
        .route("/session/events", get(handle_session_events))
        .route("/tenants/current", get(handle_current_tenant))
        .route("/tenants/switch", post(handle_switch_tenant_request))
        .route("/analytics/appointments", get(handle_appointment_trend))
        .route("/analytics/revenue", get(handle_revenue_trend))
        .route("/analytics/staff-performance", get(handle_staff_performance))
        .route("/analytics/treatment-mix", get(handle_treatment_mix))
        .route_layer(auth);

    // The login form uses these before a session exists.
    let public = Router::new()
        .route("/auth/login", post(handle_login_request))
        .route("/security/lock-status", get(handle_lock_status));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", public.merge(protected))
        .layer(cors)
        .with_state(app_state)
}

pub fn map_core_error(err: CoreError) -> StatusCode {
    error!("CoreError occurred: {:?}", err);
    match err {
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::Validation(_) => StatusCode::BAD_REQUEST,
        CoreError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
        CoreError::Locked(_) => StatusCode::LOCKED,
        CoreError::Internal(_) | CoreError::Infrastructure(_) | CoreError::Configuration(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
