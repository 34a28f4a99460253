use crate::application::record_audit;
use crate::application::sessions::open_session;
use crate::{AppState, map_core_error};
use axum::{
    Json,
    extract::{ConnectInfo, State},
    http::HeaderMap,
    http::StatusCode,
    http::header,
};
use practice_core::domain::failed_login::FailedLoginContext;
use practice_core::domain::tenant::TenantSessionView;
use practice_core::{AuditEntry, CoreError};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use tracing::{info, warn};

pub const LOGIN_ACTION: &str = "auth.login";
pub const INVALID_CREDENTIALS: &str = "invalid_credentials";

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoginResponse {
    pub token: String,
    pub user_id: String,
    pub email: String,
    pub tenant: TenantSessionView,
}

/// Client address as reported by a fronting proxy, else the socket peer.
pub fn request_context(headers: &HeaderMap, peer: Option<IpAddr>) -> FailedLoginContext {
    let header_text = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
    };
    let client_ip = header_text("x-forwarded-for")
        .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string()))
        .filter(|ip| !ip.is_empty())
        .or_else(|| header_text("x-real-ip"))
        .or_else(|| peer.map(|ip| ip.to_string()));
    FailedLoginContext {
        client_ip,
        user_agent: header_text(header::USER_AGENT.as_str()),
    }
}

pub async fn handle_login_request(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, StatusCode> {
    if payload.email.trim().is_empty() || payload.password.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    if state.failed_logins.check_account_lock(&payload.email).await {
        warn!("Login refused for locked account {}", payload.email);
        return Err(StatusCode::LOCKED);
    }

    let auth_session = match state.auth.sign_in(&payload.email, &payload.password).await {
        Ok(session) => session,
        Err(CoreError::Unauthorized(reason)) => {
            info!("Login failed for {}: {}", payload.email, reason);
            // Tracking is best-effort and must not hold up the 401.
            let tracker = state.failed_logins.clone();
            let context = request_context(&headers, Some(peer.ip()));
            let email = payload.email.clone();
            tokio::spawn(async move {
                tracker
                    .track_failed_login(&email, INVALID_CREDENTIALS, context)
                    .await;
            });
            return Err(StatusCode::UNAUTHORIZED);
        }
        Err(e) => return Err(map_core_error(e)),
    };

    let session = open_session(&state, auth_session.clone()).await;
    let tenant = session.tenants.snapshot();
    if !tenant.is_provisioned() {
        warn!("User {} signed in without a provisioned clinic", auth_session.user.user_id);
    }

    record_audit(
        state.audit.as_ref(),
        AuditEntry::new(LOGIN_ACTION)
            .by_user(auth_session.user.user_id.clone())
            .in_tenant(tenant.current_tenant().map(|t| t.id.clone())),
    )
    .await;

    info!("User {} logged in", auth_session.user.user_id);
    Ok(Json(LoginResponse {
        token: auth_session.token,
        user_id: auth_session.user.user_id,
        email: auth_session.user.email,
        tenant: tenant.view(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_request_context_prefers_first_forwarded_address() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.1"));
        headers.insert(header::USER_AGENT, HeaderValue::from_static("Mozilla/5.0"));
        let peer: IpAddr = "192.0.2.44".parse().unwrap();
        let ctx = request_context(&headers, Some(peer));
        assert_eq!(ctx.client_ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(ctx.user_agent.as_deref(), Some("Mozilla/5.0"));

        assert_eq!(request_context(&HeaderMap::new(), None), FailedLoginContext::default());
    }

    #[test]
    fn test_request_context_falls_back_to_peer_address() {
        let peer: IpAddr = "2001:db8::7".parse().unwrap();
        let ctx = request_context(&HeaderMap::new(), Some(peer));
        assert_eq!(ctx.client_ip.as_deref(), Some("2001:db8::7"));

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.20"));
        let ctx = request_context(&headers, Some(peer));
        assert_eq!(ctx.client_ip.as_deref(), Some("198.51.100.20"));
    }
}
