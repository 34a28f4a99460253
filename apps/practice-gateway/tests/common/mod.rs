#![allow(dead_code)]

use axum::extract::connect_info::MockConnectInfo;
use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum_test::TestServer;
use practice_core::{
    adapters::{
        in_memory_cache::InMemoryCache,
        in_memory_event_bus::InMemoryEventBus,
        in_memory_logs::{InMemoryAuditLog, InMemoryFailedAttemptStore},
        in_memory_outbound::StaticIpLookup,
        in_memory_records::{InMemoryMembershipStore, InMemoryRecordStore},
        local_auth::LocalAuthProvider,
    },
    config::SecurityConfig,
    domain::failed_login::FailedLoginTracker,
    domain::tenant::{ScopeStrategy, Tenant, TenantMembership},
};
use practice_gateway::{AppState, application::sessions::SessionRegistry, create_app};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;

pub const PASSWORD: &str = "correct horse battery";
/// Socket peer every test request appears to come from.
pub const PEER_IP: &str = "192.0.2.10";

pub struct TestApp {
    pub server: TestServer,
    pub records: InMemoryRecordStore,
    pub memberships: InMemoryMembershipStore,
    pub failed_attempts: InMemoryFailedAttemptStore,
    pub audit: InMemoryAuditLog,
    pub bus: InMemoryEventBus,
    pub sessions: SessionRegistry,
}

pub fn tenant(id: &str, code: &str) -> Tenant {
    Tenant {
        id: id.to_string(),
        name: format!("Clinic {}", code),
        code: code.to_string(),
        email: None,
        phone: None,
        address: None,
        settings: json!({}),
    }
}

pub fn membership(id: &str, code: &str, role: &str) -> TenantMembership {
    TenantMembership {
        tenant: tenant(id, code),
        role: role.to_string(),
    }
}

/// Registers `users` as (user_id, email) with [`PASSWORD`] and wires every port in memory.
pub fn setup_test_app(users: &[(&str, &str)]) -> TestApp {
    setup_test_app_with(users, SecurityConfig::default(), ScopeStrategy::TablePrefix)
}

pub fn setup_test_app_with(
    users: &[(&str, &str)],
    security: SecurityConfig,
    scope: ScopeStrategy,
) -> TestApp {
    let auth = LocalAuthProvider::new(Arc::new(InMemoryCache::default()), 3600);
    for (user_id, email) in users {
        auth.register_with_id(user_id, email, PASSWORD)
            .expect("register test user");
    }

    let records = InMemoryRecordStore::default();
    let memberships = InMemoryMembershipStore::default();
    let failed_attempts = InMemoryFailedAttemptStore::default();
    let audit = InMemoryAuditLog::default();
    let bus = InMemoryEventBus::default();
    let sessions = SessionRegistry::default();

    let app_state = AppState {
        auth: Arc::new(auth),
        records: Arc::new(records.clone()),
        memberships: Arc::new(memberships.clone()),
        directory: Arc::new(memberships.clone()),
        failed_logins: Arc::new(FailedLoginTracker::new(
            Arc::new(failed_attempts.clone()),
            Arc::new(StaticIpLookup::new("198.51.100.4")),
            security,
        )),
        audit: Arc::new(audit.clone()),
        notices: Arc::new(bus.clone()),
        notice_feed: Arc::new(bus.clone()),
        sessions: sessions.clone(),
        security,
        scope,
    };

    let peer: SocketAddr = format!("{}:51000", PEER_IP).parse().expect("valid peer address");
    let app = create_app(app_state).layer(MockConnectInfo(peer));
    let server = TestServer::new(app).expect("Failed to create TestServer");
    TestApp {
        server,
        records,
        memberships,
        failed_attempts,
        audit,
        bus,
        sessions,
    }
}

/// Lets detached tasks (failed-login tracking, idle expiry) run to completion.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

pub fn bearer(token: &str) -> (HeaderName, HeaderValue) {
    (
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", token)).expect("valid header value"),
    )
}

/// Logs in and returns the full login response body.
pub async fn login(app: &TestApp, email: &str) -> Value {
    let response = app
        .server
        .post("/api/auth/login")
        .json(&json!({ "email": email, "password": PASSWORD }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    response.json::<Value>()
}

pub async fn login_token(app: &TestApp, email: &str) -> String {
    login(app, email).await["token"]
        .as_str()
        .expect("token in login response")
        .to_string()
}
