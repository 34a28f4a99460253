mod common;

use axum::http::StatusCode;
use common::{PASSWORD, bearer, login, login_token, membership, setup_test_app};
use practice_core::TenantDirectory;
use practice_gateway::config::BootstrapUser;
use serde_json::{Value, json};

#[tokio::test]
async fn test_unprovisioned_user_sees_empty_snapshot() {
    let app = setup_test_app(&[("u-1", "new.hire@example.com")]);
    let token = login_token(&app, "new.hire@example.com").await;
    let (name, value) = bearer(&token);

    let response = app
        .server
        .get("/api/tenants/current")
        .add_header(name.clone(), value.clone())
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let view = response.json::<Value>();
    assert_eq!(view["tenants"], json!([]));
    assert_eq!(view["current_tenant"], Value::Null);
    assert_eq!(view["role"], Value::Null);
    assert_eq!(view["schema"], "public");

    let response = app
        .server
        .get("/api/analytics/treatment-mix")
        .add_header(name, value)
        .await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_switches_between_clinics() {
    let app = setup_test_app(&[("u-1", "owner@example.com")]);
    app.memberships.add("u-1", membership("t-1", "north", "admin"));
    app.memberships.add("u-1", membership("t-2", "south", "dentist"));
    let token = login_token(&app, "owner@example.com").await;
    let (name, value) = bearer(&token);

    let view = app
        .server
        .get("/api/tenants/current")
        .add_header(name.clone(), value.clone())
        .await
        .json::<Value>();
    assert_eq!(view["current_tenant"]["id"], "t-1");
    assert_eq!(view["can_switch_tenants"], true);

    let response = app
        .server
        .post("/api/tenants/switch")
        .add_header(name.clone(), value.clone())
        .json(&json!({ "tenant_id": "t-2" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let view = response.json::<Value>();
    assert_eq!(view["current_tenant"]["id"], "t-2");
    // The role follows the membership of the new tenant.
    assert_eq!(view["role"], "dentist");
    assert_eq!(view["schema"], "tenant_south");

    let switch = app
        .audit
        .entries()
        .into_iter()
        .find(|e| e.action == "tenant.switch")
        .expect("tenant switch audited");
    assert_eq!(switch.details, json!({ "from": "t-1", "to": "t-2" }));

    // Still tenant-scoped on the next request.
    let view = app
        .server
        .get("/api/tenants/current")
        .add_header(name, value)
        .await
        .json::<Value>();
    assert_eq!(view["current_tenant"]["id"], "t-2");
}

#[tokio::test]
async fn test_rejected_switch_leaves_state_unchanged() {
    let app = setup_test_app(&[("u-1", "hygienist@example.com"), ("u-2", "admin@example.com")]);
    app.memberships.add("u-1", membership("t-1", "north", "hygienist"));
    app.memberships.add("u-1", membership("t-2", "south", "hygienist"));
    app.memberships.add("u-2", membership("t-1", "north", "admin"));
    app.memberships.add("u-2", membership("t-2", "south", "admin"));

    let token = login_token(&app, "hygienist@example.com").await;
    let (name, value) = bearer(&token);
    let response = app
        .server
        .post("/api/tenants/switch")
        .add_header(name.clone(), value.clone())
        .json(&json!({ "tenant_id": "t-2" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
    let view = app
        .server
        .get("/api/tenants/current")
        .add_header(name, value)
        .await
        .json::<Value>();
    assert_eq!(view["current_tenant"]["id"], "t-1");

    // An admin asking for a clinic they do not belong to is rejected too.
    let token = login_token(&app, "admin@example.com").await;
    let (name, value) = bearer(&token);
    let response = app
        .server
        .post("/api/tenants/switch")
        .add_header(name, value)
        .json(&json!({ "tenant_id": "t-9" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);

    assert!(app.audit.entries().iter().all(|e| e.action != "tenant.switch"));
}

#[tokio::test]
async fn test_enrolled_bootstrap_admin_reaches_analytics() {
    let app = setup_test_app(&[("bootstrap-admin", "admin@clinic.test")]);
    let user = BootstrapUser {
        user_id: "bootstrap-admin".into(),
        email: "admin@clinic.test".into(),
        password: PASSWORD.into(),
        tenant_code: Some("main".into()),
        tenant_name: Some("Main Street Dental".into()),
    };
    let membership = user.membership().expect("tenant code set");
    app.memberships.enroll(&user.user_id, &membership).await.unwrap();

    let body = login(&app, "admin@clinic.test").await;
    assert_eq!(body["tenant"]["current_tenant"]["name"], "Main Street Dental");
    assert_eq!(body["tenant"]["role"], "admin");

    let (name, value) = bearer(body["token"].as_str().unwrap());
    let response = app
        .server
        .get("/api/analytics/treatment-mix")
        .add_header(name, value)
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>()["treatments"], json!([]));
}

#[tokio::test]
async fn test_colliding_tenant_codes_expose_one_clinic() {
    let app = setup_test_app(&[("u-1", "owner@example.com")]);
    app.memberships.add("u-1", membership("t-1", "acme", "admin"));
    app.memberships.add("u-1", membership("t-2", "ACME", "admin"));
    let token = login_token(&app, "owner@example.com").await;
    let (name, value) = bearer(&token);

    let view = app
        .server
        .get("/api/tenants/current")
        .add_header(name.clone(), value.clone())
        .await
        .json::<Value>();
    assert_eq!(view["tenants"].as_array().unwrap().len(), 1);
    assert_eq!(view["can_switch_tenants"], false);

    let response = app
        .server
        .post("/api/tenants/switch")
        .add_header(name, value)
        .json(&json!({ "tenant_id": "t-2" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
}
