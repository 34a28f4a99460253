use axum_test::TestServer;
use chrono::{Days, Utc};
use http::StatusCode;
use kpi_worker::{WorkerState, create_app};
use practice_core::{
    adapters::{
        in_memory_logs::InMemoryKpiStore, in_memory_outbound::InMemoryNotifier,
        in_memory_records::InMemoryRecordStore,
    },
    domain::kpi::{DigestConfig, KpiJobs},
    domain::tenant::ScopedRelation,
};
use serde_json::{Value, json};
use std::sync::Arc;

struct TestWorker {
    server: TestServer,
    records: InMemoryRecordStore,
    kpis: InMemoryKpiStore,
    outbox: InMemoryNotifier,
}

fn setup_worker(default_recipient: Option<&str>) -> TestWorker {
    let records = InMemoryRecordStore::default();
    let kpis = InMemoryKpiStore::default();
    let outbox = InMemoryNotifier::default();
    let jobs = KpiJobs::new(
        Arc::new(records.clone()),
        Arc::new(kpis.clone()),
        Arc::new(outbox.clone()),
        DigestConfig {
            from: "KPI Digest <kpi@clinic.test>".into(),
            default_recipient: default_recipient.map(String::from),
        },
    );
    let server = TestServer::new(create_app(WorkerState {
        jobs: Arc::new(jobs),
    }))
    .expect("Failed to create TestServer");
    TestWorker {
        server,
        records,
        kpis,
        outbox,
    }
}

fn seed_day(worker: &TestWorker, day: &str) {
    worker.records.seed(
        &ScopedRelation::public("invoices"),
        vec![
            json!({ "id": "i1", "issued_at": format!("{}T09:15:00Z", day), "total": 150.25 }),
            json!({ "id": "i2", "issued_at": format!("{}T16:40:00Z", day), "total": "49.75" }),
            json!({ "id": "i3", "issued_at": "1999-01-01T12:00:00Z", "total": 1000 }),
        ],
    );
    worker.records.seed(
        &ScopedRelation::public("appointments"),
        vec![
            json!({ "id": "a1", "appointment_date": day, "status": "completed" }),
            json!({ "id": "a2", "appointment_date": day, "status": "scheduled" }),
            json!({ "id": "a3", "appointment_date": "1999-01-01", "status": "completed" }),
        ],
    );
}

#[tokio::test]
async fn test_snapshot_for_explicit_date() {
    let worker = setup_worker(None);
    seed_day(&worker, "2024-05-02");

    let response = worker
        .server
        .post("/functions/kpi-snapshot")
        .json(&json!({ "date": "2024-05-02" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(
        response.json::<Value>(),
        json!({
            "success": true,
            "date": "2024-05-02",
            "daily_revenue_total": 200.0,
            "daily_invoices_count": 2,
            "appointments_today": 2,
            "appointments_completed_today": 1,
            "quarantined": 0
        })
    );

    let rows = worker.kpis.rows();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0].metric_name, "daily_revenue_total");
    assert_eq!(rows[0].metric_value, 200.0);
    assert!(rows.iter().all(|r| r.period_start.to_string() == "2024-05-02"));
}

#[tokio::test]
async fn test_snapshot_defaults_to_today_with_empty_body() {
    let worker = setup_worker(None);
    let today = Utc::now().date_naive().to_string();

    let response = worker.server.post("/functions/kpi-snapshot").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body = response.json::<Value>();
    assert_eq!(body["success"], true);
    assert_eq!(body["date"], today);
    assert_eq!(body["daily_invoices_count"], 0);
    assert_eq!(worker.kpis.rows().len(), 4);
}

#[tokio::test]
async fn test_snapshot_rejects_malformed_date_with_error_envelope() {
    let worker = setup_worker(None);

    let response = worker
        .server
        .post("/functions/kpi-snapshot")
        .json(&json!({ "date": "May 2nd" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        response.json::<Value>(),
        json!({ "success": false, "error": "Invalid date 'May 2nd', expected YYYY-MM-DD" })
    );
    assert!(worker.kpis.rows().is_empty());
}

#[tokio::test]
async fn test_digest_mails_yesterday_to_requested_recipient() {
    let worker = setup_worker(Some("front-desk@clinic.test"));
    let yesterday = Utc::now()
        .date_naive()
        .checked_sub_days(Days::new(1))
        .unwrap()
        .to_string();
    seed_day(&worker, &yesterday);

    let response = worker
        .server
        .post("/functions/kpi-digest")
        .json(&json!({ "to": "owner@clinic.test", "timezone": "<Oslo>" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body = response.json::<Value>();
    assert_eq!(body["success"], true);
    assert_eq!(body["recipient"], "owner@clinic.test");
    assert_eq!(body["timezone"], "<Oslo>");
    assert_eq!(body["date"], yesterday);
    assert_eq!(body["daily_revenue_total"], 200.0);

    let sent = worker.outbox.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, vec!["owner@clinic.test".to_string()]);
    assert_eq!(sent[0].from, "KPI Digest <kpi@clinic.test>");
    assert_eq!(sent[0].subject, format!("Daily KPI Digest - {}", yesterday));
    assert!(sent[0].html.contains("&lt;Oslo&gt;"));
    assert!(!sent[0].html.contains("<Oslo>"));
    // The digest never writes snapshot rows.
    assert!(worker.kpis.rows().is_empty());
}

#[tokio::test]
async fn test_digest_uses_default_recipient_or_fails() {
    let worker = setup_worker(Some("front-desk@clinic.test"));
    let response = worker.server.post("/functions/kpi-digest").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>()["recipient"], "front-desk@clinic.test");
    assert_eq!(response.json::<Value>()["timezone"], "UTC");

    let worker = setup_worker(None);
    let response = worker
        .server
        .post("/functions/kpi-digest")
        .json(&json!({ "to": "   " }))
        .await;
    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        response.json::<Value>(),
        json!({ "success": false, "error": "No digest recipient configured" })
    );
    assert!(worker.outbox.sent().is_empty());
}
