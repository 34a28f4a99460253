//! HTTP host for the two scheduled KPI functions.
//!
//! Every response uses the same envelope: `{"success": true, ...}` on success,
//! `{"success": false, "error": "..."}` with status 500 on any failure.

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use chrono::NaiveDate;
use practice_core::domain::kpi::{DigestReport, KpiError, KpiJobs, KpiSnapshot};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

pub mod config;

#[derive(Clone)]
pub struct WorkerState {
    pub jobs: Arc<KpiJobs>,
}

#[derive(thiserror::Error, Debug)]
pub enum JobError {
    #[error("Invalid request body: {0}")]
    InvalidBody(String),
    #[error("Invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error(transparent)]
    Kpi(#[from] KpiError),
}

impl IntoResponse for JobError {
    fn into_response(self) -> Response {
        error!("KPI function failed: {}", self);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "error": self.to_string() })),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct Success<T> {
    pub success: bool,
    #[serde(flatten)]
    pub body: T,
}

impl<T> Success<T> {
    fn new(body: T) -> Json<Self> {
        Json(Self {
            success: true,
            body,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SnapshotRequest {
    pub date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DigestRequest {
    pub to: Option<String>,
    pub timezone: Option<String>,
}

/// Empty bodies (scheduler pings) mean "all defaults".
pub fn parse_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, JobError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| JobError::InvalidBody(e.to_string()))
}

fn parse_date(raw: Option<String>) -> Result<Option<NaiveDate>, JobError> {
    match raw.map(|d| d.trim().to_string()).filter(|d| !d.is_empty()) {
        Some(d) => NaiveDate::parse_from_str(&d, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| JobError::InvalidDate(d)),
        None => Ok(None),
    }
}

// POST /functions/kpi-snapshot
pub async fn handle_kpi_snapshot(
    State(state): State<WorkerState>,
    body: Bytes,
) -> Result<Json<Success<KpiSnapshot>>, JobError> {
    let request: SnapshotRequest = parse_body(&body)?;
    let target = parse_date(request.date)?;
    let snapshot = state.jobs.run_snapshot(target).await?;
    info!("kpi-snapshot completed for {}", snapshot.period);
    Ok(Success::new(snapshot))
}

// POST /functions/kpi-digest
pub async fn handle_kpi_digest(
    State(state): State<WorkerState>,
    body: Bytes,
) -> Result<Json<Success<DigestReport>>, JobError> {
    let request: DigestRequest = parse_body(&body)?;
    let report = state.jobs.run_digest(request.to, request.timezone).await?;
    info!("kpi-digest completed for {}", report.snapshot.period);
    Ok(Success::new(report))
}

pub fn create_app(state: WorkerState) -> Router {
    Router::new()
        .route("/functions/kpi-snapshot", post(handle_kpi_snapshot))
        .route("/functions/kpi-digest", post(handle_kpi_digest))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_body_defaults_on_empty() {
        let request: SnapshotRequest = parse_body(b"").unwrap();
        assert!(request.date.is_none());
        let request: DigestRequest = parse_body(b" \n").unwrap();
        assert!(request.to.is_none());

        let request: DigestRequest =
            parse_body(br#"{"to":"owner@clinic.test","timezone":"Europe/Oslo"}"#).unwrap();
        assert_eq!(request.to.as_deref(), Some("owner@clinic.test"));
        assert_eq!(request.timezone.as_deref(), Some("Europe/Oslo"));

        assert!(matches!(
            parse_body::<SnapshotRequest>(b"{not json"),
            Err(JobError::InvalidBody(_))
        ));
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date(None).unwrap(), None);
        assert_eq!(parse_date(Some("  ".into())).unwrap(), None);
        assert_eq!(
            parse_date(Some("2024-05-02".into())).unwrap(),
            NaiveDate::from_ymd_opt(2024, 5, 2)
        );
        assert!(matches!(
            parse_date(Some("02/05/2024".into())),
            Err(JobError::InvalidDate(d)) if d == "02/05/2024"
        ));
    }
}
