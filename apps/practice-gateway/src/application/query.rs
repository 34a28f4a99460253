use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
};
use chrono::NaiveDate;
use practice_core::RecordQuery;
use practice_core::domain::{
    categorical::{CategoryCount, StaffPerformance, staff_performance, treatment_mix},
    failed_login::LockStatus,
    kpi::{APPOINTMENTS_TABLE, INVOICES_TABLE, utc_day_bounds},
    records::{
        APPOINTMENT_DATE_FIELD, Appointment, INVOICE_DATE_FIELD, Ingested, ingest_appointments,
        ingest_invoices,
    },
    tenant::{TenantSession, TenantSessionView},
    time_bucket::{Granularity, SeriesPoint, appointment_trend, revenue_trend},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::middleware::SessionContext;
use crate::{AppState, map_core_error};

// Bounds used when only one side of the range is given.
const EARLIEST_DAY: (i32, u32, u32) = (1900, 1, 1);
const LATEST_DAY: (i32, u32, u32) = (9999, 12, 31);

/// `from` and `to` are inclusive calendar days.
#[derive(Debug, Default, Deserialize)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct TrendParams {
    #[serde(default)]
    pub granularity: Granularity,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl TrendParams {
    fn range(&self) -> DateRange {
        DateRange {
            from: self.from,
            to: self.to,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SeriesResponse<V> {
    pub granularity: Granularity,
    pub series: Vec<SeriesPoint<V>>,
    pub quarantined: usize,
}

#[derive(Debug, Serialize)]
pub struct StaffPerformanceResponse {
    pub staff: Vec<StaffPerformance>,
    pub quarantined: usize,
}

#[derive(Debug, Serialize)]
pub struct TreatmentMixResponse {
    pub treatments: Vec<CategoryCount>,
    pub quarantined: usize,
}

#[derive(Debug, Deserialize)]
pub struct LockStatusParams {
    pub email: String,
}

fn day_or(value: Option<NaiveDate>, fallback: (i32, u32, u32), edge: NaiveDate) -> NaiveDate {
    value.unwrap_or_else(|| {
        NaiveDate::from_ymd_opt(fallback.0, fallback.1, fallback.2).unwrap_or(edge)
    })
}

/// Applies the inclusive day range as a half-open UTC interval on `field`.
pub fn apply_range(
    query: RecordQuery,
    field: &str,
    range: &DateRange,
) -> Result<RecordQuery, StatusCode> {
    if range.from.is_none() && range.to.is_none() {
        return Ok(query);
    }
    let from = day_or(range.from, EARLIEST_DAY, NaiveDate::MIN);
    let to = day_or(range.to, LATEST_DAY, NaiveDate::MAX);
    if from > to {
        warn!("Rejected analytics range: {} is after {}", from, to);
        return Err(StatusCode::BAD_REQUEST);
    }
    let (start, _) = utc_day_bounds(from);
    let (_, end) = utc_day_bounds(to);
    Ok(query.within(field, start, end))
}

fn provisioned_session(ctx: &SessionContext) -> Result<TenantSession, StatusCode> {
    let session = ctx.session.tenants.snapshot();
    if !session.is_provisioned() {
        warn!("User {} has no provisioned clinic", ctx.user.user_id);
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(session)
}

async fn load_appointments(
    state: &AppState,
    ctx: &SessionContext,
    range: &DateRange,
) -> Result<Ingested<Appointment>, StatusCode> {
    let session = provisioned_session(ctx)?;
    let relation = session.relation(APPOINTMENTS_TABLE, state.scope);
    let query = apply_range(RecordQuery::new(relation), APPOINTMENT_DATE_FIELD, range)?;
    debug!("Loading appointments from {}", query.relation.qualified());
    let rows = state.records.fetch(&query).await.map_err(map_core_error)?;
    Ok(ingest_appointments(&rows))
}

// GET /api/tenants/current
pub async fn handle_current_tenant(
    Extension(ctx): Extension<SessionContext>,
) -> Json<TenantSessionView> {
    Json(ctx.session.tenants.snapshot().view())
}

// GET /api/analytics/appointments
pub async fn handle_appointment_trend(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    Query(params): Query<TrendParams>,
) -> Result<Json<SeriesResponse<u64>>, StatusCode> {
    let appointments = load_appointments(&state, &ctx, &params.range()).await?;
    Ok(Json(SeriesResponse {
        granularity: params.granularity,
        series: appointment_trend(&appointments.records, params.granularity),
        quarantined: appointments.quarantined,
    }))
}

// GET /api/analytics/revenue
pub async fn handle_revenue_trend(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    Query(params): Query<TrendParams>,
) -> Result<Json<SeriesResponse<f64>>, StatusCode> {
    let session = provisioned_session(&ctx)?;
    let relation = session.relation(INVOICES_TABLE, state.scope);
    let query = apply_range(RecordQuery::new(relation), INVOICE_DATE_FIELD, &params.range())?;
    let rows = state.records.fetch(&query).await.map_err(map_core_error)?;
    let invoices = ingest_invoices(&rows);
    Ok(Json(SeriesResponse {
        granularity: params.granularity,
        series: revenue_trend(&invoices.records, params.granularity),
        quarantined: invoices.quarantined,
    }))
}

// GET /api/analytics/staff-performance
pub async fn handle_staff_performance(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    Query(range): Query<DateRange>,
) -> Result<Json<StaffPerformanceResponse>, StatusCode> {
    let appointments = load_appointments(&state, &ctx, &range).await?;
    Ok(Json(StaffPerformanceResponse {
        staff: staff_performance(&appointments.records),
        quarantined: appointments.quarantined,
    }))
}

// GET /api/analytics/treatment-mix
pub async fn handle_treatment_mix(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    Query(range): Query<DateRange>,
) -> Result<Json<TreatmentMixResponse>, StatusCode> {
    let appointments = load_appointments(&state, &ctx, &range).await?;
    Ok(Json(TreatmentMixResponse {
        treatments: treatment_mix(&appointments.records),
        quarantined: appointments.quarantined,
    }))
}

// GET /api/security/lock-status?email=
pub async fn handle_lock_status(
    State(state): State<AppState>,
    Query(params): Query<LockStatusParams>,
) -> Result<Json<LockStatus>, StatusCode> {
    if params.email.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(Json(state.failed_logins.lock_status(&params.email).await))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use practice_core::domain::tenant::ScopedRelation;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_apply_range_is_inclusive_of_last_day() {
        let range = DateRange {
            from: Some(date(2024, 3, 1)),
            to: Some(date(2024, 3, 31)),
        };
        let query = apply_range(
            RecordQuery::new(ScopedRelation::public("appointments")),
            APPOINTMENT_DATE_FIELD,
            &range,
        )
        .unwrap();
        let window = query.time_range.unwrap();
        assert_eq!(window.field, APPOINTMENT_DATE_FIELD);
        assert_eq!(window.start, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_apply_range_open_ended_and_inverted() {
        let base = RecordQuery::new(ScopedRelation::public("invoices"));
        assert!(
            apply_range(base.clone(), INVOICE_DATE_FIELD, &DateRange::default())
                .unwrap()
                .time_range
                .is_none()
        );

        let since = DateRange {
            from: Some(date(2024, 1, 1)),
            to: None,
        };
        let window = apply_range(base.clone(), INVOICE_DATE_FIELD, &since)
            .unwrap()
            .time_range
            .unwrap();
        assert_eq!(window.end, Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap());

        let inverted = DateRange {
            from: Some(date(2024, 2, 1)),
            to: Some(date(2024, 1, 1)),
        };
        assert_eq!(
            apply_range(base, INVOICE_DATE_FIELD, &inverted).unwrap_err(),
            StatusCode::BAD_REQUEST
        );
    }
}
