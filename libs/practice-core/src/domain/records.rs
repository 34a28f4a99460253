//! Typed boundary for rows coming out of the record store.
//!
//! Rows arrive as loose JSON objects. They are converted once, here, into
//! [`Appointment`] and [`Invoice`]; rows that cannot be trusted are quarantined
//! instead of being carried into the aggregators.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

/// A raw row as returned by the record store.
pub type RawRecord = Map<String, Value>;

pub const APPOINTMENT_DATE_FIELD: &str = "appointment_date";
pub const INVOICE_DATE_FIELD: &str = "issued_at";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("Unparseable date in field '{field}': {value}")]
    InvalidDate { field: &'static str, value: String },
    #[error("Field '{field}' has an unexpected type")]
    InvalidField { field: &'static str },
}

/// Status bucket used by the staff and KPI aggregations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Completed,
    Cancelled,
    Scheduled,
}

impl AppointmentStatus {
    /// `completed` and `cancelled`/`no_show` are matched case-insensitively;
    /// everything else, including a missing status, counts as scheduled.
    pub fn classify(status: Option<&str>) -> Self {
        match status.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("completed") => AppointmentStatus::Completed,
            Some("cancelled") | Some("no_show") => AppointmentStatus::Cancelled,
            _ => AppointmentStatus::Scheduled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Appointment {
    pub id: Option<String>,
    pub appointment_date: Option<NaiveDate>,
    pub status: Option<String>,
    pub treatment_type: Option<String>,
    pub dentist_id: Option<String>,
}

impl Appointment {
    pub fn from_raw(row: &RawRecord) -> Result<Self, RecordError> {
        Ok(Self {
            id: text_field(row, "id")?,
            appointment_date: date_field(row, APPOINTMENT_DATE_FIELD)?,
            status: text_field(row, "status")?,
            treatment_type: text_field(row, "treatment_type")?,
            dentist_id: text_field(row, "dentist_id")?,
        })
    }

    pub fn status_kind(&self) -> AppointmentStatus {
        AppointmentStatus::classify(self.status.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invoice {
    pub id: Option<String>,
    pub issued_at: Option<NaiveDate>,
    /// Missing or non-numeric totals are stored as zero.
    pub total: f64,
}

impl Invoice {
    pub fn from_raw(row: &RawRecord) -> Result<Self, RecordError> {
        Ok(Self {
            id: text_field(row, "id")?,
            issued_at: date_field(row, INVOICE_DATE_FIELD)?,
            total: row.get("total").map(numeric_or_zero).unwrap_or(0.0),
        })
    }
}

/// Result of validating a batch of raw rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ingested<T> {
    pub records: Vec<T>,
    pub quarantined: usize,
}

pub fn ingest_appointments(rows: &[RawRecord]) -> Ingested<Appointment> {
    ingest(rows, "appointment", Appointment::from_raw)
}

pub fn ingest_invoices(rows: &[RawRecord]) -> Ingested<Invoice> {
    ingest(rows, "invoice", Invoice::from_raw)
}

fn ingest<T>(
    rows: &[RawRecord],
    kind: &str,
    parse: impl Fn(&RawRecord) -> Result<T, RecordError>,
) -> Ingested<T> {
    let mut records = Vec::with_capacity(rows.len());
    let mut quarantined = 0;
    for row in rows {
        match parse(row) {
            Ok(record) => records.push(record),
            Err(e) => {
                quarantined += 1;
                warn!(
                    "Quarantined {} row (id: {:?}): {}",
                    kind,
                    row.get("id"),
                    e
                );
            }
        }
    }
    Ingested {
        records,
        quarantined,
    }
}

/// Parses the date formats the hosted database emits into a calendar day.
/// Offset-bearing timestamps are truncated in UTC.
pub fn parse_record_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc).date_naive());
    }
    // Postgres text output uses a short "+00" offset.
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(ts.with_timezone(&Utc).date_naive());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|ts| ts.date())
}

/// Like [`parse_record_date`] but keeps the time of day; bare dates map to midnight UTC.
pub fn parse_record_instant(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(ts.with_timezone(&Utc));
    }
    if let Some(ts) = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
    {
        return Some(ts.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(chrono::NaiveTime::MIN).and_utc())
}

fn date_field(row: &RawRecord, field: &'static str) -> Result<Option<NaiveDate>, RecordError> {
    match row.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => parse_record_date(s).map(Some).ok_or_else(|| {
            RecordError::InvalidDate {
                field,
                value: s.clone(),
            }
        }),
        Some(_) => Err(RecordError::InvalidField { field }),
    }
}

fn text_field(row: &RawRecord, field: &'static str) -> Result<Option<String>, RecordError> {
    match row.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => Err(RecordError::InvalidField { field }),
    }
}

fn numeric_or_zero(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).unwrap_or(0.0)
}
