//! Daily KPI snapshot and the KPI e-mail digest.
//!
//! Both jobs run sequentially: fetch, aggregate, then write or send. Snapshot
//! rows are inserted one at a time and a failure part-way through leaves the
//! earlier rows in place.

use crate::domain::records::{
    APPOINTMENT_DATE_FIELD, Appointment, AppointmentStatus, INVOICE_DATE_FIELD, Invoice,
    ingest_appointments, ingest_invoices,
};
use crate::domain::tenant::ScopedRelation;
use crate::{CoreError, KpiStore, Notifier, OutboundMessage, RecordQuery, RecordStore};
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

pub const DAILY_REVENUE_TOTAL: &str = "daily_revenue_total";
pub const DAILY_INVOICES_COUNT: &str = "daily_invoices_count";
pub const APPOINTMENTS_TODAY: &str = "appointments_today";
pub const APPOINTMENTS_COMPLETED_TODAY: &str = "appointments_completed_today";

pub const INVOICES_TABLE: &str = "invoices";
pub const APPOINTMENTS_TABLE: &str = "appointments";

pub const DEFAULT_TIMEZONE_LABEL: &str = "UTC";

#[derive(thiserror::Error, Debug)]
pub enum KpiError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("No digest recipient configured")]
    MissingRecipient,
}

/// Half-open UTC bounds `[start, end)` of `date`.
pub fn utc_day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = date.and_time(chrono::NaiveTime::MIN).and_utc();
    (start, start + chrono::Duration::days(1))
}

pub fn previous_utc_day(now: DateTime<Utc>) -> NaiveDate {
    let today = now.date_naive();
    today.checked_sub_days(Days::new(1)).unwrap_or(today)
}

/// One persisted metric value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    pub metric_name: String,
    pub metric_value: f64,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiSnapshot {
    #[serde(rename = "date")]
    pub period: NaiveDate,
    pub daily_revenue_total: f64,
    pub daily_invoices_count: u64,
    pub appointments_today: u64,
    pub appointments_completed_today: u64,
    /// Rows excluded at ingestion.
    pub quarantined: usize,
}

impl KpiSnapshot {
    pub fn compute(period: NaiveDate, invoices: &[Invoice], appointments: &[Appointment]) -> Self {
        let daily_revenue_total = invoices
            .iter()
            .map(|i| i.total)
            .filter(|t| t.is_finite())
            .sum();
        let appointments_completed_today = appointments
            .iter()
            .filter(|a| a.status_kind() == AppointmentStatus::Completed)
            .count() as u64;
        Self {
            period,
            daily_revenue_total,
            daily_invoices_count: invoices.len() as u64,
            appointments_today: appointments.len() as u64,
            appointments_completed_today,
            quarantined: 0,
        }
    }

    pub fn metric_rows(&self) -> Vec<MetricRow> {
        [
            (DAILY_REVENUE_TOTAL, self.daily_revenue_total),
            (DAILY_INVOICES_COUNT, self.daily_invoices_count as f64),
            (APPOINTMENTS_TODAY, self.appointments_today as f64),
            (
                APPOINTMENTS_COMPLETED_TODAY,
                self.appointments_completed_today as f64,
            ),
        ]
        .into_iter()
        .map(|(name, value)| MetricRow {
            metric_name: name.to_string(),
            metric_value: value,
            period_start: self.period,
            period_end: self.period,
        })
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestConfig {
    pub from: String,
    pub default_recipient: Option<String>,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            from: "KPI Digest <kpi@practice.local>".to_string(),
            default_recipient: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DigestReport {
    pub recipient: String,
    pub timezone: String,
    #[serde(flatten)]
    pub snapshot: KpiSnapshot,
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn digest_subject(snapshot: &KpiSnapshot) -> String {
    format!("Daily KPI Digest - {}", snapshot.period.format("%Y-%m-%d"))
}

/// The timezone is a label only; the figures always cover the UTC day.
pub fn render_digest_html(snapshot: &KpiSnapshot, timezone: &str) -> String {
    format!(
        concat!(
            "<html><body style=\"font-family: Arial, sans-serif;\">",
            "<h2>Daily KPI Digest</h2>",
            "<p>Period: {date} ({tz})</p>",
            "<table cellpadding=\"6\" style=\"border-collapse: collapse;\">",
            "<tr><td>Revenue</td><td><strong>${revenue:.2}</strong></td></tr>",
            "<tr><td>Invoices issued</td><td><strong>{invoices}</strong></td></tr>",
            "<tr><td>Appointments</td><td><strong>{appointments}</strong></td></tr>",
            "<tr><td>Completed appointments</td><td><strong>{completed}</strong></td></tr>",
            "</table>",
            "</body></html>"
        ),
        date = snapshot.period.format("%Y-%m-%d"),
        tz = escape_html(timezone),
        revenue = snapshot.daily_revenue_total,
        invoices = snapshot.daily_invoices_count,
        appointments = snapshot.appointments_today,
        completed = snapshot.appointments_completed_today,
    )
}

/// The two scheduled jobs over the practice-wide tables.
pub struct KpiJobs {
    records: Arc<dyn RecordStore>,
    kpis: Arc<dyn KpiStore>,
    notifier: Arc<dyn Notifier>,
    digest: DigestConfig,
}

impl KpiJobs {
    pub fn new(
        records: Arc<dyn RecordStore>,
        kpis: Arc<dyn KpiStore>,
        notifier: Arc<dyn Notifier>,
        digest: DigestConfig,
    ) -> Self {
        Self {
            records,
            kpis,
            notifier,
            digest,
        }
    }

    async fn compute_for(&self, day: NaiveDate) -> Result<KpiSnapshot, CoreError> {
        let (start, end) = utc_day_bounds(day);

        let invoice_rows = self
            .records
            .fetch(
                &RecordQuery::new(ScopedRelation::public(INVOICES_TABLE))
                    .within(INVOICE_DATE_FIELD, start, end),
            )
            .await?;
        let appointment_rows = self
            .records
            .fetch(
                &RecordQuery::new(ScopedRelation::public(APPOINTMENTS_TABLE))
                    .within(APPOINTMENT_DATE_FIELD, start, end),
            )
            .await?;

        let invoices = ingest_invoices(&invoice_rows);
        let appointments = ingest_appointments(&appointment_rows);
        let quarantined = invoices.quarantined + appointments.quarantined;
        if quarantined > 0 {
            warn!("{} row(s) quarantined while computing KPIs for {}", quarantined, day);
        }

        let mut snapshot = KpiSnapshot::compute(day, &invoices.records, &appointments.records);
        snapshot.quarantined = quarantined;
        Ok(snapshot)
    }

    /// Computes the metrics for `target` (default: today, UTC) and stores one row per metric.
    pub async fn run_snapshot(&self, target: Option<NaiveDate>) -> Result<KpiSnapshot, KpiError> {
        let day = target.unwrap_or_else(|| Utc::now().date_naive());
        let snapshot = self.compute_for(day).await?;

        for row in snapshot.metric_rows() {
            self.kpis.insert_metric(&row).await?;
        }

        info!(
            "Stored KPI snapshot for {}: revenue {:.2}, {} invoice(s), {} appointment(s), {} completed",
            day,
            snapshot.daily_revenue_total,
            snapshot.daily_invoices_count,
            snapshot.appointments_today,
            snapshot.appointments_completed_today
        );
        Ok(snapshot)
    }

    /// Mails the previous UTC day's metrics to `recipient`, or the configured default.
    pub async fn run_digest(
        &self,
        recipient: Option<String>,
        timezone: Option<String>,
    ) -> Result<DigestReport, KpiError> {
        let recipient = recipient
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .or_else(|| self.digest.default_recipient.clone())
            .ok_or(KpiError::MissingRecipient)?;
        let timezone = timezone
            .map(|tz| tz.trim().to_string())
            .filter(|tz| !tz.is_empty())
            .unwrap_or_else(|| DEFAULT_TIMEZONE_LABEL.to_string());

        let day = previous_utc_day(Utc::now());
        let snapshot = self.compute_for(day).await?;

        let message = OutboundMessage {
            from: self.digest.from.clone(),
            to: vec![recipient.clone()],
            subject: digest_subject(&snapshot),
            html: render_digest_html(&snapshot, &timezone),
        };
        self.notifier.send(&message).await?;

        info!("Sent KPI digest for {} to {}", day, recipient);
        Ok(DigestReport {
            recipient,
            timezone,
            snapshot,
        })
    }
}
