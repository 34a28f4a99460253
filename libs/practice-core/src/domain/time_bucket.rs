//! Groups dated records into daily, weekly or monthly buckets for trend charts.
//!
//! Only observed buckets are emitted; there is no zero-filling. Output is sorted
//! ascending by bucket start, which matches the lexicographic order of the
//! `YYYY-MM-DD` keys.

use crate::CoreError;
use crate::domain::records::{Appointment, Invoice};
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl Granularity {
    /// First calendar day of the bucket containing `date`.
    /// Weeks start on Monday (ISO 8601).
    pub fn bucket_start(self, date: NaiveDate) -> NaiveDate {
        match self {
            Granularity::Daily => date,
            Granularity::Weekly => {
                date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
            }
            Granularity::Monthly => date.with_day(1).unwrap_or(date),
        }
    }

    pub fn bucket_key(self, date: NaiveDate) -> String {
        self.bucket_start(date).format("%Y-%m-%d").to_string()
    }
}

impl FromStr for Granularity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Granularity::Daily),
            "weekly" => Ok(Granularity::Weekly),
            "monthly" => Ok(Granularity::Monthly),
            other => Err(CoreError::Validation(format!(
                "Unknown granularity '{}', expected daily, weekly or monthly",
                other
            ))),
        }
    }
}

/// Anything that can be placed on the calendar.
pub trait Timestamped {
    fn occurred_on(&self) -> Option<NaiveDate>;
}

impl Timestamped for Appointment {
    fn occurred_on(&self) -> Option<NaiveDate> {
        self.appointment_date
    }
}

impl Timestamped for Invoice {
    fn occurred_on(&self) -> Option<NaiveDate> {
        self.issued_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint<V> {
    pub bucket: String,
    pub value: V,
}

fn fold_buckets<T, V, F>(records: &[T], granularity: Granularity, mut fold: F) -> Vec<SeriesPoint<V>>
where
    T: Timestamped,
    V: Default,
    F: FnMut(&mut V, &T),
{
    let mut buckets: BTreeMap<NaiveDate, V> = BTreeMap::new();
    for record in records {
        // Undated records are skipped, not an error.
        let Some(date) = record.occurred_on() else {
            continue;
        };
        let slot = buckets.entry(granularity.bucket_start(date)).or_default();
        fold(slot, record);
    }
    buckets
        .into_iter()
        .map(|(start, value)| SeriesPoint {
            bucket: start.format("%Y-%m-%d").to_string(),
            value,
        })
        .collect()
}

/// One point per observed bucket with the number of records in it.
pub fn count_series<T: Timestamped>(records: &[T], granularity: Granularity) -> Vec<SeriesPoint<u64>> {
    fold_buckets(records, granularity, |count: &mut u64, _| *count += 1)
}

/// One point per observed bucket with the sum of `value_of`; non-finite values count as zero.
pub fn sum_series<T, F>(records: &[T], granularity: Granularity, value_of: F) -> Vec<SeriesPoint<f64>>
where
    T: Timestamped,
    F: Fn(&T) -> f64,
{
    fold_buckets(records, granularity, |sum: &mut f64, record| {
        let value = value_of(record);
        if value.is_finite() {
            *sum += value;
        }
    })
}

pub fn appointment_trend(appointments: &[Appointment], granularity: Granularity) -> Vec<SeriesPoint<u64>> {
    count_series(appointments, granularity)
}

pub fn revenue_trend(invoices: &[Invoice], granularity: Granularity) -> Vec<SeriesPoint<f64>> {
    sum_series(invoices, granularity, |invoice| invoice.total)
}
