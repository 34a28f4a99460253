//! Per-category tallies (staff performance, treatment mix).
//!
//! Records without a usable category key are counted under a fallback key,
//! never dropped.

use crate::domain::records::{Appointment, AppointmentStatus};
use serde::Serialize;
use std::collections::HashMap;

pub const UNASSIGNED_STAFF: &str = "unassigned";
pub const UNSPECIFIED_TREATMENT: &str = "Unspecified";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StaffPerformance {
    pub staff_id: String,
    pub completed: u64,
    pub cancelled: u64,
    pub scheduled: u64,
    pub total: u64,
}

impl StaffPerformance {
    fn tally(&mut self, status: AppointmentStatus) {
        match status {
            AppointmentStatus::Completed => self.completed += 1,
            AppointmentStatus::Cancelled => self.cancelled += 1,
            AppointmentStatus::Scheduled => self.scheduled += 1,
        }
        self.total += 1;
    }
}

fn category_key<'a>(raw: Option<&'a str>, fallback: &'a str) -> &'a str {
    raw.map(str::trim).filter(|k| !k.is_empty()).unwrap_or(fallback)
}

/// Counts records per key in first-occurrence order.
pub fn count_by<T, K>(records: &[T], key_of: K, fallback: &str) -> Vec<CategoryCount>
where
    K: Fn(&T) -> Option<&str>,
{
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut counts: Vec<CategoryCount> = Vec::new();
    for record in records {
        let key = category_key(key_of(record), fallback);
        match index.get(key) {
            Some(&i) => counts[i].count += 1,
            None => {
                index.insert(key.to_string(), counts.len());
                counts.push(CategoryCount {
                    category: key.to_string(),
                    count: 1,
                });
            }
        }
    }
    counts
}

/// Status tallies per dentist, busiest first. Ties keep first-occurrence order.
pub fn staff_performance(appointments: &[Appointment]) -> Vec<StaffPerformance> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut rows: Vec<StaffPerformance> = Vec::new();
    for appointment in appointments {
        let key = category_key(appointment.dentist_id.as_deref(), UNASSIGNED_STAFF);
        let i = match index.get(key) {
            Some(&i) => i,
            None => {
                index.insert(key.to_string(), rows.len());
                rows.push(StaffPerformance {
                    staff_id: key.to_string(),
                    ..Default::default()
                });
                rows.len() - 1
            }
        };
        rows[i].tally(appointment.status_kind());
    }
    // sort_by is stable
    rows.sort_by(|a, b| b.total.cmp(&a.total));
    rows
}

pub fn treatment_mix(appointments: &[Appointment]) -> Vec<CategoryCount> {
    count_by(
        appointments,
        |a| a.treatment_type.as_deref(),
        UNSPECIFIED_TREATMENT,
    )
}
