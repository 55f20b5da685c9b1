use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{ReportError, ReportResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Present,
    Absent,
}

impl Status {
    /// Status values are a closed set; matching is exact.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "present" => Some(Status::Present),
            "absent" => Some(Status::Absent),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Present => "present",
            Status::Absent => "absent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub roll_number: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceEvent {
    pub roll_number: String,
    pub subject_name: Option<String>,
    pub recorded_at: NaiveDateTime,
    pub status: Status,
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if leap => 29,
        2 => 28,
        _ => 30,
    }
}

/// Column dimension of a report. Column indices are the axis keys used by the
/// indexer and the statistics pass.
#[derive(Debug, Clone)]
pub enum ReportAxis {
    Daily {
        year: i32,
        month: u32,
        days: u32,
    },
    Subject {
        labels: Vec<String>,
        lookup: HashMap<String, usize>,
    },
}

impl ReportAxis {
    pub fn daily(year: i32, month: u32) -> ReportResult<Self> {
        if !(1..=12).contains(&month) {
            return Err(ReportError::InvalidRange(format!(
                "month must be between 1 and 12, got {month}"
            )));
        }
        Ok(ReportAxis::Daily {
            year,
            month,
            days: days_in_month(year, month),
        })
    }

    pub fn daily_for(date: NaiveDate) -> Self {
        ReportAxis::Daily {
            year: date.year(),
            month: date.month(),
            days: days_in_month(date.year(), date.month()),
        }
    }

    /// Builds a subject axis. Names are folded case-insensitively (first
    /// spelling wins) and sorted so column order does not depend on input order.
    pub fn subjects<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen: HashMap<String, String> = HashMap::new();
        for n in names {
            let t = n.as_ref().trim();
            if t.is_empty() {
                continue;
            }
            seen.entry(t.to_lowercase()).or_insert_with(|| t.to_string());
        }
        let mut folded: Vec<(String, String)> = seen.into_iter().collect();
        folded.sort_by(|a, b| a.0.cmp(&b.0));

        let mut labels = Vec::with_capacity(folded.len());
        let mut lookup = HashMap::with_capacity(folded.len());
        for (idx, (key, label)) in folded.into_iter().enumerate() {
            lookup.insert(key, idx);
            labels.push(label);
        }
        ReportAxis::Subject { labels, lookup }
    }

    pub fn column_count(&self) -> usize {
        match self {
            ReportAxis::Daily { days, .. } => *days as usize,
            ReportAxis::Subject { labels, .. } => labels.len(),
        }
    }

    pub fn labels(&self) -> Vec<String> {
        match self {
            ReportAxis::Daily { days, .. } => (1..=*days).map(|d| d.to_string()).collect(),
            ReportAxis::Subject { labels, .. } => labels.clone(),
        }
    }

    pub fn is_daily(&self) -> bool {
        matches!(self, ReportAxis::Daily { .. })
    }

    /// Column an event lands in, or `None` when the event falls outside the axis.
    pub fn column_for(&self, event: &AttendanceEvent) -> Option<usize> {
        match self {
            ReportAxis::Daily { year, month, days } => {
                let d = event.recorded_at.date();
                if d.year() != *year || d.month() != *month || d.day() > *days {
                    return None;
                }
                Some(d.day() as usize - 1)
            }
            ReportAxis::Subject { lookup, .. } => {
                let name = event.subject_name.as_deref()?.trim().to_lowercase();
                lookup.get(&name).copied()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CellState {
    Present,
    Absent,
    Unmarked,
}

impl From<Option<Status>> for CellState {
    fn from(s: Option<Status>) -> Self {
        match s {
            Some(Status::Present) => CellState::Present,
            Some(Status::Absent) => CellState::Absent,
            None => CellState::Unmarked,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellStat {
    pub present: u32,
    pub absent: u32,
    pub percentage: f64,
}

impl CellStat {
    pub fn marked(&self) -> u32 {
        self.present + self.absent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    pub state: CellState,
    pub stat: CellStat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub roll_number: String,
    pub display_name: String,
    pub cells: Vec<Cell>,
    /// Row-level totals. For the subject axis `percentage` is the average
    /// across marked subjects rather than the pooled ratio.
    pub total: CellStat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total_students: usize,
    pub total_columns: usize,
    pub overall_average_percentage: f64,
    /// Class-wide present/absent per column, in axis order.
    pub column_totals: Vec<CellStat>,
}
