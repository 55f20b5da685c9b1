use chrono::{Datelike, Duration, Local, NaiveDate, NaiveDateTime};

use crate::error::{ReportError, ReportResult};
use crate::model::days_in_month;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodMode {
    Daily,
    Weekly,
    Monthly,
    Custom,
}

impl PeriodMode {
    pub fn parse(raw: &str) -> ReportResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "daily" | "day" => Ok(PeriodMode::Daily),
            "weekly" | "week" => Ok(PeriodMode::Weekly),
            "monthly" | "month" => Ok(PeriodMode::Monthly),
            "custom" => Ok(PeriodMode::Custom),
            other => Err(ReportError::InvalidRange(format!(
                "mode must be one of: daily, weekly, monthly, custom (got {other})"
            ))),
        }
    }
}

/// Resolved report period. `end` is the last instant of the terminal day
/// (23:59:59.999), so both bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeWindow {
    pub fn contains(&self, t: NaiveDateTime) -> bool {
        t >= self.start && t <= self.end
    }

    /// Upper bound for half-open `[start, end)` comparisons.
    pub fn end_exclusive(&self) -> NaiveDateTime {
        self.end + Duration::milliseconds(1)
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start.date()
    }
}

fn start_of_day(d: NaiveDate) -> ReportResult<NaiveDateTime> {
    d.and_hms_opt(0, 0, 0)
        .ok_or_else(|| ReportError::InvalidRange(format!("bad date {d}")))
}

fn end_of_day(d: NaiveDate) -> ReportResult<NaiveDateTime> {
    d.and_hms_milli_opt(23, 59, 59, 999)
        .ok_or_else(|| ReportError::InvalidRange(format!("bad date {d}")))
}

pub fn day_window(first: NaiveDate, last: NaiveDate) -> ReportResult<TimeWindow> {
    if first > last {
        return Err(ReportError::InvalidRange(format!(
            "start {first} is after end {last}"
        )));
    }
    Ok(TimeWindow {
        start: start_of_day(first)?,
        end: end_of_day(last)?,
    })
}

pub fn month_window(year: i32, month: u32) -> ReportResult<TimeWindow> {
    if !(1..=12).contains(&month) {
        return Err(ReportError::InvalidRange(
            "month must be between 01 and 12".to_string(),
        ));
    }
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| ReportError::InvalidRange(format!("bad month {year}-{month:02}")))?;
    let last = NaiveDate::from_ymd_opt(year, month, days_in_month(year, month))
        .ok_or_else(|| ReportError::InvalidRange(format!("bad month {year}-{month:02}")))?;
    day_window(first, last)
}

/// Turns a logical period into a concrete window anchored at `now`.
/// `custom` requires both bounds; the other modes ignore them.
pub fn resolve_window(
    mode: PeriodMode,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    now: NaiveDateTime,
) -> ReportResult<TimeWindow> {
    let today = now.date();
    match mode {
        PeriodMode::Daily => day_window(today, today),
        PeriodMode::Weekly => {
            let monday = today - Duration::days(today.weekday().num_days_from_monday() as i64);
            day_window(monday, monday + Duration::days(6))
        }
        PeriodMode::Monthly => month_window(today.year(), today.month()),
        PeriodMode::Custom => {
            let (Some(s), Some(e)) = (start, end) else {
                return Err(ReportError::InvalidRange(
                    "custom period requires startDate and endDate".to_string(),
                ));
            };
            day_window(s, e)
        }
    }
}

pub fn resolve_window_now(
    mode: PeriodMode,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> ReportResult<TimeWindow> {
    resolve_window(mode, start, end, Local::now().naive_local())
}

/// Accepts `YYYY-MM-DD`, or a longer timestamp whose first ten chars are one.
pub fn parse_date(raw: &str) -> ReportResult<NaiveDate> {
    let t = raw.trim();
    let head = t.get(..10).unwrap_or(t);
    NaiveDate::parse_from_str(head, "%Y-%m-%d")
        .map_err(|_| ReportError::InvalidRange(format!("date must be YYYY-MM-DD, got {t}")))
}

pub fn parse_month_key(month: &str) -> ReportResult<(i32, u32)> {
    let t = month.trim();
    let Some((y, m)) = t.split_once('-') else {
        return Err(ReportError::InvalidRange(
            "month must be YYYY-MM".to_string(),
        ));
    };
    let year = y
        .parse::<i32>()
        .map_err(|_| ReportError::InvalidRange("month year must be numeric".to_string()))?;
    let month_num = m
        .parse::<u32>()
        .map_err(|_| ReportError::InvalidRange("month must be YYYY-MM".to_string()))?;
    if !(1..=12).contains(&month_num) {
        return Err(ReportError::InvalidRange(
            "month must be between 01 and 12".to_string(),
        ));
    }
    Ok((year, month_num))
}
