use crate::db;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::{AttendanceEvent, Status};
use chrono::{Local, NaiveDateTime};
use rusqlite::Connection;
use serde_json::json;
use tracing::info;

/// Offset timestamps are converted to server local time, which report
/// windows are anchored to. Naive timestamps are taken as local already.
fn parse_recorded_at(raw: &str) -> Option<NaiveDateTime> {
    let t = raw.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(t) {
        return Some(dt.with_timezone(&Local).naive_local());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(t, f).ok())
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(t, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn parse_event(idx: usize, v: &serde_json::Value) -> Result<AttendanceEvent, HandlerErr> {
    let bad = |message: &str| HandlerErr {
        code: "bad_params",
        message: message.to_string(),
        details: Some(json!({ "index": idx })),
    };
    let roll_number = v
        .get("rollNumber")
        .and_then(|x| x.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| bad("event rollNumber is required"))?;
    let subject_name = match v.get("subjectName") {
        None => None,
        Some(x) if x.is_null() => None,
        Some(x) => Some(
            x.as_str()
                .ok_or_else(|| bad("event subjectName must be string or null"))?
                .trim()
                .to_string(),
        )
        .filter(|s| !s.is_empty()),
    };
    let recorded_at = v
        .get("recordedAt")
        .and_then(|x| x.as_str())
        .and_then(parse_recorded_at)
        .ok_or_else(|| bad("event recordedAt must be an ISO-8601 timestamp"))?;
    let status = v
        .get("status")
        .and_then(|x| x.as_str())
        .and_then(Status::parse)
        .ok_or_else(|| bad("event status must be present or absent"))?;
    Ok(AttendanceEvent {
        roll_number: roll_number.to_string(),
        subject_name,
        recorded_at,
        status,
    })
}

fn attendance_record(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let Some(raw) = params.get("events").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "missing events"));
    };
    let events = raw
        .iter()
        .enumerate()
        .map(|(i, v)| parse_event(i, v))
        .collect::<Result<Vec<_>, _>>()?;
    let summary = db::record_events(conn, &events)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    info!(
        inserted = summary.inserted,
        duplicates = summary.duplicates,
        "attendance recorded"
    );
    Ok(json!({
        "inserted": summary.inserted,
        "duplicates": summary.duplicates
    }))
}

fn handle_attendance_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_record(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.record" => Some(handle_attendance_record(state, req)),
        _ => None,
    }
}
