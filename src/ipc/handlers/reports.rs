use std::path::{Path, PathBuf};

use base64::Engine;
use serde_json::json;

use crate::config::ReportConfig;
use crate::db::{self, RosterFilter};
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::handlers::students::{optional_str, roster_filter};
use crate::ipc::types::{AppState, Request};
use crate::model::{AttendanceEvent, Student};
use crate::pipeline::{self, RenderOutcome, ReportSink};
use crate::window::{self, month_window, parse_date, parse_month_key, PeriodMode, TimeWindow};

fn window_from_params(params: &serde_json::Value) -> Result<TimeWindow, HandlerErr> {
    if let Some(month) = optional_str(params, "month")? {
        let (year, m) = parse_month_key(&month)?;
        return Ok(month_window(year, m)?);
    }
    let mode = optional_str(params, "mode")?.unwrap_or_else(|| "monthly".to_string());
    let mode = PeriodMode::parse(&mode)?;
    let start = optional_str(params, "startDate")?
        .map(|s| parse_date(&s))
        .transpose()?;
    let end = optional_str(params, "endDate")?
        .map(|s| parse_date(&s))
        .transpose()?;
    Ok(window::resolve_window_now(mode, start, end)?)
}

fn window_json(w: &TimeWindow) -> serde_json::Value {
    json!({
        "start": w.start.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
        "end": w.end.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
    })
}

fn report_window(params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let w = window_from_params(params)?;
    Ok(json!({ "window": window_json(&w) }))
}

/// Roster and events come from separate read handles so the two queries can
/// run side by side on the blocking pool.
fn fetch_inputs(
    state: &AppState,
    workspace: &Path,
    filter: RosterFilter,
    window: TimeWindow,
    subject: Option<String>,
) -> Result<(Vec<Student>, Vec<AttendanceEvent>), HandlerErr> {
    let db_file = db::db_path(workspace);
    let roster_file = db_file.clone();
    let (roster, events) = state.runtime.block_on(async move {
        let roster = tokio::task::spawn_blocking(move || {
            let conn = db::open_reader(&roster_file)?;
            db::list_roster(&conn, &filter)
        });
        let events = tokio::task::spawn_blocking(move || {
            let conn = db::open_reader(&db_file)?;
            db::list_events(&conn, &window, subject.as_deref())
        });
        tokio::join!(roster, events)
    });

    Ok((joined(roster)?, joined(events)?))
}

fn joined<T>(r: Result<anyhow::Result<T>, tokio::task::JoinError>) -> Result<T, HandlerErr> {
    r.map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
        .map_err(|e| HandlerErr::new("db_query_failed", format!("{e:#}")))
}

fn out_path(params: &serde_json::Value) -> Result<Option<PathBuf>, HandlerErr> {
    Ok(optional_str(params, "outPath")?.map(PathBuf::from))
}

fn report_result(
    outcome: RenderOutcome,
    window: &TimeWindow,
) -> Result<serde_json::Value, HandlerErr> {
    let pdf = outcome
        .bytes
        .as_ref()
        .map(|b| base64::engine::general_purpose::STANDARD.encode(b));
    let mut result = serde_json::to_value(&outcome)
        .map_err(|e| HandlerErr::new("render_failed", e.to_string()))?;
    result["window"] = window_json(window);
    if let Some(pdf) = pdf {
        result["pdfBase64"] = json!(pdf);
    }
    Ok(result)
}

fn sink_for(path: Option<PathBuf>) -> ReportSink<'static> {
    match path {
        Some(p) => ReportSink::File(p),
        None => ReportSink::Memory,
    }
}

fn report_config(state: &AppState, params: &serde_json::Value) -> Result<ReportConfig, HandlerErr> {
    Ok(state.config.with_overrides(params.get("options"))?)
}

fn daily_register(
    state: &AppState,
    workspace: &Path,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let window = window_from_params(params)?;
    let filter = roster_filter(params)?;
    let subject = optional_str(params, "subjectName")?;
    let label = optional_str(params, "subjectLabel")?
        .or_else(|| subject.clone())
        .unwrap_or_else(|| "All subjects".to_string());
    let cfg = report_config(state, params)?;
    let out = out_path(params)?;

    let (students, events) = fetch_inputs(state, workspace, filter, window, subject)?;
    let outcome = state.runtime.block_on(pipeline::render_daily_register(
        &students,
        &events,
        &window,
        &label,
        &cfg,
        sink_for(out),
    ))?;
    report_result(outcome, &window)
}

fn requested_subjects(params: &serde_json::Value) -> Result<Option<Vec<String>>, HandlerErr> {
    match params.get("subjects") {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let Some(arr) = v.as_array() else {
                return Err(HandlerErr::new("bad_params", "subjects must be an array"));
            };
            let mut out = Vec::with_capacity(arr.len());
            for item in arr {
                let Some(s) = item.as_str() else {
                    return Err(HandlerErr::new("bad_params", "subjects must be strings"));
                };
                out.push(s.to_string());
            }
            Ok(Some(out))
        }
    }
}

fn subject_wise(
    state: &AppState,
    workspace: &Path,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let window = window_from_params(params)?;
    let filter = roster_filter(params)?;
    let requested = requested_subjects(params)?;
    let cfg = report_config(state, params)?;
    let out = out_path(params)?;

    let (students, events) = fetch_inputs(state, workspace, filter, window, None)?;
    let subjects = requested.unwrap_or_else(|| {
        events
            .iter()
            .filter_map(|e| e.subject_name.clone())
            .collect()
    });
    let outcome = state.runtime.block_on(pipeline::render_subject_wise_report(
        &students,
        &events,
        &subjects,
        &window,
        &cfg,
        sink_for(out),
    ))?;
    report_result(outcome, &window)
}

fn with_workspace(
    state: &mut AppState,
    req: &Request,
    f: fn(&AppState, &Path, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(ws) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(state, &ws, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.window" => Some(match report_window(&req.params) {
            Ok(result) => ok(&req.id, result),
            Err(error) => error.response(&req.id),
        }),
        "reports.dailyRegister" => Some(with_workspace(state, req, daily_register)),
        "reports.subjectWise" => Some(with_workspace(state, req, subject_wise)),
        _ => None,
    }
}
