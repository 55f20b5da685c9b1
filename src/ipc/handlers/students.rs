use crate::db::{self, RosterEntry, RosterFilter};
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

pub(crate) fn optional_str(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let Some(s) = v.as_str() else {
                return Err(HandlerErr::new(
                    "bad_params",
                    format!("{key} must be string or null"),
                ));
            };
            let t = s.trim();
            if t.is_empty() {
                Ok(None)
            } else {
                Ok(Some(t.to_string()))
            }
        }
    }
}

pub(crate) fn roster_filter(params: &serde_json::Value) -> Result<RosterFilter, HandlerErr> {
    Ok(RosterFilter {
        year: optional_str(params, "year")?,
        branch: optional_str(params, "branch")?,
    })
}

fn students_upsert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let Some(raw) = params.get("students").cloned() else {
        return Err(HandlerErr::new("bad_params", "missing students"));
    };
    let entries: Vec<RosterEntry> = serde_json::from_value(raw)
        .map_err(|e| HandlerErr::new("bad_params", format!("students: {e}")))?;
    if let Some(bad) = entries
        .iter()
        .position(|e| e.roll_number.trim().is_empty() || e.name.trim().is_empty())
    {
        return Err(HandlerErr {
            code: "bad_params",
            message: "rollNumber and name must be non-empty".to_string(),
            details: Some(json!({ "index": bad })),
        });
    }
    let count = db::upsert_students(conn, &entries)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    Ok(json!({ "upserted": count }))
}

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let filter = roster_filter(params)?;
    let students = db::list_roster(conn, &filter)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(json!({ "students": students }))
}

fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.upsert" => Some(with_conn(state, req, students_upsert)),
        "students.list" => Some(with_conn(state, req, students_list)),
        _ => None,
    }
}
