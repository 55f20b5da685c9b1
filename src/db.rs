use anyhow::Context;
use chrono::NaiveDateTime;
use rusqlite::{params_from_iter, types::Value, Connection};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::model::{AttendanceEvent, Status, Student};
use crate::window::TimeWindow;

const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

pub fn db_path(workspace: &Path) -> PathBuf {
    workspace.join("attendance.sqlite3")
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let conn = Connection::open(db_path(workspace))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            roll_number TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;
    // Early workspaces stored students without year/branch.
    ensure_students_year_branch(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_year_branch ON students(year, branch)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_events(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            roll_number TEXT NOT NULL,
            subject_name TEXT NOT NULL DEFAULT '',
            recorded_at TEXT NOT NULL,
            status TEXT NOT NULL,
            UNIQUE(roll_number, subject_name, recorded_at)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_events_time ON attendance_events(recorded_at)",
        [],
    )?;

    Ok(conn)
}

/// Read-only handle for concurrent report fetches.
pub fn open_reader(db_file: &Path) -> anyhow::Result<Connection> {
    Connection::open(db_file)
        .with_context(|| format!("failed to open database {}", db_file.to_string_lossy()))
}

fn ensure_students_year_branch(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "students", "year")? {
        conn.execute("ALTER TABLE students ADD COLUMN year TEXT", [])?;
    }
    if !table_has_column(conn, "students", "branch")? {
        conn.execute("ALTER TABLE students ADD COLUMN branch TEXT", [])?;
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub roll_number: String,
    pub name: String,
    #[serde(default)]
    pub year: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RosterFilter {
    pub year: Option<String>,
    pub branch: Option<String>,
}

pub fn upsert_students(conn: &Connection, entries: &[RosterEntry]) -> anyhow::Result<usize> {
    let tx = conn.unchecked_transaction()?;
    for e in entries {
        tx.execute(
            "INSERT INTO students(roll_number, name, year, branch)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(roll_number) DO UPDATE SET
               name = excluded.name,
               year = excluded.year,
               branch = excluded.branch",
            (e.roll_number.trim(), e.name.trim(), &e.year, &e.branch),
        )?;
    }
    tx.commit()?;
    Ok(entries.len())
}

pub fn list_roster(conn: &Connection, filter: &RosterFilter) -> anyhow::Result<Vec<Student>> {
    let mut sql = "SELECT roll_number, name FROM students WHERE 1 = 1".to_string();
    let mut binds: Vec<Value> = Vec::new();
    if let Some(year) = &filter.year {
        sql.push_str(" AND year = ?");
        binds.push(Value::Text(year.clone()));
    }
    if let Some(branch) = &filter.branch {
        sql.push_str(" AND lower(branch) = lower(?)");
        binds.push(Value::Text(branch.clone()));
    }
    sql.push_str(" ORDER BY roll_number");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok(Student {
                roll_number: r.get(0)?,
                name: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordSummary {
    pub inserted: usize,
    pub duplicates: usize,
}

/// Insert-or-report: an event already stored for the same student, subject
/// and instant is counted as a duplicate and left untouched.
pub fn record_events(conn: &Connection, events: &[AttendanceEvent]) -> anyhow::Result<RecordSummary> {
    let tx = conn.unchecked_transaction()?;
    let mut summary = RecordSummary::default();
    for ev in events {
        let changed = tx.execute(
            "INSERT OR IGNORE INTO attendance_events(roll_number, subject_name, recorded_at, status)
             VALUES(?, ?, ?, ?)",
            (
                ev.roll_number.trim(),
                ev.subject_name.as_deref().map(str::trim).unwrap_or(""),
                ev.recorded_at.format(TS_FORMAT).to_string(),
                ev.status.as_str(),
            ),
        )?;
        if changed == 0 {
            summary.duplicates += 1;
        } else {
            summary.inserted += 1;
        }
    }
    tx.commit()?;
    Ok(summary)
}

pub fn list_events(
    conn: &Connection,
    window: &TimeWindow,
    subject: Option<&str>,
) -> anyhow::Result<Vec<AttendanceEvent>> {
    let mut sql = "SELECT roll_number, subject_name, recorded_at, status
                   FROM attendance_events
                   WHERE recorded_at >= ? AND recorded_at <= ?"
        .to_string();
    let mut binds: Vec<Value> = vec![
        Value::Text(window.start.format(TS_FORMAT).to_string()),
        Value::Text(window.end.format(TS_FORMAT).to_string()),
    ];
    if let Some(subject) = subject {
        sql.push_str(" AND lower(subject_name) = lower(?)");
        binds.push(Value::Text(subject.trim().to_string()));
    }
    sql.push_str(" ORDER BY recorded_at, id");

    let mut stmt = conn.prepare(&sql)?;
    let raw = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(raw.len());
    for (roll_number, subject_name, recorded_at, status) in raw {
        let recorded_at = NaiveDateTime::parse_from_str(&recorded_at, TS_FORMAT)
            .with_context(|| format!("bad recorded_at in store: {recorded_at}"))?;
        let Some(status) = Status::parse(&status) else {
            anyhow::bail!("bad status in store: {status}");
        };
        out.push(AttendanceEvent {
            roll_number,
            subject_name: if subject_name.is_empty() {
                None
            } else {
                Some(subject_name)
            },
            recorded_at,
            status,
        });
    }
    Ok(out)
}
