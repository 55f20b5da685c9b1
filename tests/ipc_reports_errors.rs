use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_attendd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn attendd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn error_code(resp: &serde_json::Value) -> Option<&str> {
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false), "{}", resp);
    resp.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

#[test]
fn methods_report_stable_error_codes() {
    let workspace = temp_dir("attendd-reports-errors");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let resp = request(&mut stdin, &mut reader, "1", "students.list", json!({}));
    assert_eq!(error_code(&resp), Some("no_workspace"));
    let resp = request(&mut stdin, &mut reader, "2", "reports.dailyRegister", json!({}));
    assert_eq!(error_code(&resp), Some("no_workspace"));
    let resp = request(&mut stdin, &mut reader, "3", "grades.compute", json!({}));
    assert_eq!(error_code(&resp), Some("not_implemented"));

    let resp = request(
        &mut stdin,
        &mut reader,
        "4",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(resp["ok"].as_bool(), Some(true));

    // Empty roster.
    let resp = request(
        &mut stdin,
        &mut reader,
        "5",
        "reports.dailyRegister",
        json!({ "month": "2024-09" }),
    );
    assert_eq!(error_code(&resp), Some("not_found"));

    let resp = request(
        &mut stdin,
        &mut reader,
        "6",
        "reports.subjectWise",
        json!({ "mode": "custom", "startDate": "2024-09-01" }),
    );
    assert_eq!(error_code(&resp), Some("bad_params"));
    let resp = request(
        &mut stdin,
        &mut reader,
        "7",
        "reports.window",
        json!({ "mode": "custom", "startDate": "2024-09-10", "endDate": "2024-09-01" }),
    );
    assert_eq!(error_code(&resp), Some("bad_params"));
    let resp = request(
        &mut stdin,
        &mut reader,
        "8",
        "attendance.record",
        json!({ "events": [
            { "rollNumber": "1", "recordedAt": "2024-09-02", "status": "late" }
        ] }),
    );
    assert_eq!(error_code(&resp), Some("bad_params"));
    assert_eq!(resp["error"]["details"]["index"].as_u64(), Some(0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(&workspace);
}

#[test]
fn render_timeout_leaves_no_spooled_output() {
    let workspace = temp_dir("attendd-reports-timeout");
    let spool = workspace.join("spool");
    std::fs::create_dir_all(&spool).expect("create spool dir");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(resp["ok"].as_bool(), Some(true));

    let students: Vec<serde_json::Value> = (0..10_000)
        .map(|i| json!({ "rollNumber": format!("S{:05}", i), "name": format!("Student {}", i) }))
        .collect();
    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "students.upsert",
        json!({ "students": students }),
    );
    assert_eq!(resp["result"]["upserted"].as_u64(), Some(10_000));
    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.record",
        json!({ "events": [
            { "rollNumber": "S00001", "recordedAt": "2024-09-02T09:00:00", "status": "present" }
        ] }),
    );
    assert_eq!(resp["ok"].as_bool(), Some(true));

    let resp = request(
        &mut stdin,
        &mut reader,
        "4",
        "reports.dailyRegister",
        json!({
            "month": "2024-09",
            "options": {
                "timeoutMs": 1,
                "yieldEvery": 1,
                "tempDir": spool.to_string_lossy()
            }
        }),
    );
    assert_eq!(error_code(&resp), Some("timeout"));
    assert_eq!(resp["error"]["details"]["timeoutMs"].as_u64(), Some(1));
    let leftovers = std::fs::read_dir(&spool).expect("read spool dir").count();
    assert_eq!(leftovers, 0);

    // The daemon keeps serving after a timeout.
    let resp = request(&mut stdin, &mut reader, "5", "health", json!({}));
    assert_eq!(resp["ok"].as_bool(), Some(true));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(&workspace);
}
