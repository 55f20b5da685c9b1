//! Report orchestration: index, compute, plan, render, deliver.
//!
//! Everything structural (index, statistics, page plan) is built before any
//! output is opened. Rendering and delivery then run under one wall-clock
//! deadline; when the deadline wins, the render future is dropped and with it
//! the spooled temp file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Local;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::ReportConfig;
use crate::error::{ReportError, ReportResult};
use crate::index::build_index;
use crate::layout::{plan_layout, LayoutPlan};
use crate::model::{AttendanceEvent, ReportAxis, Student};
use crate::render::{CellStyle, PdfComposer, ReportHeading};
use crate::stats::{compute_table, ReportTable, Rounding};
use crate::window::TimeWindow;

/// Where the finished document goes.
pub enum ReportSink<'a> {
    /// Spool to a temp file, then hand the bytes back.
    Memory,
    /// Spool to a temp file, then move it to the given path.
    File(PathBuf),
    /// Write straight to a live response. Bytes sent cannot be recalled.
    Stream(&'a mut (dyn Write + Send)),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOutcome {
    pub pages: usize,
    pub rows: usize,
    pub rows_per_page: usize,
    pub column_width: f32,
    pub total_columns: usize,
    pub overall_average_percentage: f64,
    pub matched_events: usize,
    pub skipped_events: usize,
    pub bytes_written: u64,
    pub sha256: String,
    /// False only when a stream failed after its first byte went out.
    pub complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_path: Option<String>,
    #[serde(skip)]
    pub bytes: Option<Vec<u8>>,
}

struct PreparedReport {
    table: ReportTable,
    plan: LayoutPlan,
    heading: ReportHeading,
    style: CellStyle,
    matched_events: usize,
    skipped_events: usize,
}

fn prepare(
    students: &[Student],
    events: &[AttendanceEvent],
    axis: &ReportAxis,
    rounding: Rounding,
    heading: ReportHeading,
    cfg: &ReportConfig,
) -> ReportResult<PreparedReport> {
    if students.is_empty() {
        return Err(ReportError::NoData("roster is empty".to_string()));
    }
    if axis.column_count() == 0 {
        return Err(ReportError::NoData("report has no columns".to_string()));
    }
    let index = build_index(students, events, axis);
    if index.matched_events() == 0 {
        return Err(ReportError::NoData(
            "no attendance records match the roster and period".to_string(),
        ));
    }
    let table = compute_table(students, &index, axis, rounding);
    let plan = plan_layout(axis, table.rows.len(), &cfg.geometry);
    Ok(PreparedReport {
        table,
        plan,
        heading,
        style: if axis.is_daily() {
            CellStyle::DayMarks
        } else {
            CellStyle::SubjectPercent
        },
        matched_events: index.matched_events(),
        skipped_events: index.skipped_events(),
    })
}

/// Counts and hashes everything passing through to `inner`.
struct DigestWriter<W: Write> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> DigestWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    fn hex_digest(&self) -> String {
        format!("{:x}", self.hasher.clone().finalize())
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

async fn compose(prepared: &PreparedReport, cfg: &ReportConfig) -> ReportResult<lopdf::Document> {
    let rows = &prepared.table.rows;
    let last_page = prepared.plan.pages.len().saturating_sub(1);
    let yield_every = cfg.yield_every.max(1);
    let mut composer = PdfComposer::new(
        &prepared.plan,
        &cfg.geometry,
        &prepared.heading,
        prepared.style,
    );
    let mut since_yield = 0usize;
    for page in &prepared.plan.pages {
        composer.begin_page(page);
        for (offset, row) in page.slice(rows).iter().enumerate() {
            composer.row(page.rows.start + offset, row);
            since_yield += 1;
            if since_yield >= yield_every {
                since_yield = 0;
                tokio::task::yield_now().await;
            }
        }
        let summary = (page.page_index == last_page).then_some(&prepared.table.summary);
        composer.end_page(summary)?;
    }
    Ok(composer.finish())
}

fn spool_file(temp_dir: &Path, request_id: &Uuid) -> ReportResult<NamedTempFile> {
    std::fs::create_dir_all(temp_dir)?;
    let tmp = tempfile::Builder::new()
        .prefix(&format!("attendd-{}-", request_id.simple()))
        .suffix(".pdf")
        .tempfile_in(temp_dir)?;
    Ok(tmp)
}

fn target_dir(target: &Path) -> &Path {
    match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// Copies `source` into a staging file beside `target`, then renames it over
/// `target`. A failed copy drops the staging file; `target` is never partial.
fn copy_into_place(source: &Path, target: &Path) -> ReportResult<()> {
    let mut src = File::open(source)?;
    let mut staged = tempfile::Builder::new()
        .prefix(".attendd-")
        .suffix(".part")
        .tempfile_in(target_dir(target))?;
    std::io::copy(&mut src, staged.as_file_mut())?;
    staged.as_file().sync_all()?;
    staged.persist(target).map_err(|e| ReportError::from(e.error))?;
    Ok(())
}

fn persist_spool(tmp: NamedTempFile, target: &Path) -> ReportResult<()> {
    std::fs::create_dir_all(target_dir(target))?;
    match tmp.persist(target) {
        Ok(_) => Ok(()),
        // Rename fails across filesystems; the spool drops after the copy.
        Err(e) => copy_into_place(e.file.path(), target),
    }
}

/// Bytes handed to a stream sink between cooperative yields.
const STREAM_CHUNK: usize = 8 * 1024;

/// Writes `bytes` in chunks, yielding between them so a slow sink cannot
/// outrun the render deadline.
async fn write_chunked<W: Write>(w: &mut W, bytes: &[u8]) -> ReportResult<()> {
    for chunk in bytes.chunks(STREAM_CHUNK) {
        w.write_all(chunk)?;
        tokio::task::yield_now().await;
    }
    w.flush()?;
    Ok(())
}

struct Delivered {
    bytes_written: u64,
    sha256: String,
    complete: bool,
    bytes: Option<Vec<u8>>,
    out_path: Option<String>,
}

async fn render_and_deliver(
    prepared: &PreparedReport,
    cfg: &ReportConfig,
    sink: ReportSink<'_>,
    request_id: Uuid,
) -> ReportResult<Delivered> {
    match sink {
        ReportSink::Stream(out) => {
            let mut doc = compose(prepared, cfg).await?;
            tokio::task::yield_now().await;
            let mut encoded = Vec::new();
            doc.save_to(&mut encoded)?;
            drop(doc);
            tokio::task::yield_now().await;
            let mut w = DigestWriter::new(out);
            match write_chunked(&mut w, &encoded).await {
                Ok(()) => Ok(Delivered {
                    bytes_written: w.written,
                    sha256: w.hex_digest(),
                    complete: true,
                    bytes: None,
                    out_path: None,
                }),
                Err(e) if w.written > 0 => {
                    error!(
                        request_id = %request_id,
                        bytes_written = w.written,
                        "report stream failed after commit: {e}"
                    );
                    Ok(Delivered {
                        bytes_written: w.written,
                        sha256: w.hex_digest(),
                        complete: false,
                        bytes: None,
                        out_path: None,
                    })
                }
                Err(e) => Err(e),
            }
        }
        ReportSink::Memory | ReportSink::File(_) => {
            // Acquired before rendering; dropping it on any exit removes the file.
            let spool = spool_file(&cfg.temp_dir, &request_id)?;
            let mut doc = compose(prepared, cfg).await?;
            tokio::task::yield_now().await;
            let (bytes_written, sha256) = {
                let mut w = DigestWriter::new(BufWriter::new(spool.as_file()));
                doc.save_to(&mut w)?;
                w.flush()?;
                (w.written, w.hex_digest())
            };
            tokio::task::yield_now().await;
            match sink {
                ReportSink::File(target) => {
                    persist_spool(spool, &target)?;
                    Ok(Delivered {
                        bytes_written,
                        sha256,
                        complete: true,
                        bytes: None,
                        out_path: Some(target.to_string_lossy().to_string()),
                    })
                }
                _ => {
                    let bytes = std::fs::read(spool.path())?;
                    Ok(Delivered {
                        bytes_written,
                        sha256,
                        complete: true,
                        bytes: Some(bytes),
                        out_path: None,
                    })
                }
            }
        }
    }
}

async fn run(
    kind: &'static str,
    prepare_fn: impl FnOnce() -> ReportResult<PreparedReport>,
    cfg: &ReportConfig,
    sink: ReportSink<'_>,
) -> ReportResult<RenderOutcome> {
    let request_id = Uuid::new_v4();
    let started = Instant::now();
    let prepared = prepare_fn()?;
    info!(
        request_id = %request_id,
        report = kind,
        rows = prepared.table.rows.len(),
        pages = prepared.plan.pages.len(),
        "report render start"
    );

    let delivered = match tokio::time::timeout(
        cfg.render_timeout,
        render_and_deliver(&prepared, cfg, sink, request_id),
    )
    .await
    {
        Ok(res) => res?,
        Err(_) => {
            warn!(
                request_id = %request_id,
                report = kind,
                timeout_ms = cfg.render_timeout.as_millis() as u64,
                "report render timed out"
            );
            return Err(ReportError::Timeout(cfg.render_timeout));
        }
    };

    info!(
        request_id = %request_id,
        report = kind,
        bytes = delivered.bytes_written,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "report render complete"
    );
    Ok(RenderOutcome {
        pages: prepared.plan.pages.len(),
        rows: prepared.table.rows.len(),
        rows_per_page: prepared.plan.rows_per_page,
        column_width: prepared.plan.column_width,
        total_columns: prepared.table.summary.total_columns,
        overall_average_percentage: prepared.table.summary.overall_average_percentage,
        matched_events: prepared.matched_events,
        skipped_events: prepared.skipped_events,
        bytes_written: delivered.bytes_written,
        sha256: delivered.sha256,
        complete: delivered.complete,
        out_path: delivered.out_path,
        bytes: delivered.bytes,
    })
}

/// Day-grid register for the calendar month containing the window start.
/// Percentages round half-up to whole numbers.
pub async fn render_daily_register(
    students: &[Student],
    events: &[AttendanceEvent],
    window: &TimeWindow,
    subject_label: &str,
    cfg: &ReportConfig,
    sink: ReportSink<'_>,
) -> ReportResult<RenderOutcome> {
    let axis = ReportAxis::daily_for(window.start_date());
    let label = subject_label.trim();
    let period = window.start.format("%B %Y");
    let heading = ReportHeading {
        title: "Attendance Register".to_string(),
        subtitle: if label.is_empty() {
            period.to_string()
        } else {
            format!("{label} - {period}")
        },
        generated_at: Local::now().naive_local(),
    };
    run(
        "daily_register",
        || prepare(students, events, &axis, Rounding::WholePercent, heading, cfg),
        cfg,
        sink,
    )
    .await
}

/// Student x subject report over the window. Percentages keep two decimals.
pub async fn render_subject_wise_report(
    students: &[Student],
    events: &[AttendanceEvent],
    subjects: &[String],
    window: &TimeWindow,
    cfg: &ReportConfig,
    sink: ReportSink<'_>,
) -> ReportResult<RenderOutcome> {
    let axis = ReportAxis::subjects(subjects);
    let heading = ReportHeading {
        title: "Subject-wise Attendance Report".to_string(),
        subtitle: format!(
            "{} to {}",
            window.start.format("%Y-%m-%d"),
            window.end.format("%Y-%m-%d")
        ),
        generated_at: Local::now().naive_local(),
    };
    run(
        "subject_wise",
        || prepare(students, events, &axis, Rounding::TwoDecimals, heading, cfg),
        cfg,
        sink,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Status;
    use crate::window::month_window;
    use chrono::NaiveDate;
    use std::time::Duration;

    fn roster(n: usize) -> Vec<Student> {
        (0..n)
            .map(|i| Student {
                roll_number: format!("{:05}", i),
                name: format!("Student {i}"),
            })
            .collect()
    }

    fn day_events(students: &[Student], days: u32) -> Vec<AttendanceEvent> {
        let mut out = Vec::new();
        for (i, s) in students.iter().enumerate() {
            for d in 1..=days {
                out.push(AttendanceEvent {
                    roll_number: s.roll_number.clone(),
                    subject_name: Some("Maths".to_string()),
                    recorded_at: NaiveDate::from_ymd_opt(2024, 9, d)
                        .unwrap()
                        .and_hms_opt(9, 0, 0)
                        .unwrap(),
                    status: if (i + d as usize) % 4 == 0 {
                        Status::Absent
                    } else {
                        Status::Present
                    },
                });
            }
        }
        out
    }

    fn test_config(dir: &Path) -> ReportConfig {
        ReportConfig {
            temp_dir: dir.to_path_buf(),
            ..ReportConfig::default()
        }
    }

    fn dir_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|it| it.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn memory_sink_returns_pdf_and_removes_spool() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cfg = test_config(tmp.path());
        let students = roster(40);
        let events = day_events(&students, 5);
        let window = month_window(2024, 9).unwrap();

        let out = render_daily_register(&students, &events, &window, "Maths", &cfg, ReportSink::Memory)
            .await
            .unwrap();
        assert_eq!(out.rows, 40);
        assert_eq!(out.pages, 2);
        assert_eq!(out.total_columns, 30);
        assert!(out.complete);
        let bytes = out.bytes.unwrap();
        assert_eq!(bytes.len() as u64, out.bytes_written);
        assert!(bytes.starts_with(b"%PDF"));
        assert_eq!(format!("{:x}", Sha256::digest(&bytes)), out.sha256);
        assert_eq!(dir_entries(tmp.path()), 0);
    }

    #[tokio::test]
    async fn file_sink_persists_to_target() {
        let tmp = tempfile::TempDir::new().unwrap();
        let spool_dir = tmp.path().join("spool");
        let cfg = test_config(&spool_dir);
        let students = roster(3);
        let events = day_events(&students, 2);
        let window = month_window(2024, 9).unwrap();
        let target = tmp.path().join("out").join("register.pdf");

        let out = render_daily_register(
            &students,
            &events,
            &window,
            "",
            &cfg,
            ReportSink::File(target.clone()),
        )
        .await
        .unwrap();
        assert_eq!(out.out_path.as_deref(), Some(target.to_string_lossy().as_ref()));
        assert_eq!(std::fs::metadata(&target).unwrap().len(), out.bytes_written);
        assert_eq!(dir_entries(&spool_dir), 0);
    }

    #[tokio::test]
    async fn tiny_deadline_times_out_and_leaves_no_artifacts() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut cfg = test_config(tmp.path());
        cfg.render_timeout = Duration::from_millis(1);
        cfg.yield_every = 16;
        let students = roster(10_000);
        let events = day_events(&students, 1);
        let window = month_window(2024, 9).unwrap();

        let err = render_daily_register(&students, &events, &window, "", &cfg, ReportSink::Memory)
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::Timeout(_)), "got {err:?}");
        assert_eq!(dir_entries(tmp.path()), 0);
    }

    #[tokio::test]
    async fn empty_roster_and_unmatched_events_are_no_data() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cfg = test_config(tmp.path());
        let window = month_window(2024, 9).unwrap();

        let err = render_daily_register(&[], &[], &window, "", &cfg, ReportSink::Memory)
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::NoData(_)));

        let students = roster(2);
        let other_month = month_window(2024, 10).unwrap();
        let events = day_events(&students, 3);
        let err = render_daily_register(&students, &events, &other_month, "", &cfg, ReportSink::Memory)
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::NoData(_)));
        assert_eq!(dir_entries(tmp.path()), 0);
    }

    #[tokio::test]
    async fn subject_report_streams_and_repeats_partitioning() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cfg = test_config(tmp.path());
        let students = roster(70);
        let events = day_events(&students, 4);
        let window = month_window(2024, 9).unwrap();
        let subjects = vec!["Maths".to_string(), "Physics".to_string()];

        let mut first: Vec<u8> = Vec::new();
        let a = render_subject_wise_report(
            &students,
            &events,
            &subjects,
            &window,
            &cfg,
            ReportSink::Stream(&mut first),
        )
        .await
        .unwrap();
        let b = render_subject_wise_report(&students, &events, &subjects, &window, &cfg, ReportSink::Memory)
            .await
            .unwrap();
        assert_eq!(a.bytes_written, first.len() as u64);
        assert_eq!((a.pages, a.rows_per_page), (b.pages, b.rows_per_page));
        assert_eq!(a.column_width, b.column_width);
        assert_eq!(a.total_columns, 2);
        assert_eq!(a.pages, 3);
    }

    struct FailAfter {
        budget: usize,
    }

    impl Write for FailAfter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.budget == 0 {
                return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"));
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct SlowSink {
        delay: Duration,
        written: usize,
    }

    impl Write for SlowSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            std::thread::sleep(self.delay);
            self.written += buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn slow_stream_sink_is_bound_by_the_deadline() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut cfg = test_config(tmp.path());
        cfg.render_timeout = Duration::from_millis(5);
        let students = roster(40);
        let events = day_events(&students, 5);
        let window = month_window(2024, 9).unwrap();

        let mut sink = SlowSink {
            delay: Duration::from_millis(2),
            written: 0,
        };
        let started = Instant::now();
        let err = render_daily_register(&students, &events, &window, "", &cfg, ReportSink::Stream(&mut sink))
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::Timeout(_)), "got {err:?}");
        assert!(started.elapsed() < Duration::from_millis(500));

        let mut fast: Vec<u8> = Vec::new();
        cfg.render_timeout = Duration::from_secs(30);
        let out = render_daily_register(&students, &events, &window, "", &cfg, ReportSink::Stream(&mut fast))
            .await
            .unwrap();
        assert!(out.complete);
        assert!(fast.len() > 2 * STREAM_CHUNK);
        assert_eq!(format!("{:x}", Sha256::digest(&fast)), out.sha256);
        assert!(sink.written < fast.len());
    }

    #[test]
    fn failed_fallback_copy_leaves_nothing_at_target() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("spooled.pdf");
        std::fs::write(&source, b"%PDF-1.5 body").unwrap();

        let target = tmp.path().join("out").join("register.pdf");
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        copy_into_place(&source, &target).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"%PDF-1.5 body");
        assert_eq!(dir_entries(target.parent().unwrap()), 1);

        // A directory in the way makes the final rename fail.
        let blocked = tmp.path().join("blocked");
        std::fs::create_dir_all(blocked.join("register.pdf").join("inner")).unwrap();
        assert!(copy_into_place(&source, &blocked.join("register.pdf")).is_err());
        assert_eq!(dir_entries(&blocked), 1);
        assert!(blocked.join("register.pdf").is_dir());
    }

    #[tokio::test]
    async fn stream_failure_after_first_byte_is_logged_not_raised() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cfg = test_config(tmp.path());
        let students = roster(40);
        let events = day_events(&students, 2);
        let window = month_window(2024, 9).unwrap();

        let mut sink = FailAfter { budget: 64 };
        let out = render_daily_register(&students, &events, &window, "", &cfg, ReportSink::Stream(&mut sink))
            .await
            .unwrap();
        assert!(!out.complete);
        assert_eq!(out.bytes_written, 64);

        let mut dead = FailAfter { budget: 0 };
        let err = render_daily_register(&students, &events, &window, "", &cfg, ReportSink::Stream(&mut dead))
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::RenderFailure(_)));
    }
}
