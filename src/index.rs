use chrono::NaiveDateTime;
use std::collections::HashMap;

use crate::model::{AttendanceEvent, ReportAxis, Status, Student};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub present: u32,
    pub absent: u32,
}

impl Tally {
    fn add(&mut self, status: Status) {
        match status {
            Status::Present => self.present += 1,
            Status::Absent => self.absent += 1,
        }
    }

    fn remove(&mut self, status: Status) {
        match status {
            Status::Present => self.present = self.present.saturating_sub(1),
            Status::Absent => self.absent = self.absent.saturating_sub(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CellEntry {
    pub tally: Tally,
    /// Most recent event for the cell; drives the displayed state.
    pub last: Option<(NaiveDateTime, Status)>,
}

impl CellEntry {
    pub fn status(&self) -> Option<Status> {
        self.last.map(|(_, s)| s)
    }
}

/// Read-only lookup built in a single pass over the events.
///
/// Day columns hold at most one status per student (the latest event wins);
/// subject columns accumulate every session.
#[derive(Debug)]
pub struct AttendanceIndex {
    by_student: HashMap<String, HashMap<usize, CellEntry>>,
    column_totals: Vec<Tally>,
    matched: usize,
    skipped: usize,
}

impl AttendanceIndex {
    pub fn cells_for(&self, roll_number: &str) -> Option<&HashMap<usize, CellEntry>> {
        self.by_student.get(roll_number)
    }

    pub fn column_totals(&self) -> &[Tally] {
        &self.column_totals
    }

    pub fn student_count(&self) -> usize {
        self.by_student.len()
    }

    /// Events that hit a roster student and an axis column.
    pub fn matched_events(&self) -> usize {
        self.matched
    }

    pub fn skipped_events(&self) -> usize {
        self.skipped
    }
}

pub fn build_index(
    students: &[Student],
    events: &[AttendanceEvent],
    axis: &ReportAxis,
) -> AttendanceIndex {
    let mut by_student: HashMap<String, HashMap<usize, CellEntry>> =
        HashMap::with_capacity(students.len());
    for s in students {
        by_student.entry(s.roll_number.clone()).or_default();
    }
    let mut column_totals = vec![Tally::default(); axis.column_count()];
    let single_status = axis.is_daily();
    let mut matched = 0usize;
    let mut skipped = 0usize;

    for ev in events {
        let Some(col) = axis.column_for(ev) else {
            skipped += 1;
            continue;
        };
        let Some(cells) = by_student.get_mut(&ev.roll_number) else {
            skipped += 1;
            continue;
        };
        matched += 1;
        let entry = cells.entry(col).or_default();

        if single_status {
            match entry.last {
                Some((at, _)) if at > ev.recorded_at => continue,
                Some((_, prev)) => {
                    entry.tally.remove(prev);
                    column_totals[col].remove(prev);
                }
                None => {}
            }
            entry.tally.add(ev.status);
            column_totals[col].add(ev.status);
            entry.last = Some((ev.recorded_at, ev.status));
        } else {
            entry.tally.add(ev.status);
            column_totals[col].add(ev.status);
            if entry.last.map(|(at, _)| at <= ev.recorded_at).unwrap_or(true) {
                entry.last = Some((ev.recorded_at, ev.status));
            }
        }
    }

    AttendanceIndex {
        by_student,
        column_totals,
        matched,
        skipped,
    }
}
