use std::collections::HashSet;

use crate::index::{AttendanceIndex, Tally};
use crate::model::{Cell, CellState, CellStat, ReportAxis, ReportSummary, Student, StudentRow};

/// Rounding policy is fixed per report type, never inferred from data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    /// Half-up to the nearest integer (day-grid register).
    WholePercent,
    /// Half-up to two decimals (subject-wise report).
    TwoDecimals,
}

impl Rounding {
    pub fn apply(self, x: f64) -> f64 {
        match self {
            Rounding::WholePercent => (x + 0.5).floor(),
            Rounding::TwoDecimals => round_2(x),
        }
    }
}

pub fn round_2(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

/// `present / (present + absent) * 100`, or 0 when nothing is marked.
pub fn percentage(present: u32, absent: u32, rounding: Rounding) -> f64 {
    let denom = present + absent;
    if denom == 0 {
        return 0.0;
    }
    rounding.apply(100.0 * present as f64 / denom as f64)
}

fn stat(t: Tally, rounding: Rounding) -> CellStat {
    CellStat {
        present: t.present,
        absent: t.absent,
        percentage: percentage(t.present, t.absent, rounding),
    }
}

#[derive(Debug, Clone)]
pub struct ReportTable {
    pub rows: Vec<StudentRow>,
    pub summary: ReportSummary,
}

pub fn compute_table(
    roster: &[Student],
    index: &AttendanceIndex,
    axis: &ReportAxis,
    rounding: Rounding,
) -> ReportTable {
    let columns = axis.column_count();
    let mut seen: HashSet<&str> = HashSet::with_capacity(roster.len());
    let mut ordered: Vec<&Student> = roster
        .iter()
        .filter(|s| seen.insert(s.roll_number.as_str()))
        .collect();
    ordered.sort_by(|a, b| a.roll_number.cmp(&b.roll_number));

    let mut rows = Vec::with_capacity(ordered.len());
    for s in ordered {
        let entries = index.cells_for(&s.roll_number);
        let mut cells = Vec::with_capacity(columns);
        let mut total = Tally::default();
        let mut subject_pct_sum = 0.0_f64;
        let mut marked_subjects = 0usize;

        for col in 0..columns {
            let entry = entries.and_then(|m| m.get(&col)).copied().unwrap_or_default();
            let cell_stat = stat(entry.tally, rounding);
            total.present += entry.tally.present;
            total.absent += entry.tally.absent;
            if cell_stat.marked() > 0 {
                marked_subjects += 1;
                subject_pct_sum += cell_stat.percentage;
            }
            cells.push(Cell {
                state: CellState::from(entry.status()),
                stat: cell_stat,
            });
        }

        let mut row_total = stat(total, rounding);
        if !axis.is_daily() {
            // Subjects with no marked sessions stay out of the denominator.
            row_total.percentage = if marked_subjects > 0 {
                round_2(subject_pct_sum / marked_subjects as f64)
            } else {
                0.0
            };
        }

        rows.push(StudentRow {
            roll_number: s.roll_number.clone(),
            display_name: s.name.clone(),
            cells,
            total: row_total,
        });
    }

    let overall = if rows.is_empty() {
        0.0
    } else {
        round_2(rows.iter().map(|r| r.total.percentage).sum::<f64>() / rows.len() as f64)
    };

    let summary = ReportSummary {
        total_students: rows.len(),
        total_columns: columns,
        overall_average_percentage: overall,
        column_totals: index
            .column_totals()
            .iter()
            .map(|t| stat(*t, rounding))
            .collect(),
    };

    ReportTable { rows, summary }
}
