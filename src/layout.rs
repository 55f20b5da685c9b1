//! Page planning for tabular reports.
//!
//! Planning is pure: it decides column geometry and how the sorted rows are
//! split across pages. Drawing happens later in `render`, one
//! [`PageDescriptor`] at a time.

use std::ops::Range;

use serde::Serialize;

use crate::config::PageGeometry;
use crate::model::{ReportAxis, StudentRow};

const BASE_FONT_SIZE: f32 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnKind {
    Roll,
    Name,
    Axis(usize),
    Summary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSpec {
    pub kind: ColumnKind,
    pub label: String,
    pub x: f32,
    pub width: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDescriptor {
    pub page_index: usize,
    /// Global row indices covered by this page.
    pub rows: Range<usize>,
    pub is_continuation: bool,
}

impl PageDescriptor {
    pub fn slice<'a>(&self, rows: &'a [StudentRow]) -> &'a [StudentRow] {
        &rows[self.rows.clone()]
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutPlan {
    pub column_width: f32,
    pub axis_font_size: f32,
    pub rows_per_page: usize,
    pub columns: Vec<ColumnSpec>,
    pub pages: Vec<PageDescriptor>,
}

/// Width of one axis column. Falls back to the readable minimum when the
/// fixed columns leave too little room; the result is never shrunk further.
pub fn variable_column_width(geom: &PageGeometry, axis_columns: usize) -> f32 {
    if axis_columns == 0 {
        return geom.min_column_width;
    }
    let usable = geom.page_width - 2.0 * geom.margin;
    let fixed = geom.roll_width + geom.name_width + geom.summary_width;
    let w = (usable - fixed) / axis_columns as f32;
    w.max(geom.min_column_width)
}

pub fn axis_font_size(geom: &PageGeometry, column_width: f32) -> f32 {
    (column_width * 0.55).clamp(geom.min_font_size, BASE_FONT_SIZE)
}

/// Geometric rows per page, capped by `max_rows_per_page`; at least one.
pub fn rows_per_page(geom: &PageGeometry) -> usize {
    let body = (geom.page_height - geom.header_reserve).max(0.0);
    let fit = if geom.row_height > 0.0 {
        (body / geom.row_height).floor() as usize
    } else {
        0
    };
    fit.min(geom.max_rows_per_page).max(1)
}

/// Splits `total_rows` into consecutive pages; only the last may be short.
pub fn paginate(total_rows: usize, rows_per_page: usize) -> Vec<PageDescriptor> {
    let per = rows_per_page.max(1);
    (0..total_rows)
        .step_by(per)
        .enumerate()
        .map(|(page_index, start)| PageDescriptor {
            page_index,
            rows: start..(start + per).min(total_rows),
            is_continuation: page_index > 0,
        })
        .collect()
}

/// Row shading follows the global row index, so it carries across page breaks.
pub fn is_shaded(global_row: usize) -> bool {
    global_row % 2 == 1
}

fn column_specs(axis: &ReportAxis, geom: &PageGeometry, column_width: f32) -> Vec<ColumnSpec> {
    let mut out = Vec::with_capacity(axis.column_count() + 3);
    let mut x = geom.margin;
    out.push(ColumnSpec {
        kind: ColumnKind::Roll,
        label: "Roll No".to_string(),
        x,
        width: geom.roll_width,
    });
    x += geom.roll_width;
    out.push(ColumnSpec {
        kind: ColumnKind::Name,
        label: "Name".to_string(),
        x,
        width: geom.name_width,
    });
    x += geom.name_width;
    for (i, label) in axis.labels().into_iter().enumerate() {
        out.push(ColumnSpec {
            kind: ColumnKind::Axis(i),
            label,
            x,
            width: column_width,
        });
        x += column_width;
    }
    out.push(ColumnSpec {
        kind: ColumnKind::Summary,
        label: if axis.is_daily() { "P / A  %" } else { "Avg %" }.to_string(),
        x,
        width: geom.summary_width,
    });
    out
}

pub fn plan_layout(axis: &ReportAxis, total_rows: usize, geom: &PageGeometry) -> LayoutPlan {
    let column_width = variable_column_width(geom, axis.column_count());
    let per_page = rows_per_page(geom);
    LayoutPlan {
        column_width,
        axis_font_size: axis_font_size(geom, column_width),
        rows_per_page: per_page,
        columns: column_specs(axis, geom, column_width),
        pages: paginate(total_rows, per_page),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paginates_120_rows_at_50_per_page() {
        let pages = paginate(120, 50);
        let sizes: Vec<usize> = pages.iter().map(|p| p.len()).collect();
        assert_eq!(sizes, vec![50, 50, 20]);
        assert!(!pages[0].is_continuation);
        assert!(pages[1].is_continuation && pages[2].is_continuation);
    }

    #[test]
    fn pages_partition_rows_without_gaps() {
        for (total, per) in [(0, 5), (1, 5), (5, 5), (6, 5), (101, 7)] {
            let pages = paginate(total, per);
            let flat: Vec<usize> = pages.iter().flat_map(|p| p.rows.clone()).collect();
            assert_eq!(flat, (0..total).collect::<Vec<_>>());
            for (i, p) in pages.iter().enumerate() {
                assert_eq!(p.page_index, i);
            }
        }
    }

    #[test]
    fn rows_per_page_is_capped() {
        let mut geom = PageGeometry::default();
        assert_eq!(rows_per_page(&geom), 33);
        geom.row_height = 4.0;
        assert_eq!(rows_per_page(&geom), geom.max_rows_per_page);
        geom.max_rows_per_page = 50;
        geom.page_height = 50.0;
        assert_eq!(rows_per_page(&geom), 1);
    }

    #[test]
    fn column_width_uses_remaining_space_with_floor() {
        let geom = PageGeometry::default();
        let w = variable_column_width(&geom, 31);
        assert!((w - (786.0 - 260.0) / 31.0).abs() < 1e-4);
        assert_eq!(variable_column_width(&geom, 200), geom.min_column_width);
        assert_eq!(variable_column_width(&geom, 0), geom.min_column_width);
        assert_eq!(axis_font_size(&geom, 2.0), geom.min_font_size);
    }

    #[test]
    fn striping_continues_across_pages() {
        let pages = paginate(7, 3);
        // Page 1 starts at global row 3, which is shaded; page 0 starts unshaded.
        assert!(!is_shaded(pages[0].rows.start));
        assert!(is_shaded(pages[1].rows.start));
        assert!(!is_shaded(pages[2].rows.start));
    }

    #[test]
    fn plan_is_deterministic_and_lays_out_columns_left_to_right() {
        let axis = ReportAxis::daily(2024, 4).unwrap();
        let geom = PageGeometry::default();
        let a = plan_layout(&axis, 90, &geom);
        let b = plan_layout(&axis, 90, &geom);
        assert_eq!(a, b);
        assert_eq!(a.columns.len(), 30 + 3);
        assert_eq!(a.columns[2].label, "1");
        assert!(a.columns.windows(2).all(|w| w[0].x < w[1].x));
        assert_eq!(a.pages.len(), 3);
        assert_eq!(a.rows_per_page, 33);
    }
}
