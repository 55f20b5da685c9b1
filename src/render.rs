use chrono::NaiveDateTime;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream, StringFormat};

use crate::config::PageGeometry;
use crate::error::ReportResult;
use crate::layout::{is_shaded, ColumnKind, ColumnSpec, LayoutPlan, PageDescriptor};
use crate::model::{Cell, CellState, ReportSummary, StudentRow};

const BODY_FONT_SIZE: f32 = 8.0;
const TITLE_FONT_SIZE: f32 = 14.0;
const FULL_BAND: f32 = 46.0;
const CONDENSED_BAND: f32 = 22.0;
const SHADE: f32 = 0.92;

#[derive(Debug, Clone)]
pub struct ReportHeading {
    pub title: String,
    pub subtitle: String,
    pub generated_at: NaiveDateTime,
}

/// Which report the composer draws; decides cell and summary text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellStyle {
    DayMarks,
    SubjectPercent,
}

/// The base-14 fonts are set up with WinAnsi, which covers printable
/// Latin-1; anything else is replaced.
fn pdf_safe(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            ' '..='~' | '\u{a0}'..='\u{ff}' => c,
            _ => '?',
        })
        .collect()
}

/// Encodes `pdf_safe` output one byte per char.
fn win_ansi(s: &str) -> Object {
    let bytes = s
        .chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect();
    Object::String(bytes, StringFormat::Literal)
}

/// Trims text to roughly fit `width` at `size` (Helvetica averages ~0.5em).
fn fit_text(s: &str, width: f32, size: f32) -> String {
    let safe = pdf_safe(s);
    let max_chars = ((width - 2.0) / (size * 0.5)).floor().max(1.0) as usize;
    if safe.chars().count() <= max_chars {
        return safe;
    }
    let keep = max_chars.saturating_sub(1).max(1);
    let mut out: String = safe.chars().take(keep).collect();
    out.push('.');
    out
}

pub fn cell_text(cell: &Cell, style: CellStyle) -> String {
    match style {
        CellStyle::DayMarks => match cell.state {
            CellState::Present => "P".to_string(),
            CellState::Absent => "A".to_string(),
            CellState::Unmarked => "-".to_string(),
        },
        CellStyle::SubjectPercent => {
            if cell.stat.marked() == 0 {
                "-".to_string()
            } else {
                format!("{:.2}", cell.stat.percentage)
            }
        }
    }
}

pub fn summary_text(row: &StudentRow, style: CellStyle) -> String {
    match style {
        CellStyle::DayMarks => format!(
            "{}/{}  {:.0}%",
            row.total.present, row.total.absent, row.total.percentage
        ),
        CellStyle::SubjectPercent => format!("{:.2}%", row.total.percentage),
    }
}

fn text_op(ops: &mut Vec<Operation>, font: &str, size: f32, x: f32, y: f32, s: &str) {
    ops.push(Operation::new("BT", vec![]));
    ops.push(Operation::new("Tf", vec![font.into(), size.into()]));
    ops.push(Operation::new("Td", vec![x.into(), y.into()]));
    ops.push(Operation::new("Tj", vec![win_ansi(s)]));
    ops.push(Operation::new("ET", vec![]));
}

fn fill_rect(ops: &mut Vec<Operation>, gray: f32, x: f32, y: f32, w: f32, h: f32) {
    ops.push(Operation::new("g", vec![gray.into()]));
    ops.push(Operation::new("re", vec![x.into(), y.into(), w.into(), h.into()]));
    ops.push(Operation::new("f", vec![]));
    ops.push(Operation::new("g", vec![0.0_f32.into()]));
}

fn hline(ops: &mut Vec<Operation>, x0: f32, x1: f32, y: f32) {
    ops.push(Operation::new("m", vec![x0.into(), y.into()]));
    ops.push(Operation::new("l", vec![x1.into(), y.into()]));
    ops.push(Operation::new("S", vec![]));
}

/// Draws pages one descriptor at a time. Call order per page is
/// `begin_page`, `row`*, `end_page`; `finish` assembles the document.
pub struct PdfComposer<'a> {
    doc: Document,
    pages_id: ObjectId,
    resources_id: ObjectId,
    kids: Vec<Object>,
    plan: &'a LayoutPlan,
    geom: &'a PageGeometry,
    heading: &'a ReportHeading,
    style: CellStyle,
    ops: Vec<Operation>,
    cursor_y: f32,
}

impl<'a> PdfComposer<'a> {
    pub fn new(
        plan: &'a LayoutPlan,
        geom: &'a PageGeometry,
        heading: &'a ReportHeading,
        style: CellStyle,
    ) -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let regular = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let bold = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica-Bold",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => regular,
                "F2" => bold,
            },
        });
        Self {
            doc,
            pages_id,
            resources_id,
            kids: Vec::with_capacity(plan.pages.len()),
            plan,
            geom,
            heading,
            style,
            ops: Vec::new(),
            cursor_y: 0.0,
        }
    }

    fn table_right(&self) -> f32 {
        self.plan
            .columns
            .last()
            .map(|c| c.x + c.width)
            .unwrap_or(self.geom.page_width - self.geom.margin)
    }

    fn column_font_size(&self, col: &ColumnSpec) -> f32 {
        match col.kind {
            ColumnKind::Axis(_) => self.plan.axis_font_size,
            _ => BODY_FONT_SIZE,
        }
    }

    pub fn begin_page(&mut self, page: &PageDescriptor) {
        self.ops.clear();
        let top = self.geom.page_height - self.geom.margin;
        let left = self.geom.margin;
        let total_pages = self.plan.pages.len();
        let mut ops = Vec::new();

        let band = if page.is_continuation {
            text_op(
                &mut ops,
                "F2",
                BODY_FONT_SIZE + 2.0,
                left,
                top - 12.0,
                &pdf_safe(&format!(
                    "{} (continued) - page {} of {}",
                    self.heading.title,
                    page.page_index + 1,
                    total_pages
                )),
            );
            CONDENSED_BAND
        } else {
            text_op(&mut ops, "F2", TITLE_FONT_SIZE, left, top - 14.0, &pdf_safe(&self.heading.title));
            text_op(&mut ops, "F1", BODY_FONT_SIZE + 2.0, left, top - 28.0, &pdf_safe(&self.heading.subtitle));
            text_op(
                &mut ops,
                "F1",
                BODY_FONT_SIZE,
                left,
                top - 40.0,
                &format!(
                    "Generated {}  -  page 1 of {}",
                    self.heading.generated_at.format("%Y-%m-%d %H:%M"),
                    total_pages
                ),
            );
            FULL_BAND
        };

        // Column header row, repeated on every page.
        let row_h = self.geom.row_height;
        let header_y = top - band - row_h;
        fill_rect(&mut ops, 0.8, left, header_y, self.table_right() - left, row_h);
        for col in &self.plan.columns {
            let size = self.column_font_size(col);
            let label = fit_text(&col.label, col.width, size);
            text_op(&mut ops, "F2", size, col.x + 1.0, header_y + (row_h - size) / 2.0 + 1.0, &label);
        }
        hline(&mut ops, left, self.table_right(), header_y);

        self.ops = ops;
        self.cursor_y = header_y;
    }

    pub fn row(&mut self, global_index: usize, row: &StudentRow) {
        let row_h = self.geom.row_height;
        let y = self.cursor_y - row_h;
        let left = self.geom.margin;
        let right = self.table_right();
        let mut ops = std::mem::take(&mut self.ops);

        if is_shaded(global_index) {
            fill_rect(&mut ops, SHADE, left, y, right - left, row_h);
        }
        for col in &self.plan.columns {
            let size = self.column_font_size(col);
            let raw = match col.kind {
                ColumnKind::Roll => row.roll_number.clone(),
                ColumnKind::Name => row.display_name.clone(),
                ColumnKind::Axis(i) => row
                    .cells
                    .get(i)
                    .map(|c| cell_text(c, self.style))
                    .unwrap_or_default(),
                ColumnKind::Summary => summary_text(row, self.style),
            };
            let text = fit_text(&raw, col.width, size);
            text_op(&mut ops, "F1", size, col.x + 1.0, y + (row_h - size) / 2.0 + 1.0, &text);
        }

        self.ops = ops;
        self.cursor_y = y;
    }

    /// Closes the current page. The last page also gets the footer summary.
    pub fn end_page(&mut self, summary: Option<&ReportSummary>) -> ReportResult<()> {
        let mut ops = std::mem::take(&mut self.ops);
        let left = self.geom.margin;
        let right = self.table_right();
        hline(&mut ops, left, right, self.cursor_y);

        if let Some(summary) = summary {
            let row_h = self.geom.row_height;
            let mut y = self.cursor_y;
            if self.style == CellStyle::DayMarks {
                y -= row_h;
                for col in &self.plan.columns {
                    let size = self.column_font_size(col);
                    let text = match col.kind {
                        ColumnKind::Name => "Present (class)".to_string(),
                        ColumnKind::Axis(i) => summary
                            .column_totals
                            .get(i)
                            .map(|t| t.present.to_string())
                            .unwrap_or_default(),
                        _ => continue,
                    };
                    let text = fit_text(&text, col.width, size);
                    text_op(&mut ops, "F2", size, col.x + 1.0, y + (row_h - size) / 2.0 + 1.0, &text);
                }
            }
            text_op(
                &mut ops,
                "F2",
                BODY_FONT_SIZE,
                left,
                y - 12.0,
                &format!(
                    "Students: {}    Columns: {}    Overall average: {:.2}%",
                    summary.total_students,
                    summary.total_columns,
                    summary.overall_average_percentage
                ),
            );
        }

        let content = Content { operations: ops };
        let content_id = self
            .doc
            .add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "Contents" => content_id,
        });
        self.kids.push(page_id.into());
        Ok(())
    }

    pub fn finish(mut self) -> Document {
        let count = self.kids.len() as i64;
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => self.kids,
            "Count" => count,
            "Resources" => self.resources_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                self.geom.page_width.into(),
                self.geom.page_height.into(),
            ],
        };
        self.doc.objects.insert(self.pages_id, Object::Dictionary(pages));
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        let info_id = self.doc.add_object(dictionary! {
            "Title" => win_ansi(&pdf_safe(&self.heading.title)),
            "Producer" => Object::string_literal(concat!("attendd ", env!("CARGO_PKG_VERSION"))),
            "CreationDate" => Object::string_literal(format!(
                "D:{}",
                self.heading.generated_at.format("%Y%m%d%H%M%S")
            )),
        });
        self.doc.trailer.set("Root", catalog_id);
        self.doc.trailer.set("Info", info_id);
        self.doc
    }
}
