use crate::backends::content::{scan_operations, TextRun};
use crate::error::IngestError;
use crate::extractor::{Table, TableBackend, TableRow};
use lopdf::{Document, ObjectId};
use std::collections::BTreeMap;
use std::path::Path;

/// Runs whose baselines differ by at most this much share a line.
const BASELINE_TOLERANCE: f32 = 2.5;

/// Smallest distance allowed between a cell and its column anchor.
const MIN_COLUMN_TOLERANCE: f32 = 6.0;

/// Table backend that recovers grid-aligned text from run positions.
pub struct LayoutTableBackend {
    document: Document,
    pages: BTreeMap<u32, ObjectId>,
}

impl LayoutTableBackend {
    pub fn open(path: &Path) -> Result<Self, IngestError> {
        let document = Document::load(path)?;
        Ok(Self::from_document(document))
    }

    pub fn from_document(document: Document) -> Self {
        let pages = document.get_pages();
        Self { document, pages }
    }
}

impl TableBackend for LayoutTableBackend {
    fn page_tables(&self, page_number: u32) -> Result<Vec<Table>, IngestError> {
        let page_id = self.pages.get(&page_number).copied().ok_or_else(|| {
            IngestError::PdfParse(format!("page {page_number} is not in the page tree"))
        })?;
        let content = self.document.get_and_decode_page_content(page_id)?;
        let layout = scan_operations(&content.operations);
        Ok(detect_tables(&layout.runs))
    }
}

#[derive(Debug, Clone)]
struct Cell {
    x: f32,
    end: f32,
    font_size: f32,
    text: String,
}

fn group_lines(runs: &[TextRun]) -> Vec<Vec<TextRun>> {
    let mut ordered = runs.to_vec();
    ordered.sort_by(|left, right| {
        right
            .y
            .total_cmp(&left.y)
            .then_with(|| left.x.total_cmp(&right.x))
    });

    let mut lines: Vec<Vec<TextRun>> = Vec::new();
    for run in ordered {
        match lines.last_mut() {
            Some(line) if (line[0].y - run.y).abs() <= BASELINE_TOLERANCE => line.push(run),
            _ => lines.push(vec![run]),
        }
    }

    for line in &mut lines {
        line.sort_by(|left, right| left.x.total_cmp(&right.x));
    }
    lines
}

/// Merges runs separated by less than one em into a single cell.
fn line_cells(line: &[TextRun]) -> Vec<Cell> {
    let mut cells: Vec<Cell> = Vec::new();
    for run in line {
        if let Some(last) = cells.last_mut() {
            if run.x - last.end < run.font_size.max(1.0) {
                last.text.push(' ');
                last.text.push_str(&run.text);
                last.end = run.estimated_end();
                continue;
            }
        }
        cells.push(Cell {
            x: run.x,
            end: run.estimated_end(),
            font_size: run.font_size,
            text: run.text.clone(),
        });
    }
    cells
}

fn nearest_column(anchors: &[f32], x: f32) -> Option<(usize, f32)> {
    anchors
        .iter()
        .enumerate()
        .map(|(index, anchor)| (index, (anchor - x).abs()))
        .min_by(|left, right| left.1.total_cmp(&right.1))
}

fn aligns(cells: &[Cell], anchors: &[f32]) -> bool {
    cells.iter().all(|cell| {
        let tolerance = cell.font_size.max(MIN_COLUMN_TOLERANCE);
        nearest_column(anchors, cell.x).is_some_and(|(_, distance)| distance <= tolerance)
    })
}

fn block_to_table(block: &[Vec<Cell>], anchors: &[f32]) -> Table {
    block
        .iter()
        .map(|cells| {
            let mut row: TableRow = vec![None; anchors.len()];
            for cell in cells {
                if let Some((column, _)) = nearest_column(anchors, cell.x) {
                    match &mut row[column] {
                        Some(existing) => {
                            existing.push(' ');
                            existing.push_str(&cell.text);
                        }
                        slot => *slot = Some(cell.text.clone()),
                    }
                }
            }
            row
        })
        .collect()
}

/// Finds runs of at least two consecutive multi-cell lines whose cells line up
/// with the first line's columns. Cells absent from a row are `None`.
pub fn detect_tables(runs: &[TextRun]) -> Vec<Table> {
    let mut tables = Vec::new();
    let mut block: Vec<Vec<Cell>> = Vec::new();
    let mut anchors: Vec<f32> = Vec::new();

    let mut flush = |block: &mut Vec<Vec<Cell>>, anchors: &[f32]| {
        if block.len() >= 2 {
            tables.push(block_to_table(block, anchors));
        }
        block.clear();
    };

    for line in group_lines(runs) {
        let cells = line_cells(&line);

        if cells.len() < 2 {
            flush(&mut block, &anchors);
            continue;
        }

        if !block.is_empty() && aligns(&cells, &anchors) {
            block.push(cells);
            continue;
        }

        flush(&mut block, &anchors);
        anchors = cells.iter().map(|cell| cell.x).collect();
        block.push(cells);
    }
    flush(&mut block, &anchors);

    tables
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(x: f32, y: f32, text: &str) -> TextRun {
        TextRun {
            x,
            y,
            font_size: 10.0,
            text: text.to_string(),
        }
    }

    fn cells(row: &[Option<&str>]) -> TableRow {
        row.iter().map(|cell| cell.map(str::to_string)).collect()
    }

    #[test]
    fn aligned_rows_form_a_table_with_missing_cells() {
        let runs = vec![
            run(72.0, 760.0, "Economic outlook"),
            run(72.0, 700.0, "Region"),
            run(200.0, 700.0, "2024"),
            run(300.0, 700.0, "2025"),
            run(72.0, 686.0, "Europe"),
            run(300.0, 686.0, "1.2"),
            run(72.0, 672.0, "Asia"),
            run(200.4, 672.0, "4.5"),
            run(300.0, 672.0, "4.1"),
            run(72.0, 640.0, "Growth"),
            run(100.0, 640.0, "remains"),
            run(140.0, 640.0, "subdued."),
        ];

        let tables = detect_tables(&runs);

        assert_eq!(tables.len(), 1);
        assert_eq!(
            tables[0],
            vec![
                cells(&[Some("Region"), Some("2024"), Some("2025")]),
                cells(&[Some("Europe"), None, Some("1.2")]),
                cells(&[Some("Asia"), Some("4.5"), Some("4.1")]),
            ]
        );
    }

    #[test]
    fn prose_lines_are_not_tables() {
        let runs = vec![
            run(72.0, 700.0, "The"),
            run(92.0, 700.0, "quick"),
            run(122.0, 700.0, "fox"),
            run(72.0, 686.0, "jumps"),
            run(102.0, 686.0, "over"),
        ];

        assert!(detect_tables(&runs).is_empty());
    }

    #[test]
    fn misaligned_row_starts_a_new_block() {
        let runs = vec![
            run(72.0, 700.0, "A"),
            run(200.0, 700.0, "B"),
            run(72.0, 686.0, "1"),
            run(200.0, 686.0, "2"),
            run(72.0, 650.0, "x"),
            run(400.0, 650.0, "y"),
        ];

        let tables = detect_tables(&runs);

        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].len(), 2);
    }
}
