//! Positional walk over a decoded page content stream.
//!
//! Tracks the graphics and text matrices closely enough to place text runs
//! and image draws on the page. Glyph widths are not read from font
//! programs; advances are estimated from the font size.

use crate::models::BoundingBox;
use lopdf::content::Operation;
use lopdf::Object;
use std::collections::HashMap;

/// Estimated glyph advance as a fraction of the font size.
const GLYPH_WIDTH_RATIO: f32 = 0.5;

/// TJ adjustments (thousandths of text space) at or below this count as a word break.
const TJ_SPACE_THRESHOLD: f32 = -200.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    a: f32,
    b: f32,
    c: f32,
    d: f32,
    e: f32,
    f: f32,
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    pub fn new(a: f32, b: f32, c: f32, d: f32, e: f32, f: f32) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub fn translation(tx: f32, ty: f32) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    /// `self × other` in PDF row-vector convention, i.e. apply `self` first.
    pub fn then(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    fn vertical_scale(&self) -> f32 {
        (self.c * self.c + self.d * self.d).sqrt()
    }

    /// Bounding box of the unit square mapped through this matrix.
    pub fn unit_square_bounds(&self) -> BoundingBox {
        let corners = [
            self.apply(0.0, 0.0),
            self.apply(1.0, 0.0),
            self.apply(0.0, 1.0),
            self.apply(1.0, 1.0),
        ];
        let mut bbox = BoundingBox {
            x0: f32::MAX,
            y0: f32::MAX,
            x1: f32::MIN,
            y1: f32::MIN,
        };
        for (x, y) in corners {
            bbox.x0 = bbox.x0.min(x);
            bbox.y0 = bbox.y0.min(y);
            bbox.x1 = bbox.x1.max(x);
            bbox.y1 = bbox.y1.max(y);
        }
        bbox
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub x: f32,
    pub y: f32,
    pub font_size: f32,
    pub text: String,
}

impl TextRun {
    pub fn estimated_end(&self) -> f32 {
        self.x + self.text.chars().count() as f32 * self.font_size * GLYPH_WIDTH_RATIO
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct PageLayout {
    pub runs: Vec<TextRun>,
    /// XObject name to the placement of its first draw.
    pub placements: HashMap<String, BoundingBox>,
}

struct TextState {
    matrix: Matrix,
    line_matrix: Matrix,
    font_size: f32,
    leading: f32,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            matrix: Matrix::IDENTITY,
            line_matrix: Matrix::IDENTITY,
            font_size: 12.0,
            leading: 0.0,
        }
    }
}

impl TextState {
    fn next_line(&mut self, tx: f32, ty: f32) {
        self.line_matrix = Matrix::translation(tx, ty).then(&self.line_matrix);
        self.matrix = self.line_matrix;
    }
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value as f32),
        _ => None,
    }
}

fn numbers<const N: usize>(operands: &[Object]) -> Option<[f32; N]> {
    if operands.len() < N {
        return None;
    }
    let mut values = [0f32; N];
    for (slot, operand) in values.iter_mut().zip(operands) {
        *slot = number(operand)?;
    }
    Some(values)
}

fn matrix_from(operands: &[Object]) -> Option<Matrix> {
    numbers::<6>(operands).map(|[a, b, c, d, e, f]| Matrix::new(a, b, c, d, e, f))
}

/// Decodes a PDF string operand: UTF-16BE when it carries a BOM, Latin-1 otherwise.
pub fn decode_pdf_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks(2)
            .filter(|pair| pair.len() == 2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes
        .iter()
        .map(|byte| char::from(*byte))
        .filter(|character| !character.is_control())
        .collect()
}

fn shown_text(operand: &Object) -> String {
    match operand {
        Object::String(bytes, _) => decode_pdf_string(bytes),
        Object::Array(items) => {
            let mut text = String::new();
            for item in items {
                match item {
                    Object::String(bytes, _) => text.push_str(&decode_pdf_string(bytes)),
                    other => {
                        if number(other).is_some_and(|adjust| adjust <= TJ_SPACE_THRESHOLD)
                            && !text.ends_with(' ')
                        {
                            text.push(' ');
                        }
                    }
                }
            }
            text
        }
        _ => String::new(),
    }
}

fn name_of(object: &Object) -> Option<String> {
    match object {
        Object::Name(name) => Some(String::from_utf8_lossy(name).into_owned()),
        _ => None,
    }
}

/// Walks `operations` and records every text run and XObject draw with its page position.
pub fn scan_operations(operations: &[Operation]) -> PageLayout {
    let mut layout = PageLayout::default();
    let mut ctm = Matrix::IDENTITY;
    let mut saved: Vec<Matrix> = Vec::new();
    let mut text = TextState::default();

    for operation in operations {
        let operands = operation.operands.as_slice();
        match operation.operator.as_str() {
            "q" => saved.push(ctm),
            "Q" => {
                if let Some(previous) = saved.pop() {
                    ctm = previous;
                }
            }
            "cm" => {
                if let Some(matrix) = matrix_from(operands) {
                    ctm = matrix.then(&ctm);
                }
            }
            "BT" => {
                text.matrix = Matrix::IDENTITY;
                text.line_matrix = Matrix::IDENTITY;
            }
            "Tf" => {
                if let Some(size) = operands.get(1).and_then(number) {
                    text.font_size = size.abs();
                }
            }
            "TL" => {
                if let Some([leading]) = numbers::<1>(operands) {
                    text.leading = leading;
                }
            }
            "Tm" => {
                if let Some(matrix) = matrix_from(operands) {
                    text.matrix = matrix;
                    text.line_matrix = matrix;
                }
            }
            "Td" => {
                if let Some([tx, ty]) = numbers::<2>(operands) {
                    text.next_line(tx, ty);
                }
            }
            "TD" => {
                if let Some([tx, ty]) = numbers::<2>(operands) {
                    text.leading = -ty;
                    text.next_line(tx, ty);
                }
            }
            "T*" => text.next_line(0.0, -text.leading),
            "Tj" | "TJ" => {
                if let Some(operand) = operands.first() {
                    show(&mut layout, &mut text, &ctm, shown_text(operand));
                }
            }
            "'" => {
                text.next_line(0.0, -text.leading);
                if let Some(operand) = operands.first() {
                    show(&mut layout, &mut text, &ctm, shown_text(operand));
                }
            }
            "\"" => {
                text.next_line(0.0, -text.leading);
                if let Some(operand) = operands.get(2) {
                    show(&mut layout, &mut text, &ctm, shown_text(operand));
                }
            }
            "Do" => {
                if let Some(name) = operands.first().and_then(name_of) {
                    layout
                        .placements
                        .entry(name)
                        .or_insert_with(|| ctm.unit_square_bounds());
                }
            }
            _ => {}
        }
    }

    layout
}

fn show(layout: &mut PageLayout, text: &mut TextState, ctm: &Matrix, shown: String) {
    let rendering = text.matrix.then(ctm);
    let advance = shown.chars().count() as f32 * text.font_size * GLYPH_WIDTH_RATIO;

    if !shown.trim().is_empty() {
        let (x, y) = rendering.apply(0.0, 0.0);
        layout.runs.push(TextRun {
            x,
            y,
            font_size: text.font_size * rendering.vertical_scale(),
            text: shown.trim().to_string(),
        });
    }

    text.matrix = Matrix::translation(advance, 0.0).then(&text.matrix);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_runs_follow_td_offsets() {
        let operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 10.into()]),
            Operation::new("Td", vec![72.into(), 700.into()]),
            Operation::new("Tj", vec![Object::string_literal("Name")]),
            Operation::new("Td", vec![0.into(), (-14).into()]),
            Operation::new("Tj", vec![Object::string_literal("Alice")]),
            Operation::new("ET", vec![]),
        ];

        let layout = scan_operations(&operations);

        assert_eq!(layout.runs.len(), 2);
        assert_eq!(layout.runs[0].text, "Name");
        assert_eq!((layout.runs[0].x, layout.runs[0].y), (72.0, 700.0));
        assert_eq!((layout.runs[1].x, layout.runs[1].y), (72.0, 686.0));
        assert_eq!(layout.runs[1].font_size, 10.0);
    }

    #[test]
    fn consecutive_shows_advance_horizontally() {
        let operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 10.into()]),
            Operation::new("Td", vec![100.into(), 500.into()]),
            Operation::new("Tj", vec![Object::string_literal("ab")]),
            Operation::new("Tj", vec![Object::string_literal("cd")]),
            Operation::new("ET", vec![]),
        ];

        let layout = scan_operations(&operations);

        assert_eq!(layout.runs[1].x, 110.0);
    }

    #[test]
    fn image_draw_records_transformed_bounds() {
        let operations = vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    200.into(),
                    0.into(),
                    0.into(),
                    100.into(),
                    50.into(),
                    400.into(),
                ],
            ),
            Operation::new("Do", vec!["Im1".into()]),
            Operation::new("Q", vec![]),
            Operation::new("Do", vec!["Im2".into()]),
        ];

        let layout = scan_operations(&operations);

        let first = layout.placements["Im1"];
        assert_eq!(
            first,
            BoundingBox {
                x0: 50.0,
                y0: 400.0,
                x1: 250.0,
                y1: 500.0
            }
        );
        assert_eq!(layout.placements["Im2"].x1, 1.0);
    }

    #[test]
    fn tj_arrays_insert_spaces_on_large_gaps() {
        let operand = Object::Array(vec![
            Object::string_literal("Total"),
            (-250).into(),
            Object::string_literal("42"),
        ]);
        assert_eq!(shown_text(&operand), "Total 42");
    }

    #[test]
    fn utf16_strings_are_decoded() {
        assert_eq!(decode_pdf_string(&[0xFE, 0xFF, 0x00, 0x41, 0x00, 0xE9]), "Aé");
        assert_eq!(decode_pdf_string(b"plain"), "plain");
    }
}
