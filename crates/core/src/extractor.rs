use crate::backends::{LayoutTableBackend, LopdfTextBackend};
use crate::error::IngestError;
use crate::models::{BoundingBox, ImageDescriptor, PageMetadata, PageRecord, NOT_AVAILABLE};
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};

pub type TableRow = Vec<Option<String>>;

/// Rows of a detected table; row 0 is the header.
pub type Table = Vec<TableRow>;

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedImage {
    pub extension: String,
    pub bbox: Option<BoundingBox>,
    /// Raw image bytes, `None` when the backend could not obtain any.
    pub data: Option<Vec<u8>>,
}

/// Primary backend: page text and embedded images.
pub trait TextBackend {
    fn page_count(&self) -> u32;
    fn page_text(&self, page_number: u32) -> Result<String, IngestError>;
    fn page_images(&self, page_number: u32) -> Result<Vec<EmbeddedImage>, IngestError>;
}

/// Secondary backend: tables only.
pub trait TableBackend {
    fn page_tables(&self, page_number: u32) -> Result<Vec<Table>, IngestError>;
}

pub trait PdfExtractor {
    fn extract_pages(&self, pdf_path: &Path, image_dir: &Path) -> Result<Vec<PageRecord>, IngestError>;
}

/// Opens the PDF twice, once per backend, and fuses their output page by page.
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, pdf_path: &Path, image_dir: &Path) -> Result<Vec<PageRecord>, IngestError> {
        fs::create_dir_all(image_dir)?;
        if !pdf_path.exists() {
            return Err(IngestError::FileNotFound(pdf_path.to_path_buf()));
        }

        let text_backend = LopdfTextBackend::open(pdf_path)?;
        let table_backend = LayoutTableBackend::open(pdf_path)?;

        Ok(extract_with_backends(
            &text_backend,
            &table_backend,
            &pdf_path.to_string_lossy(),
            image_dir,
        ))
    }
}

/// Runs `extractor`, logging and swallowing document-level failures.
///
/// Returns an empty sequence when the PDF is missing or cannot be opened.
pub fn extract_page_records(
    extractor: &dyn PdfExtractor,
    pdf_path: &Path,
    image_dir: &Path,
) -> Vec<PageRecord> {
    match extractor.extract_pages(pdf_path, image_dir) {
        Ok(pages) => pages,
        Err(IngestError::FileNotFound(path)) => {
            error!(path = %path.display(), "pdf file not found");
            Vec::new()
        }
        Err(error) => {
            error!(path = %pdf_path.display(), %error, "could not open or parse pdf");
            Vec::new()
        }
    }
}

/// Produces one record per page; a failing page never stops the rest.
pub fn extract_with_backends(
    text_backend: &dyn TextBackend,
    table_backend: &dyn TableBackend,
    source: &str,
    image_dir: &Path,
) -> Vec<PageRecord> {
    let total = text_backend.page_count();
    info!(source, pages = total, "parsing pdf");

    let records = (1..=total)
        .map(|page_number| extract_page(text_backend, table_backend, page_number, source, image_dir))
        .collect();

    info!(source, pages = total, "finished parsing pdf");
    records
}

#[derive(Default)]
struct PageDraft {
    content: String,
    tables: Vec<String>,
    images: Vec<ImageDescriptor>,
}

fn extract_page(
    text_backend: &dyn TextBackend,
    table_backend: &dyn TableBackend,
    page_number: u32,
    source: &str,
    image_dir: &Path,
) -> PageRecord {
    let mut draft = PageDraft::default();

    let parsing_error = match fill_page(&mut draft, text_backend, table_backend, page_number, image_dir) {
        Ok(()) => None,
        Err(error) => {
            warn!(page = page_number, %error, "error processing page");
            Some(error.to_string())
        }
    };

    if draft.content.trim().is_empty() {
        draft.content = match &parsing_error {
            Some(details) => format!(
                "Error: Could not extract content from page {page_number}. Error details: {details}"
            ),
            None => blank_page_content(page_number),
        };
    }

    PageRecord {
        page_content: draft.content,
        metadata: PageMetadata {
            page: page_number,
            source: source.to_string(),
            tables: draft.tables,
            images: draft.images,
            parsing_error,
        },
    }
}

fn fill_page(
    draft: &mut PageDraft,
    text_backend: &dyn TextBackend,
    table_backend: &dyn TableBackend,
    page_number: u32,
    image_dir: &Path,
) -> Result<(), IngestError> {
    let text = text_backend.page_text(page_number)?;
    let table_blocks: Vec<String> = table_backend
        .page_tables(page_number)?
        .iter()
        .filter_map(|table| render_markdown_table(table))
        .map(|markdown| table_block(page_number, &markdown))
        .collect();

    draft.content = text + &table_blocks.join("\n");
    draft.tables = table_blocks
        .iter()
        .map(|block| block.trim().to_string())
        .collect();

    for (index, image) in text_backend.page_images(page_number)?.into_iter().enumerate() {
        let descriptor = save_image(image, index, page_number, image_dir)?;
        draft.images.push(descriptor);
    }

    if !draft.images.is_empty() {
        draft.content.push_str(&image_block(page_number, &draft.images));
    }

    Ok(())
}

fn save_image(
    image: EmbeddedImage,
    index: usize,
    page_number: u32,
    image_dir: &Path,
) -> Result<ImageDescriptor, IngestError> {
    let filename = format!("page_{page_number}_img_{}.{}", index + 1, image.extension);
    let bbox = image
        .bbox
        .map(|bbox| bbox.to_string())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());

    let path = match image.data {
        Some(bytes) => {
            let target = image_dir.join(&filename);
            fs::write(&target, bytes)?;
            target.to_string_lossy().into_owned()
        }
        None => {
            warn!(
                page = page_number,
                image = index + 1,
                "image has no data, not saving file"
            );
            NOT_AVAILABLE.to_string()
        }
    };

    Ok(ImageDescriptor {
        filename,
        path,
        bbox,
        page_num: page_number,
    })
}

/// Renders a table as Markdown with row 0 as the header; `None` cells become empty.
///
/// Returns `None` for a table without rows.
pub fn render_markdown_table(table: &[TableRow]) -> Option<String> {
    let (header, rows) = table.split_first()?;

    let render_row = |row: &TableRow| {
        let cells: Vec<&str> = row.iter().map(|cell| cell.as_deref().unwrap_or("")).collect();
        format!("| {} |", cells.join(" | "))
    };

    let mut lines = Vec::with_capacity(table.len() + 1);
    lines.push(render_row(header));
    lines.push(format!("{}|", "|---".repeat(header.len())));
    lines.extend(rows.iter().map(render_row));
    Some(lines.join("\n"))
}

/// Content for a page that yields no text, tables or images.
fn blank_page_content(page_number: u32) -> String {
    format!("Page {page_number} has no extractable text, tables or images.")
}

fn table_block(page_number: u32, markdown: &str) -> String {
    format!("\n--- Table on Page {page_number} ---\n{markdown}\n-----------------------------\n")
}

fn image_block(page_number: u32, images: &[ImageDescriptor]) -> String {
    let mut block = format!("\n\n--- Images on Page {page_number} ---\n");
    for image in images {
        block.push_str(&format!(
            "Image '{}' found at coordinates {}.\n",
            image.filename, image.bbox
        ));
    }
    block.push_str("--------------------------------\n");
    block
}
