//! Text-layer extraction: read embedded text without rasterising.
//!
//! PDFs are parsed with `lopdf`, which is pure Rust: digital documents never
//! need the pdfium shared library. Each page comes back with its geometry so
//! the orchestrator can judge whether the text is dense enough to trust.
//!
//! DOCX text comes from `docx-rs`: paragraphs in document order, tables
//! flattened to one line per row.

use lopdf::{Document as PdfDocument, Object, ObjectId};
use tracing::{debug, warn};

/// US Letter in PDF points, used when a page carries no usable MediaBox.
const DEFAULT_PAGE_SIZE_PT: (f32, f32) = (612.0, 792.0);
const POINTS_PER_INCH: f32 = 72.0;

/// Embedded text and geometry of one PDF page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    /// 0-based page index.
    pub index: usize,
    pub text: String,
    pub width_pt: f32,
    pub height_pt: f32,
}

impl PageText {
    /// Page area in square inches.
    pub fn area_sq_in(&self) -> f32 {
        (self.width_pt / POINTS_PER_INCH) * (self.height_pt / POINTS_PER_INCH)
    }

    /// Non-whitespace characters per square inch.
    pub fn density(&self) -> f32 {
        let chars = self.text.chars().filter(|c| !c.is_whitespace()).count() as f32;
        let area = self.area_sq_in();
        if area <= f32::EPSILON {
            chars
        } else {
            chars / area
        }
    }

    /// Whether the text layer clears the density threshold.
    pub fn is_text_sufficient(&self, min_density: f32) -> bool {
        self.density() > min_density
    }
}

/// Capability provider for PDF text layers.
///
/// Called from `spawn_blocking`; implementations may block.
pub trait TextLayer: Send + Sync {
    /// Every page's embedded text in page order.
    fn pdf_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, String>;
}

/// Default text layer backed by `lopdf`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfTextLayer;

impl TextLayer for LopdfTextLayer {
    fn pdf_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, String> {
        let doc = PdfDocument::load_mem(bytes).map_err(|e| format!("{e}"))?;
        if doc.is_encrypted() {
            return Err("document is encrypted".to_string());
        }

        let pages = doc.get_pages();
        debug!("PDF text layer: {} pages", pages.len());

        let mut out = Vec::with_capacity(pages.len());
        for (index, (page_num, page_id)) in pages.into_iter().enumerate() {
            let text = match doc.extract_text(&[page_num]) {
                Ok(t) => t,
                Err(e) => {
                    // A page without a decodable content stream is treated
                    // as having no text layer; it will be OCR'd.
                    warn!("Page {}: text layer unreadable: {}", page_num, e);
                    String::new()
                }
            };
            let (width_pt, height_pt) = page_size(&doc, page_id).unwrap_or(DEFAULT_PAGE_SIZE_PT);
            out.push(PageText {
                index,
                text: text.trim_end().to_string(),
                width_pt,
                height_pt,
            });
        }
        Ok(out)
    }
}

/// MediaBox width/height, following `/Parent` for inherited boxes.
fn page_size(doc: &PdfDocument, page_id: ObjectId) -> Option<(f32, f32)> {
    let mut current = doc.get_dictionary(page_id).ok()?;
    // Page trees are shallow; the bound guards against reference cycles.
    for _ in 0..32 {
        if let Ok(obj) = current.get(b"MediaBox") {
            let arr = resolve(doc, obj).as_array().ok()?;
            if arr.len() != 4 {
                return None;
            }
            let nums: Vec<f32> = arr
                .iter()
                .filter_map(|o| resolve(doc, o).as_float().ok())
                .collect();
            if nums.len() != 4 {
                return None;
            }
            let (w, h) = ((nums[2] - nums[0]).abs(), (nums[3] - nums[1]).abs());
            return (w > 0.0 && h > 0.0).then_some((w, h));
        }
        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = doc.get_dictionary(parent).ok()?;
    }
    None
}

fn resolve<'a>(doc: &'a PdfDocument, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

// ── DOCX ─────────────────────────────────────────────────────────────────

/// Extract plain text from DOCX bytes.
pub fn docx_text(bytes: &[u8]) -> Result<String, String> {
    let docx = docx_rs::read_docx(bytes).map_err(|e| e.to_string())?;
    let mut lines: Vec<String> = Vec::new();
    for child in &docx.document.children {
        collect_document_child(&mut lines, child);
    }
    Ok(lines.join("\n"))
}

fn collect_document_child(lines: &mut Vec<String>, child: &docx_rs::DocumentChild) {
    match child {
        docx_rs::DocumentChild::Paragraph(para) => lines.push(paragraph_text(para)),
        docx_rs::DocumentChild::Table(table) => collect_table(lines, table),
        _ => {}
    }
}

fn collect_table(lines: &mut Vec<String>, table: &docx_rs::Table) {
    for row in &table.rows {
        let docx_rs::TableChild::TableRow(tr) = row;
        let mut cells = Vec::new();
        for cell in &tr.cells {
            let docx_rs::TableRowChild::TableCell(tc) = cell;
            let mut parts = Vec::new();
            for content in &tc.children {
                if let docx_rs::TableCellContent::Paragraph(p) = content {
                    let t = paragraph_text(p);
                    if !t.is_empty() {
                        parts.push(t);
                    }
                }
            }
            cells.push(parts.join(" "));
        }
        if cells.iter().any(|c| !c.is_empty()) {
            lines.push(cells.join(" | "));
        }
    }
}

fn paragraph_text(para: &docx_rs::Paragraph) -> String {
    let mut text = String::new();
    for child in &para.children {
        match child {
            docx_rs::ParagraphChild::Run(run) => push_run(&mut text, run),
            docx_rs::ParagraphChild::Hyperlink(link) => {
                for child in &link.children {
                    if let docx_rs::ParagraphChild::Run(run) = child {
                        push_run(&mut text, run);
                    }
                }
            }
            _ => {}
        }
    }
    text
}

fn push_run(text: &mut String, run: &docx_rs::Run) {
    for child in &run.children {
        match child {
            docx_rs::RunChild::Text(t) => text.push_str(&t.text),
            docx_rs::RunChild::Tab(_) => text.push('\t'),
            docx_rs::RunChild::Break(_) => text.push('\n'),
            _ => {}
        }
    }
}
