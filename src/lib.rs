//! # edgequake-doc2text
//!
//! Extract plain text from PDFs, Word documents (DOCX and legacy DOC) and
//! images, falling back to OCR only where a document has no usable text.
//!
//! ## Why this crate?
//!
//! Most uploads are digital: their text is already embedded and reading it
//! is instant and exact. Some are scans, and many are both (a typed report
//! with a scanned signature page). This crate reads the embedded text layer
//! first and sends only the pages that lack one through rasterisation and
//! OCR, so digital pages are never degraded by recognition errors and
//! scanned pages are never silently empty.
//!
//! ## Pipeline Overview
//!
//! ```text
//! bytes
//!  │
//!  ├─ 1. Classify  magic bytes → pdf / docx / doc / image
//!  ├─ 2. Text      lopdf page text (+ density) / docx-rs paragraphs
//!  ├─ 3. Render    thin PDF pages via pdfium (spawn_blocking)
//!  ├─ 4. OCR       pre-process, tesseract, low-yield retry, cleanup
//!  ├─ 5. Convert   legacy .doc → .docx via LibreOffice
//!  └─ 6. Assemble  ordered join + status + warnings
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_doc2text::{Document, Extractor, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let extractor = Extractor::new(ExtractionConfig::default());
//!     let bytes = std::fs::read("contract.pdf")?;
//!     let result = extractor
//!         .extract(Document::new("contract.pdf", None, bytes))
//!         .await?;
//!     println!("{}", result.text);
//!     eprintln!("{} pages, {} OCR'd", result.stats.total_units, result.stats.ocr_units);
//!     Ok(())
//! }
//! ```
//!
//! ## External engines
//!
//! | Capability        | Default                        | Needed for                  |
//! |-------------------|--------------------------------|-----------------------------|
//! | PDF text layer    | `lopdf` (pure Rust)            | every PDF                   |
//! | PDF rasterisation | pdfium shared library          | scanned PDF pages           |
//! | OCR               | `tesseract` on `PATH`          | images, scanned PDF pages   |
//! | Conversion        | `libreoffice` on `PATH`        | legacy `.doc`               |
//!
//! Each sits behind a trait ([`TextLayer`], [`Rasterizer`], [`OcrEngine`],
//! [`OfficeConverter`]) and can be replaced through [`Extractor::builder`].
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `doc2text` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-doc2text = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod document;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;

#[cfg(test)]
mod test_support;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::BatchRequest;
pub use config::{ExtractionConfig, ExtractionConfigBuilder};
pub use document::{Base64Payload, BatchBase64Payload, Document, DocumentKind};
pub use error::{ConversionError, EngineError, ErrorKind, ExtractError, UnitError};
pub use extract::{Extractor, ExtractorBuilder};
pub use output::{
    BatchEntry, BatchResponse, BatchResult, ErrorDescriptor, ExtractionResponse,
    ExtractionResult, ExtractionStats, ExtractionStatus, ExtractionUnit, UnitSource,
};
pub use pipeline::classify::classify;
pub use pipeline::ocr::{Languages, OcrEngine, OcrRequest, TesseractEngine};
pub use pipeline::office::{LibreOfficeConverter, OfficeConverter};
pub use pipeline::render::{PdfiumRasterizer, Rasterizer, RenderError};
pub use pipeline::text_layer::{LopdfTextLayer, PageText, TextLayer};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
