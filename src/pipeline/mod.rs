//! Pipeline stages for document-to-text extraction.
//!
//! Each submodule implements exactly one step. External engines sit behind
//! the traits in [`text_layer`], [`render`], [`ocr`] and [`office`] so the
//! orchestrator can be driven by stubs in tests.
//!
//! ## Data Flow
//!
//! ```text
//! bytes ──▶ classify ──▶ text_layer ──┬──────────────────────────────▶ assemble
//!                                     ├─▶ render ──▶ ocr (preprocess,  ▲
//!                                     │              normalize) ───────┤
//!                                     └─▶ office ──▶ text_layer ───────┘
//! ```
//!
//! 1. [`classify`]   : magic bytes (+ declared hints) → `DocumentKind`
//! 2. [`text_layer`] : embedded PDF text per page; DOCX paragraphs/tables
//! 3. [`render`]     : rasterise thin pages; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 4. [`preprocess`] : grayscale, resample, deskew, contrast, binarise
//! 5. [`ocr`]        : engine call under the capacity pool, with deadline
//!    and low-yield retry
//! 6. [`office`]     : legacy DOC → DOCX through an external converter
//! 7. [`normalize`]  : deterministic cleanup of OCR output
//! 8. [`assemble`]   : ordered join, status and document-level failure

pub mod assemble;
pub mod classify;
pub mod normalize;
pub mod ocr;
pub mod office;
pub mod preprocess;
pub mod render;
pub mod text_layer;
