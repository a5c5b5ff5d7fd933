//! Configuration types for document-to-text extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Every knob lives in one struct so a
//! config can be shared across tasks, logged, and compared between runs.
//! The CLI maps each field onto a flag with an environment-variable fallback.

use crate::error::ExtractError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the extraction pipeline.
///
/// # Example
/// ```rust
/// use edgequake_doc2text::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .max_workers(4)
///     .min_text_density(2.0)
///     .default_language("eng+heb")
///     .build()
///     .unwrap();
/// assert_eq!(config.max_workers, 4);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Size of the shared engine-capacity pool. Default: number of CPUs.
    ///
    /// Every rasterise+OCR unit and every office conversion holds one permit
    /// while it runs, across all documents an `Extractor` is processing.
    pub max_workers: usize,

    /// Documents in flight per batch call. Default: `max_workers`.
    pub batch_concurrency: usize,

    /// OCR units in flight per document, and the number of pages rendered
    /// per rasterisation call. Default: 4.
    ///
    /// Still bounded by `max_workers` through the shared pool; this keeps one
    /// large scanned PDF from queueing (or holding bitmaps for) every page at
    /// once.
    pub page_concurrency: usize,

    /// Minimum non-whitespace characters per square inch for a PDF page's
    /// text layer to be trusted. Default: 1.0.
    ///
    /// A US Letter page is 93.5 in², so the default asks for roughly 94
    /// characters. Pages at or below the threshold are rasterised and OCR'd.
    pub min_text_density: f32,

    /// OCR language used when a document carries no hint. Default: "eng".
    pub default_language: String,

    /// Per-OCR-call deadline in seconds. Default: 60.
    pub ocr_timeout_secs: u64,

    /// Per-conversion deadline in seconds. Default: 30.
    pub conversion_timeout_secs: u64,

    /// Rasterisation DPI for scanned PDF pages. Range: 72–600. Default: 300.
    pub dpi: u32,

    /// Longest edge cap for rasterised pages in pixels. Default: 4000.
    pub max_rendered_pixels: u32,

    /// Apply image pre-processing before OCR. Default: true.
    pub preprocess: bool,

    /// Luma threshold used to binarise images before OCR. Default: 150.
    pub binarize_threshold: u8,

    /// Images whose longest edge is shorter than this are upscaled before
    /// OCR. Default: 1600.
    pub ocr_min_edge_px: u32,

    /// Below this many recognised characters the adapter retries with a
    /// single-block layout and then the unprocessed image. 0 disables.
    /// Default: 50.
    pub ocr_retry_min_chars: usize,

    /// Inserted between units in the aggregated text. Default: blank line.
    pub unit_separator: String,

    /// Largest single document accepted, in bytes. Default: 64 MiB.
    pub max_document_bytes: usize,

    /// Largest batch accepted. Default: 64 documents.
    pub max_batch_documents: usize,

    /// Largest total batch payload, in bytes. Default: 256 MiB.
    pub max_batch_bytes: usize,

    /// OCR executable. Default: "tesseract".
    pub tesseract_bin: String,

    /// Language-pack directory passed to the OCR engine (`--tessdata-dir`).
    pub tessdata_dir: Option<PathBuf>,

    /// Office converter executable. Default: "libreoffice".
    pub libreoffice_bin: String,

    /// pdfium shared library (file or directory). Uses the system library when unset.
    pub pdfium_lib_path: Option<PathBuf>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            max_workers: workers,
            batch_concurrency: workers,
            page_concurrency: 4,
            min_text_density: 1.0,
            default_language: "eng".to_string(),
            ocr_timeout_secs: 60,
            conversion_timeout_secs: 30,
            dpi: 300,
            max_rendered_pixels: 4000,
            preprocess: true,
            binarize_threshold: 150,
            ocr_min_edge_px: 1600,
            ocr_retry_min_chars: 50,
            unit_separator: "\n\n".to_string(),
            max_document_bytes: 64 * 1024 * 1024,
            max_batch_documents: 64,
            max_batch_bytes: 256 * 1024 * 1024,
            tesseract_bin: "tesseract".to_string(),
            tessdata_dir: None,
            libreoffice_bin: "libreoffice".to_string(),
            pdfium_lib_path: None,
        }
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    /// Also resets `batch_concurrency` to the same value; call
    /// [`Self::batch_concurrency`] afterwards to override it.
    pub fn max_workers(mut self, n: usize) -> Self {
        self.config.max_workers = n.max(1);
        self.config.batch_concurrency = self.config.max_workers;
        self
    }

    pub fn batch_concurrency(mut self, n: usize) -> Self {
        self.config.batch_concurrency = n.max(1);
        self
    }

    pub fn page_concurrency(mut self, n: usize) -> Self {
        self.config.page_concurrency = n.max(1);
        self
    }

    pub fn min_text_density(mut self, density: f32) -> Self {
        self.config.min_text_density = density;
        self
    }

    pub fn default_language(mut self, lang: impl Into<String>) -> Self {
        self.config.default_language = lang.into();
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs;
        self
    }

    pub fn conversion_timeout_secs(mut self, secs: u64) -> Self {
        self.config.conversion_timeout_secs = secs;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn preprocess(mut self, v: bool) -> Self {
        self.config.preprocess = v;
        self
    }

    pub fn binarize_threshold(mut self, t: u8) -> Self {
        self.config.binarize_threshold = t;
        self
    }

    pub fn ocr_min_edge_px(mut self, px: u32) -> Self {
        self.config.ocr_min_edge_px = px;
        self
    }

    pub fn ocr_retry_min_chars(mut self, n: usize) -> Self {
        self.config.ocr_retry_min_chars = n;
        self
    }

    pub fn unit_separator(mut self, sep: impl Into<String>) -> Self {
        self.config.unit_separator = sep.into();
        self
    }

    pub fn max_document_bytes(mut self, n: usize) -> Self {
        self.config.max_document_bytes = n;
        self
    }

    pub fn max_batch_documents(mut self, n: usize) -> Self {
        self.config.max_batch_documents = n;
        self
    }

    pub fn max_batch_bytes(mut self, n: usize) -> Self {
        self.config.max_batch_bytes = n;
        self
    }

    pub fn tesseract_bin(mut self, bin: impl Into<String>) -> Self {
        self.config.tesseract_bin = bin.into();
        self
    }

    pub fn tessdata_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.tessdata_dir = Some(dir.into());
        self
    }

    pub fn libreoffice_bin(mut self, bin: impl Into<String>) -> Self {
        self.config.libreoffice_bin = bin.into();
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let c = &self.config;
        if !c.min_text_density.is_finite() || c.min_text_density < 0.0 {
            return Err(ExtractError::InvalidConfig(format!(
                "min_text_density must be a finite value ≥ 0, got {}",
                c.min_text_density
            )));
        }
        if c.default_language.trim().is_empty() {
            return Err(ExtractError::InvalidConfig(
                "default_language must not be empty".into(),
            ));
        }
        if c.ocr_timeout_secs == 0 || c.conversion_timeout_secs == 0 {
            return Err(ExtractError::InvalidConfig(
                "Timeouts must be ≥ 1 second".into(),
            ));
        }
        if c.max_batch_documents == 0 {
            return Err(ExtractError::InvalidConfig(
                "max_batch_documents must be ≥ 1".into(),
            ));
        }
        if c.max_document_bytes > c.max_batch_bytes {
            return Err(ExtractError::InvalidConfig(format!(
                "max_document_bytes ({}) exceeds max_batch_bytes ({})",
                c.max_document_bytes, c.max_batch_bytes
            )));
        }
        Ok(self.config)
    }
}
