//! Extraction orchestrator: the per-document dispatch on [`DocumentKind`].
//!
//! ## PDF strategy
//!
//! ```text
//! text layer (lopdf) ──▶ density per page ──┬─ > threshold ─▶ keep text verbatim
//!                                           └─ ≤ threshold ─▶ rasterise ─▶ OCR
//! ```
//!
//! Mixed documents are common (a typed report with scanned appendices), so
//! the decision is made per page rather than per document. Pages that need
//! OCR are rendered in chunks of `page_concurrency` (one blocking call per
//! chunk) and each chunk is recognised concurrently with `buffer_unordered`;
//! the assembly step restores page order.
//!
//! Every engine call holds a permit of the extractor-wide capacity pool, so
//! one `Extractor` shared across concurrent requests never runs more than
//! `max_workers` rasterise/OCR/convert jobs at once.

use crate::config::ExtractionConfig;
use crate::document::{Base64Payload, Document, DocumentKind};
use crate::error::{ConversionError, ErrorKind, ExtractError, UnitError};
use crate::output::{ExtractionResult, ExtractionUnit, UnitSource};
use crate::pipeline::assemble::assemble;
use crate::pipeline::classify::{classify, declared_hint};
use crate::pipeline::normalize::significant_chars;
use crate::pipeline::ocr::{Languages, OcrAdapter, OcrEngine, OcrSettings, TesseractEngine};
use crate::pipeline::office::{LibreOfficeConverter, OfficeConverter};
use crate::pipeline::preprocess::PreprocessOptions;
use crate::pipeline::render::{PdfiumRasterizer, Rasterizer, RenderError};
use crate::pipeline::text_layer::{docx_text, LopdfTextLayer, TextLayer};
use futures::stream::{self, StreamExt};
use image::DynamicImage;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, info, warn};

type RenderedPages = Vec<(usize, Result<DynamicImage, String>)>;

/// Document-to-text extractor.
///
/// Cheap to clone: clones share the engines, the capacity pool and the
/// memoised OCR language registry.
///
/// # Example
/// ```rust,no_run
/// use edgequake_doc2text::{Document, Extractor, ExtractionConfig};
///
/// # async fn run() -> Result<(), edgequake_doc2text::ExtractError> {
/// let extractor = Extractor::new(ExtractionConfig::default());
/// let bytes = std::fs::read("scan.pdf").unwrap();
/// let result = extractor
///     .extract(Document::new("scan.pdf", None, bytes).with_language("eng"))
///     .await?;
/// println!("{}", result.text);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Extractor {
    inner: Arc<Inner>,
}

struct Inner {
    config: ExtractionConfig,
    text_layer: Arc<dyn TextLayer>,
    rasterizer: Arc<dyn Rasterizer>,
    office: Arc<dyn OfficeConverter>,
    ocr: OcrAdapter,
    permits: Arc<Semaphore>,
}

/// Builder for [`Extractor`]; any engine left unset gets its default
/// provider built from the config.
#[derive(Default)]
pub struct ExtractorBuilder {
    config: ExtractionConfig,
    text_layer: Option<Arc<dyn TextLayer>>,
    rasterizer: Option<Arc<dyn Rasterizer>>,
    ocr_engine: Option<Arc<dyn OcrEngine>>,
    office: Option<Arc<dyn OfficeConverter>>,
}

impl ExtractorBuilder {
    pub fn config(mut self, config: ExtractionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn text_layer(mut self, text_layer: Arc<dyn TextLayer>) -> Self {
        self.text_layer = Some(text_layer);
        self
    }

    pub fn rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.rasterizer = Some(rasterizer);
        self
    }

    pub fn ocr_engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.ocr_engine = Some(engine);
        self
    }

    pub fn office_converter(mut self, office: Arc<dyn OfficeConverter>) -> Self {
        self.office = Some(office);
        self
    }

    pub fn build(self) -> Extractor {
        let config = self.config;
        let permits = Arc::new(Semaphore::new(config.max_workers.max(1)));

        let text_layer = self
            .text_layer
            .unwrap_or_else(|| Arc::new(LopdfTextLayer));
        let rasterizer = self.rasterizer.unwrap_or_else(|| {
            Arc::new(PdfiumRasterizer::new(
                config.pdfium_lib_path.clone(),
                config.dpi,
                config.max_rendered_pixels,
            ))
        });
        let engine = self.ocr_engine.unwrap_or_else(|| {
            Arc::new(TesseractEngine::new(
                config.tesseract_bin.clone(),
                config.tessdata_dir.clone(),
            ))
        });
        let office = self
            .office
            .unwrap_or_else(|| Arc::new(LibreOfficeConverter::new(config.libreoffice_bin.clone())));

        let ocr = OcrAdapter::new(
            engine,
            Arc::clone(&permits),
            OcrSettings {
                timeout: Duration::from_secs(config.ocr_timeout_secs),
                preprocess: config.preprocess.then_some(PreprocessOptions {
                    min_edge_px: config.ocr_min_edge_px,
                    binarize_threshold: config.binarize_threshold,
                }),
                retry_min_chars: config.ocr_retry_min_chars,
            },
        );

        Extractor {
            inner: Arc::new(Inner {
                config,
                text_layer,
                rasterizer,
                office,
                ocr,
                permits,
            }),
        }
    }
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(ExtractionConfig::default())
    }
}

impl Extractor {
    /// Extractor with the default engines.
    pub fn new(config: ExtractionConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn builder() -> ExtractorBuilder {
        ExtractorBuilder::default()
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.inner.config
    }

    /// Decode a base64 request body and extract it.
    pub async fn extract_base64(
        &self,
        payload: Base64Payload,
    ) -> Result<ExtractionResult, ExtractError> {
        self.extract(payload.into_document()?).await
    }

    /// Extract the text of one document.
    pub async fn extract(&self, doc: Document) -> Result<ExtractionResult, ExtractError> {
        let start = Instant::now();
        let cfg = &self.inner.config;

        if doc.len() > cfg.max_document_bytes {
            return Err(ExtractError::InvalidRequest(format!(
                "'{}' is {} bytes, limit is {}",
                doc.filename(),
                doc.len(),
                cfg.max_document_bytes
            )));
        }

        let kind = classify(doc.filename(), doc.content_type(), doc.bytes());
        if kind == DocumentKind::Unknown {
            return Err(unsupported(&doc));
        }
        let languages = Languages::parse(doc.language().unwrap_or(&cfg.default_language))?;

        info!(
            filename = doc.filename(),
            kind = %kind,
            bytes = doc.len(),
            "Extracting"
        );

        let result = match kind {
            DocumentKind::Pdf => self.extract_pdf(&doc, &languages).await,
            DocumentKind::Docx => self.extract_docx(&doc).await,
            DocumentKind::LegacyDoc => self.extract_legacy_doc(&doc).await,
            DocumentKind::Image => self.extract_image(&doc, &languages).await,
            DocumentKind::Unknown => Err(unsupported(&doc)),
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(r) => info!(
                filename = doc.filename(),
                kind = %kind,
                units = r.stats.total_units,
                ocr_units = r.stats.ocr_units,
                failed_units = r.stats.failed_units,
                elapsed_ms,
                "Extraction complete"
            ),
            Err(e) => warn!(
                filename = doc.filename(),
                kind = %kind,
                error_kind = %e.kind(),
                elapsed_ms,
                "Extraction failed: {}",
                e
            ),
        }
        result
    }

    // ── PDF ──────────────────────────────────────────────────────────────

    async fn extract_pdf(
        &self,
        doc: &Document,
        languages: &Languages,
    ) -> Result<ExtractionResult, ExtractError> {
        let cfg = &self.inner.config;
        let mut warnings = Vec::new();
        let mut units = Vec::new();
        // (page index, thin text-layer text) for every page that needs OCR
        let mut ocr_pages: Vec<(usize, String)> = Vec::new();

        let text_layer = Arc::clone(&self.inner.text_layer);
        let bytes = doc.bytes().clone();
        let layer = match tokio::task::spawn_blocking(move || text_layer.pdf_pages(&bytes)).await {
            Ok(layer) => layer,
            // lopdf panics on some malformed cross-reference tables.
            Err(e) => Err(format!("text layer parser crashed: {e}")),
        };
        match layer {
            Ok(pages) => {
                for page in pages {
                    if page.is_text_sufficient(cfg.min_text_density) {
                        units.push(ExtractionUnit::ok(page.index, UnitSource::TextLayer, page.text));
                    } else {
                        debug!(
                            page = page.index + 1,
                            density = page.density(),
                            "Text layer too thin, queued for OCR"
                        );
                        ocr_pages.push((page.index, page.text));
                    }
                }
            }
            Err(detail) => {
                warn!("Text layer unreadable for '{}': {}", doc.filename(), detail);
                let rasterizer = Arc::clone(&self.inner.rasterizer);
                let bytes = doc.bytes().clone();
                let count = blocking(move || rasterizer.page_count(&bytes))
                    .await?
                    .map_err(|e| match e {
                        RenderError::Unavailable(d) => ExtractError::EngineUnavailable {
                            engine: "pdfium".to_string(),
                            detail: d,
                        },
                        RenderError::CorruptPdf(d) => ExtractError::ExtractionFailed {
                            filename: doc.filename().to_string(),
                            stage: "text-layer",
                            detail: format!("{detail}; rasteriser: {d}"),
                            cause: None,
                        },
                    })?;
                warnings.push(format!("text layer unreadable ({detail}); every page was OCR'd"));
                ocr_pages = (0..count).map(|i| (i, String::new())).collect();
            }
        }

        info!(
            filename = doc.filename(),
            text_layer_pages = units.len(),
            ocr_pages = ocr_pages.len(),
            "PDF pages classified"
        );

        if !ocr_pages.is_empty() {
            self.inner.ocr.ensure_languages(languages).await?;
            units.extend(self.ocr_pdf_pages(doc, ocr_pages, languages).await?);
        }

        assemble(doc.filename(), DocumentKind::Pdf, units, &cfg.unit_separator, warnings)
    }

    /// Rasterise and recognise thin pages, `page_concurrency` at a time.
    ///
    /// Pages are rendered chunk by chunk so at most one chunk of bitmaps is
    /// alive per document, however long the scan.
    async fn ocr_pdf_pages(
        &self,
        doc: &Document,
        pages: Vec<(usize, String)>,
        languages: &Languages,
    ) -> Result<Vec<ExtractionUnit>, ExtractError> {
        let chunk_size = self.inner.config.page_concurrency.max(1);
        let mut units = Vec::with_capacity(pages.len());
        let mut pending = pages.into_iter().peekable();

        while pending.peek().is_some() {
            let chunk: Vec<(usize, String)> = pending.by_ref().take(chunk_size).collect();
            match self.render_chunk(doc, &chunk).await? {
                Ok(rendered) => units.extend(self.ocr_chunk(rendered, chunk, languages).await),
                Err(e) => {
                    // Document-level failure: the remaining chunks would fail the same way.
                    warn!("Rasterisation failed for '{}': {}", doc.filename(), e);
                    units.extend(
                        chunk
                            .into_iter()
                            .chain(pending.by_ref())
                            .map(|(ordinal, text)| {
                                keep_thin_or_fail(ordinal, text, render_unit_error(ordinal, &e))
                            }),
                    );
                }
            }
        }

        Ok(units)
    }

    async fn render_chunk(
        &self,
        doc: &Document,
        chunk: &[(usize, String)],
    ) -> Result<Result<RenderedPages, RenderError>, ExtractError> {
        let indices: Vec<usize> = chunk.iter().map(|(i, _)| *i).collect();
        let _permit = self.permit().await?;
        let rasterizer = Arc::clone(&self.inner.rasterizer);
        let bytes = doc.bytes().clone();
        let start = Instant::now();
        let rendered = blocking(move || rasterizer.render_pages(&bytes, &indices)).await?;
        debug!(
            pages = chunk.len(),
            "Rasterised chunk in {}ms",
            start.elapsed().as_millis()
        );
        Ok(rendered)
    }

    async fn ocr_chunk(
        &self,
        rendered: RenderedPages,
        chunk: Vec<(usize, String)>,
        languages: &Languages,
    ) -> Vec<ExtractionUnit> {
        let mut thin: HashMap<usize, String> = chunk.into_iter().collect();
        let jobs: Vec<_> = rendered
            .into_iter()
            .map(|(idx, image)| (idx, image, thin.remove(&idx).unwrap_or_default()))
            .collect();

        stream::iter(jobs.into_iter().map(|(idx, image, thin_text)| async move {
            match image {
                Err(detail) => keep_thin_or_fail(
                    idx,
                    thin_text,
                    UnitError::RenderFailed {
                        ordinal: idx,
                        detail,
                    },
                ),
                Ok(image) => match self.inner.ocr.recognize(Arc::new(image), languages).await {
                    Ok(rec) if significant_chars(&rec.text) < significant_chars(&thin_text) => {
                        debug!(page = idx + 1, "OCR yielded less than the text layer; keeping it");
                        ExtractionUnit::ok(idx, UnitSource::TextLayer, thin_text)
                    }
                    Ok(rec) => ExtractionUnit::ok(idx, UnitSource::Ocr, rec.text).with_notes(rec.notes),
                    Err(e) => {
                        warn!(page = idx + 1, "OCR failed: {}", e);
                        keep_thin_or_fail(idx, thin_text, UnitError::from_engine(idx, e))
                    }
                },
            }
        }))
        .buffer_unordered(self.inner.config.page_concurrency.max(1))
        .collect::<Vec<_>>()
        .await
    }

    // ── DOCX / DOC ───────────────────────────────────────────────────────

    async fn extract_docx(&self, doc: &Document) -> Result<ExtractionResult, ExtractError> {
        let bytes = doc.bytes().clone();
        let text = blocking(move || docx_text(&bytes))
            .await?
            .map_err(|detail| ExtractError::ExtractionFailed {
                filename: doc.filename().to_string(),
                stage: "text-layer",
                detail,
                cause: None,
            })?;
        let unit = ExtractionUnit::ok(0, UnitSource::TextLayer, text.trim_end());
        assemble(
            doc.filename(),
            DocumentKind::Docx,
            vec![unit],
            &self.inner.config.unit_separator,
            Vec::new(),
        )
    }

    async fn extract_legacy_doc(&self, doc: &Document) -> Result<ExtractionResult, ExtractError> {
        let secs = self.inner.config.conversion_timeout_secs;
        let start = Instant::now();
        let converted = {
            let _permit = self.permit().await?;
            // Dropping the conversion future on timeout kills the child
            // process and removes its temp directory.
            match tokio::time::timeout(
                Duration::from_secs(secs),
                self.inner.office.convert(doc.bytes(), DocumentKind::LegacyDoc),
            )
            .await
            {
                Ok(r) => r,
                Err(_) => Err(ConversionError::Timeout { secs }),
            }
        };
        let docx = converted.map_err(|e| match e {
            ConversionError::Unavailable(detail) => ExtractError::EngineUnavailable {
                engine: "office".to_string(),
                detail,
            },
            other => ExtractError::ExtractionFailed {
                filename: doc.filename().to_string(),
                stage: "conversion",
                detail: other.to_string(),
                cause: Some(other.kind()),
            },
        })?;
        debug!(
            "Converted '{}' to DOCX in {}ms",
            doc.filename(),
            start.elapsed().as_millis()
        );

        let text = blocking(move || docx_text(&docx))
            .await?
            .map_err(|detail| ExtractError::ExtractionFailed {
                filename: doc.filename().to_string(),
                stage: "conversion",
                detail: format!("converted document unreadable: {detail}"),
                cause: Some(ErrorKind::ConversionFailed),
            })?;
        let unit = ExtractionUnit::ok(0, UnitSource::Converted, text.trim_end());
        assemble(
            doc.filename(),
            DocumentKind::LegacyDoc,
            vec![unit],
            &self.inner.config.unit_separator,
            Vec::new(),
        )
    }

    // ── Image ────────────────────────────────────────────────────────────

    async fn extract_image(
        &self,
        doc: &Document,
        languages: &Languages,
    ) -> Result<ExtractionResult, ExtractError> {
        self.inner.ocr.ensure_languages(languages).await?;

        let bytes = doc.bytes().clone();
        let image = blocking(move || image::load_from_memory(&bytes))
            .await?
            .map_err(|e| ExtractError::ExtractionFailed {
                filename: doc.filename().to_string(),
                stage: "decode",
                detail: e.to_string(),
                cause: None,
            })?;
        debug!("Decoded '{}': {}x{}", doc.filename(), image.width(), image.height());

        let unit = match self.inner.ocr.recognize(Arc::new(image), languages).await {
            Ok(rec) => ExtractionUnit::ok(0, UnitSource::Ocr, rec.text).with_notes(rec.notes),
            Err(e) => ExtractionUnit::failed(0, UnitSource::Ocr, UnitError::from_engine(0, e)),
        };
        assemble(
            doc.filename(),
            DocumentKind::Image,
            vec![unit],
            &self.inner.config.unit_separator,
            Vec::new(),
        )
    }

    async fn permit(&self) -> Result<SemaphorePermit<'_>, ExtractError> {
        self.inner
            .permits
            .acquire()
            .await
            .map_err(|_| ExtractError::Internal("engine pool closed".to_string()))
    }
}

fn render_unit_error(ordinal: usize, err: &RenderError) -> UnitError {
    match err {
        RenderError::Unavailable(d) => UnitError::EngineUnavailable {
            ordinal,
            detail: d.clone(),
        },
        RenderError::CorruptPdf(d) => UnitError::RenderFailed {
            ordinal,
            detail: d.clone(),
        },
    }
}

/// A page whose OCR failed keeps its thin text layer when it has one.
fn keep_thin_or_fail(ordinal: usize, thin_text: String, err: UnitError) -> ExtractionUnit {
    if thin_text.trim().is_empty() {
        ExtractionUnit::failed(ordinal, UnitSource::Ocr, err)
    } else {
        ExtractionUnit::ok(ordinal, UnitSource::TextLayer, thin_text)
            .with_notes(vec![format!("OCR failed, kept text layer: {err}")])
    }
}

fn unsupported(doc: &Document) -> ExtractError {
    let declared = doc
        .content_type()
        .map(str::to_string)
        .or_else(|| declared_hint(doc.filename(), None).map(|k| k.to_string()))
        .unwrap_or_else(|| "none".to_string());
    ExtractError::UnsupportedFormat {
        filename: doc.filename().to_string(),
        declared,
    }
}

/// Run blocking library work off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, ExtractError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ExtractError::Internal(format!("blocking task failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{dense_text, docx_bytes, pdf_with_pages};

    fn extractor() -> Extractor {
        Extractor::builder()
            .config(ExtractionConfig::builder().max_workers(2).build().unwrap())
            .build()
    }

    #[tokio::test]
    async fn digital_pdf_uses_text_layer_only() {
        let a = dense_text("Alpha");
        let b = dense_text("Beta");
        let bytes = pdf_with_pages(&[Some(&a), Some(&b)]);
        let r = extractor()
            .extract(Document::new("digital.pdf", None, bytes))
            .await
            .unwrap();
        assert_eq!(r.kind, DocumentKind::Pdf);
        assert_eq!(r.stats.text_layer_units, 2);
        assert_eq!(r.stats.ocr_units, 0);
        assert!(r.text.starts_with("Alpha:"), "got: {}", r.text);
        assert!(r.text.contains("\n\nBeta:"));
    }

    #[tokio::test]
    async fn docx_is_extracted() {
        let bytes = docx_bytes(&["Quarterly report", "Revenue grew"]);
        let r = extractor()
            .extract(Document::new("r.docx", None, bytes))
            .await
            .unwrap();
        assert_eq!(r.kind, DocumentKind::Docx);
        assert_eq!(r.text, "Quarterly report\nRevenue grew");
    }

    #[tokio::test]
    async fn unknown_is_unsupported_format() {
        let err = extractor()
            .extract(Document::new("notes.txt", Some("text/plain".into()), b"hello".to_vec()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
        assert!(err.to_string().contains("text/plain"));
    }

    #[tokio::test]
    async fn malformed_language_fails_fast() {
        let bytes = pdf_with_pages(&[None]);
        let err = extractor()
            .extract(Document::new("s.pdf", None, bytes).with_language("english"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedLanguage);
    }

    #[tokio::test]
    async fn oversized_document_rejected() {
        let cfg = ExtractionConfig::builder()
            .max_document_bytes(8)
            .build()
            .unwrap();
        let err = Extractor::new(cfg)
            .extract(Document::new("big.pdf", None, b"%PDF-1.7 and more".to_vec()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn failed_ocr_keeps_thin_text() {
        let err = UnitError::OcrFailed {
            ordinal: 3,
            detail: "x".into(),
        };
        let kept = keep_thin_or_fail(3, "Fig. 2".into(), err.clone());
        assert!(kept.is_ok());
        assert_eq!(kept.source, UnitSource::TextLayer);
        assert_eq!(kept.notes.len(), 1);

        let failed = keep_thin_or_fail(3, "  ".into(), err);
        assert!(!failed.is_ok());
    }
}
