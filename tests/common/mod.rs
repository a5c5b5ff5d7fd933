//! Stub engines and fixtures shared by the integration tests.
//!
//! Stub rasterisers render page `i` as a blank image `100 + i` pixels wide;
//! the stub OCR engine reads that width back as a tag, so each recognised
//! text names the page (or image) it came from. Tests run with
//! pre-processing off so the width survives to the engine.
#![allow(dead_code)]

#[path = "../../src/test_support.rs"]
pub mod fixtures;

use async_trait::async_trait;
use edgequake_doc2text::{
    ConversionError, DocumentKind, EngineError, ExtractionConfig, Extractor, OcrEngine,
    OcrRequest, OfficeConverter, PageText, Rasterizer, RenderError, TextLayer,
};
use image::DynamicImage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TAG_BASE: u32 = 100;

pub fn ocr_text(tag: u32) -> String {
    format!("Recognised text from scanned unit {tag}")
}

// ── OCR ──────────────────────────────────────────────────────────────────

type DelayFn = Box<dyn Fn(u32) -> Duration + Send + Sync>;

pub struct StubOcr {
    pub calls: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    in_flight: AtomicUsize,
    fail_tags: Vec<u32>,
    unavailable: bool,
    delay: Option<DelayFn>,
    installed: Vec<String>,
}

impl StubOcr {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            fail_tags: Vec::new(),
            unavailable: false,
            delay: None,
            installed: vec!["eng".into(), "heb".into()],
        }
    }

    pub fn failing_on(mut self, tags: &[u32]) -> Self {
        self.fail_tags = tags.to_vec();
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn with_delay(mut self, f: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        self.delay = Some(Box::new(f));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrEngine for StubOcr {
    async fn recognize(
        &self,
        image: &DynamicImage,
        _request: &OcrRequest<'_>,
    ) -> Result<String, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let tag = image.width().saturating_sub(TAG_BASE);
        let pause = self
            .delay
            .as_ref()
            .map(|f| f(tag))
            .unwrap_or(Duration::from_millis(5));
        tokio::time::sleep(pause).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.unavailable {
            return Err(EngineError::Unavailable("stub engine offline".into()));
        }
        if self.fail_tags.contains(&tag) {
            return Err(EngineError::RecognitionFailed(format!("stub failure on {tag}")));
        }
        Ok(format!("{}\n\u{000C}", ocr_text(tag)))
    }

    async fn installed_languages(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.installed.clone())
    }
}

// ── Rasteriser ───────────────────────────────────────────────────────────

pub struct StubRasterizer {
    pub rendered: Mutex<Vec<usize>>,
    /// Number of pages asked for by each `render_pages` call.
    pub call_sizes: Mutex<Vec<usize>>,
    page_count: usize,
    fail_pages: Vec<usize>,
}

impl StubRasterizer {
    pub fn new() -> Self {
        Self {
            rendered: Mutex::new(Vec::new()),
            call_sizes: Mutex::new(Vec::new()),
            page_count: 0,
            fail_pages: Vec::new(),
        }
    }

    pub fn with_page_count(mut self, n: usize) -> Self {
        self.page_count = n;
        self
    }

    pub fn failing_on(mut self, pages: &[usize]) -> Self {
        self.fail_pages = pages.to_vec();
        self
    }

    pub fn rendered(&self) -> Vec<usize> {
        let mut pages = self.rendered.lock().unwrap().clone();
        pages.sort_unstable();
        pages
    }

    pub fn call_sizes(&self) -> Vec<usize> {
        self.call_sizes.lock().unwrap().clone()
    }
}

impl Rasterizer for StubRasterizer {
    fn page_count(&self, _bytes: &[u8]) -> Result<usize, RenderError> {
        Ok(self.page_count)
    }

    fn render_pages(
        &self,
        _bytes: &[u8],
        page_indices: &[usize],
    ) -> Result<Vec<(usize, Result<DynamicImage, String>)>, RenderError> {
        self.rendered.lock().unwrap().extend_from_slice(page_indices);
        self.call_sizes.lock().unwrap().push(page_indices.len());
        Ok(page_indices
            .iter()
            .map(|&i| {
                let img = if self.fail_pages.contains(&i) {
                    Err("stub render failure".to_string())
                } else {
                    Ok(DynamicImage::new_luma8(TAG_BASE + i as u32, 50))
                };
                (i, img)
            })
            .collect())
    }
}

/// A text layer that cannot parse anything.
pub struct BrokenTextLayer;

impl TextLayer for BrokenTextLayer {
    fn pdf_pages(&self, _bytes: &[u8]) -> Result<Vec<PageText>, String> {
        Err("xref table damaged".into())
    }
}

/// A text layer whose parser crashes, as lopdf can on a mangled xref.
pub struct PanickingTextLayer;

impl TextLayer for PanickingTextLayer {
    fn pdf_pages(&self, _bytes: &[u8]) -> Result<Vec<PageText>, String> {
        panic!("index out of bounds in xref stream")
    }
}

// ── Office ───────────────────────────────────────────────────────────────

pub enum OfficeBehaviour {
    Convert(Vec<u8>),
    Hang,
    Fail,
    Missing,
}

pub struct StubOffice {
    behaviour: OfficeBehaviour,
    pub calls: AtomicUsize,
}

impl StubOffice {
    pub fn new(behaviour: OfficeBehaviour) -> Self {
        Self {
            behaviour,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl OfficeConverter for StubOffice {
    async fn convert(&self, _bytes: &[u8], _from: DocumentKind) -> Result<Vec<u8>, ConversionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            OfficeBehaviour::Convert(docx) => Ok(docx.clone()),
            OfficeBehaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Vec::new())
            }
            OfficeBehaviour::Fail => Err(ConversionError::Failed("exit status 1".into())),
            OfficeBehaviour::Missing => {
                Err(ConversionError::Unavailable("'libreoffice' not found".into()))
            }
        }
    }
}

// ── Wiring ───────────────────────────────────────────────────────────────

pub fn test_config() -> edgequake_doc2text::ExtractionConfigBuilder {
    ExtractionConfig::builder()
        .max_workers(4)
        .preprocess(false)
        .ocr_retry_min_chars(0)
        .ocr_timeout_secs(5)
}

pub struct Harness {
    pub extractor: Extractor,
    pub ocr: Arc<StubOcr>,
    pub raster: Arc<StubRasterizer>,
}

pub fn harness(ocr: StubOcr, raster: StubRasterizer) -> Harness {
    harness_with(test_config().build().unwrap(), ocr, raster)
}

/// Route library logs through the test harness; `RUST_LOG=debug` shows them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn harness_with(config: ExtractionConfig, ocr: StubOcr, raster: StubRasterizer) -> Harness {
    init_tracing();
    let ocr = Arc::new(ocr);
    let raster = Arc::new(raster);
    let extractor = Extractor::builder()
        .config(config)
        .ocr_engine(ocr.clone())
        .rasterizer(raster.clone())
        .office_converter(Arc::new(StubOffice::new(OfficeBehaviour::Fail)))
        .build();
    Harness {
        extractor,
        ocr,
        raster,
    }
}

/// Bytes the classifier recognises as a legacy Word document.
pub fn legacy_doc_bytes() -> Vec<u8> {
    let mut bytes = vec![0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
    bytes.extend_from_slice(&[0u8; 504]);
    bytes.extend("WordDocument".encode_utf16().flat_map(|u| u.to_le_bytes()));
    bytes
}
