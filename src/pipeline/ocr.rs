//! OCR: language handling, the engine capability trait, the tesseract
//! subprocess engine, and the adapter that wraps every engine call with
//! pre-processing, capacity gating, a deadline and a low-yield retry.
//!
//! ## Retry strategy
//!
//! A recognition that yields fewer than `ocr_retry_min_chars` significant
//! characters is retried twice, each only if the previous attempt is still
//! short:
//!
//! 1. same (pre-processed) image, page segmentation mode 6 (one uniform
//!    block of text; helps receipts and forms tesseract mis-segments)
//! 2. the original image, default segmentation (binarisation occasionally
//!    erases faint print)
//!
//! The longest text wins. A failing retry never discards an earlier result.

use crate::error::{EngineError, ExtractError};
use crate::pipeline::normalize::{clean_text, significant_chars};
use crate::pipeline::preprocess::{preprocess, PreprocessOptions};
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::io::ErrorKind as IoErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::{OnceCell, Semaphore};
use tracing::{debug, warn};

/// Page segmentation mode "single uniform block of text".
pub const PSM_SINGLE_BLOCK: u8 = 6;

// ── Languages ────────────────────────────────────────────────────────────

static RE_LANG_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z]{3}(_[a-z]+)*$").unwrap());

/// A validated `code(+code)*` language selection, e.g. `eng+heb`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Languages(Vec<String>);

impl Languages {
    /// Parse and syntax-check a language selection.
    ///
    /// Codes are tesseract pack names: three lowercase letters with optional
    /// `_suffix` parts (`eng`, `chi_sim`, `chi_sim_vert`). Duplicates are
    /// dropped, order is kept.
    pub fn parse(spec: &str) -> Result<Self, ExtractError> {
        let mut codes: Vec<String> = Vec::new();
        for raw in spec.split('+') {
            let code = raw.trim();
            if !RE_LANG_CODE.is_match(code) {
                return Err(ExtractError::UnsupportedLanguage {
                    language: spec.to_string(),
                    reason: if code.is_empty() {
                        "empty language code".to_string()
                    } else {
                        format!("'{code}' is not a valid language code")
                    },
                });
            }
            if !codes.iter().any(|c| c == code) {
                codes.push(code.to_string());
            }
        }
        Ok(Self(codes))
    }

    pub fn codes(&self) -> &[String] {
        &self.0
    }

    /// Codes absent from `installed`.
    pub fn missing_from<'a>(&'a self, installed: &[String]) -> Vec<&'a str> {
        self.0
            .iter()
            .filter(|c| !installed.iter().any(|i| i == *c))
            .map(String::as_str)
            .collect()
    }
}

impl fmt::Display for Languages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("+"))
    }
}

// ── Engine trait ─────────────────────────────────────────────────────────

/// Parameters for one engine call.
#[derive(Debug, Clone, Copy)]
pub struct OcrRequest<'a> {
    pub languages: &'a Languages,
    /// Page segmentation mode; `None` leaves the engine default.
    pub page_seg_mode: Option<u8>,
}

/// Capability provider for optical character recognition.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognise text in one image. Raw engine output; normalisation is the
    /// adapter's job.
    async fn recognize(
        &self,
        image: &DynamicImage,
        request: &OcrRequest<'_>,
    ) -> Result<String, EngineError>;

    /// Installed language packs.
    async fn installed_languages(&self) -> Result<Vec<String>, EngineError>;
}

// ── Tesseract ────────────────────────────────────────────────────────────

/// `tesseract` CLI driven through `tokio::process`.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    bin: String,
    tessdata_dir: Option<PathBuf>,
}

impl TesseractEngine {
    pub fn new(bin: impl Into<String>, tessdata_dir: Option<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            tessdata_dir,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, e: std::io::Error) -> EngineError {
        match e.kind() {
            IoErrorKind::NotFound => {
                EngineError::Unavailable(format!("'{}' not found on PATH", self.bin))
            }
            _ => EngineError::Unavailable(format!("failed to start '{}': {}", self.bin, e)),
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    async fn recognize(
        &self,
        image: &DynamicImage,
        request: &OcrRequest<'_>,
    ) -> Result<String, EngineError> {
        // PNG encoding is CPU-bound; the temp file lives until this call
        // returns or its future is dropped.
        let owned = image.clone();
        let input = tokio::task::spawn_blocking(move || -> Result<_, String> {
            let mut file = tempfile::Builder::new()
                .prefix("doc2text-ocr-")
                .suffix(".png")
                .tempfile()
                .map_err(|e| e.to_string())?;
            owned
                .write_to(file.as_file_mut(), ImageFormat::Png)
                .map_err(|e| e.to_string())?;
            Ok(file)
        })
        .await
        .map_err(|e| EngineError::RecognitionFailed(format!("encode task: {e}")))?
        .map_err(|e| EngineError::RecognitionFailed(format!("PNG encode: {e}")))?;

        let mut cmd = self.command();
        cmd.arg(input.path())
            .arg("stdout")
            .arg("-l")
            .arg(request.languages.to_string());
        if let Some(psm) = request.page_seg_mode {
            cmd.arg("--psm").arg(psm.to_string());
        }
        if let Some(ref dir) = self.tessdata_dir {
            cmd.arg("--tessdata-dir").arg(dir);
        }

        let output = cmd.output().await.map_err(|e| self.spawn_error(e))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::RecognitionFailed(format!(
                "{} exited with {}: {}",
                self.bin,
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn installed_languages(&self) -> Result<Vec<String>, EngineError> {
        let mut cmd = self.command();
        cmd.arg("--list-langs");
        if let Some(ref dir) = self.tessdata_dir {
            cmd.arg("--tessdata-dir").arg(dir);
        }
        let output = cmd.output().await.map_err(|e| self.spawn_error(e))?;
        if !output.status.success() {
            return Err(EngineError::RecognitionFailed(format!(
                "{} --list-langs exited with {}",
                self.bin, output.status
            )));
        }
        // Tesseract 3.x prints the list on stderr.
        let listing = if output.stdout.is_empty() {
            String::from_utf8_lossy(&output.stderr).into_owned()
        } else {
            String::from_utf8_lossy(&output.stdout).into_owned()
        };
        Ok(parse_language_list(&listing))
    }
}

/// Parse `tesseract --list-langs` output: a header line, then one pack per line.
fn parse_language_list(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("List of") && !l.contains(' '))
        .map(str::to_string)
        .collect()
}

// ── Adapter ──────────────────────────────────────────────────────────────

/// Normalised recognition output plus degradation notes.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    pub notes: Vec<String>,
}

/// Adapter settings, taken from [`crate::ExtractionConfig`].
#[derive(Debug, Clone)]
pub struct OcrSettings {
    pub timeout: Duration,
    /// `None` disables pre-processing.
    pub preprocess: Option<PreprocessOptions>,
    pub retry_min_chars: usize,
}

/// Wraps an [`OcrEngine`] with everything a unit recognition needs.
pub struct OcrAdapter {
    engine: Arc<dyn OcrEngine>,
    permits: Arc<Semaphore>,
    settings: OcrSettings,
    installed: OnceCell<Vec<String>>,
}

impl OcrAdapter {
    pub fn new(engine: Arc<dyn OcrEngine>, permits: Arc<Semaphore>, settings: OcrSettings) -> Self {
        Self {
            engine,
            permits,
            settings,
            installed: OnceCell::new(),
        }
    }

    /// Fail with `UnsupportedLanguage` when a requested pack is not
    /// installed.
    ///
    /// The registry is fetched once per adapter. When it cannot be fetched
    /// at all the check is skipped: the recognitions themselves will then
    /// report the engine outage per unit.
    pub async fn ensure_languages(&self, languages: &Languages) -> Result<(), ExtractError> {
        let installed = self
            .installed
            .get_or_try_init(|| async {
                match tokio::time::timeout(self.settings.timeout, self.engine.installed_languages())
                    .await
                {
                    Ok(listed) => listed,
                    Err(_) => Err(EngineError::Timeout {
                        secs: self.settings.timeout.as_secs(),
                    }),
                }
            })
            .await;

        let installed = match installed {
            Ok(list) => list,
            Err(e) => {
                debug!("Language registry unavailable, skipping pack check: {}", e);
                return Ok(());
            }
        };

        let missing = languages.missing_from(installed);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ExtractError::UnsupportedLanguage {
                language: languages.to_string(),
                reason: format!("language pack not installed: {}", missing.join(", ")),
            })
        }
    }

    /// Recognise one image under the shared capacity pool.
    pub async fn recognize(
        &self,
        image: Arc<DynamicImage>,
        languages: &Languages,
    ) -> Result<Recognition, EngineError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| EngineError::Unavailable("engine pool closed".to_string()))?;
        let start = Instant::now();
        let mut notes = Vec::new();

        let prepared = match self.settings.preprocess {
            Some(opts) => {
                let src = Arc::clone(&image);
                match tokio::task::spawn_blocking(move || preprocess(&src, &opts)).await {
                    Ok(Ok(p)) => Some(Arc::new(p.image)),
                    Ok(Err(e)) => {
                        warn!("Pre-processing skipped: {}", e);
                        notes.push(format!("pre-processing skipped: {e}"));
                        None
                    }
                    Err(e) => {
                        warn!("Pre-processing task failed: {}", e);
                        notes.push(format!("pre-processing skipped: {e}"));
                        None
                    }
                }
            }
            None => None,
        };
        let primary = prepared.as_ref().unwrap_or(&image);

        let mut best = self.call(primary, languages, None).await?;
        let min = self.settings.retry_min_chars;

        if min > 0 && significant_chars(&best) < min {
            debug!(
                "Low OCR yield ({} chars), retrying with psm {}",
                significant_chars(&best),
                PSM_SINGLE_BLOCK
            );
            self.retry(&mut best, &mut notes, primary, languages, Some(PSM_SINGLE_BLOCK))
                .await;

            if prepared.is_some() && significant_chars(&best) < min {
                debug!("Still low OCR yield, retrying on the original image");
                self.retry(&mut best, &mut notes, &image, languages, None).await;
            }
        }

        let text = clean_text(&best);
        debug!(
            "OCR produced {} chars in {}ms",
            text.len(),
            start.elapsed().as_millis()
        );
        Ok(Recognition { text, notes })
    }

    async fn retry(
        &self,
        best: &mut String,
        notes: &mut Vec<String>,
        image: &DynamicImage,
        languages: &Languages,
        page_seg_mode: Option<u8>,
    ) {
        match self.call(image, languages, page_seg_mode).await {
            Ok(text) if significant_chars(&text) > significant_chars(best) => *best = text,
            Ok(_) => {}
            Err(e) => notes.push(format!("OCR retry failed: {e}")),
        }
    }

    async fn call(
        &self,
        image: &DynamicImage,
        languages: &Languages,
        page_seg_mode: Option<u8>,
    ) -> Result<String, EngineError> {
        let request = OcrRequest {
            languages,
            page_seg_mode,
        };
        tokio::time::timeout(self.settings.timeout, self.engine.recognize(image, &request))
            .await
            .map_err(|_| EngineError::Timeout {
                secs: self.settings.timeout.as_secs(),
            })?
    }
}
