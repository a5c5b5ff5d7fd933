//! CLI binary for edgequake-doc2text.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig`, runs one extraction or a batch, and prints the JSON
//! response on stdout.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_doc2text::{
    Base64Payload, BatchBase64Payload, BatchProgressCallback, BatchResult, Document,
    ExtractionConfig, ExtractionResponse, Extractor, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────

/// Terminal progress callback: one bar for the batch and a log line per
/// document. Documents complete out of order, so lines carry their index.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Extracting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting text from {total} files…"))
        ));
    }

    fn on_document_start(&self, _index: usize, _total: usize, filename: &str) {
        self.bar.set_message(filename.to_string());
    }

    fn on_document_complete(&self, index: usize, total: usize, text_len: usize) {
        self.bar.println(format!(
            "  {} File {:>3}/{:<3}  {}",
            green("✓"),
            index + 1,
            total,
            dim(&format!("{text_len:>7} chars")),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, index: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} File {:>3}/{:<3}  {}",
            red("✗"),
            index + 1,
            total,
            red(&msg),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total: usize, success_count: usize) {
        self.bar.finish_and_clear();
        let failed = total.saturating_sub(success_count);
        if failed == 0 {
            eprintln!(
                "{} {} files extracted successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} files extracted  ({} failed)",
                if failed == total { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # One file → one JSON object
  doc2text invoice.pdf

  # Several files → {"results": [...]} in argument order
  doc2text scan1.png scan2.png contract.docx --pretty

  # Hebrew + English OCR
  doc2text --language eng+heb letter.jpg

  # A base64 JSON request body (single or {"files": [...]}), '-' for stdin
  doc2text --base64-request request.json

EXIT CODES:
  0  every document produced text
  2  at least one document failed (its slot carries error_kind)
  1  the request itself could not be processed

ENVIRONMENT VARIABLES:
  DOC2TEXT_MAX_WORKERS         Engine-capacity permits (default: CPUs)
  DOC2TEXT_BATCH_CONCURRENCY   Documents in flight per batch
  DOC2TEXT_PAGE_CONCURRENCY    OCR pages in flight per document
  DOC2TEXT_MIN_TEXT_DENSITY    Text-layer chars per square inch to skip OCR
  DOC2TEXT_LANGUAGE            Default OCR language (e.g. eng, eng+heb)
  DOC2TEXT_OCR_TIMEOUT         Seconds per OCR call
  DOC2TEXT_CONVERSION_TIMEOUT  Seconds per .doc conversion
  DOC2TEXT_DPI                 Rasterisation DPI for scanned pages
  TESSDATA_PREFIX              Tesseract language-pack directory
  PDFIUM_LIB_PATH              pdfium shared library (file or directory)
  DOC2TEXT_TESSERACT_BIN       Tesseract executable
  DOC2TEXT_LIBREOFFICE_BIN     LibreOffice executable
"#;

/// Extract plain text from PDF, DOCX, DOC and image files.
#[derive(Parser, Debug)]
#[command(
    name = "doc2text",
    version,
    about = "Extract plain text from PDF, DOCX, DOC and image files",
    long_about = "Extract plain text from documents. PDFs use their embedded text layer and fall \
back to OCR page by page where it is missing; images are OCR'd; legacy .doc files are converted \
through LibreOffice. Results are printed as JSON.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Files to extract.
    #[arg(required_unless_present = "base64_request")]
    files: Vec<PathBuf>,

    /// Read a base64 JSON request body from this file ('-' for stdin).
    #[arg(long, conflicts_with = "files")]
    base64_request: Option<PathBuf>,

    /// OCR language(s), e.g. eng or eng+heb.
    #[arg(short, long, env = "DOC2TEXT_LANGUAGE", default_value = "eng")]
    language: String,

    /// Engine-capacity permits shared by OCR and conversion jobs.
    #[arg(long, env = "DOC2TEXT_MAX_WORKERS")]
    max_workers: Option<usize>,

    /// Documents in flight per batch.
    #[arg(long, env = "DOC2TEXT_BATCH_CONCURRENCY")]
    batch_concurrency: Option<usize>,

    /// OCR pages in flight per document.
    #[arg(long, env = "DOC2TEXT_PAGE_CONCURRENCY", default_value_t = 4)]
    page_concurrency: usize,

    /// Text-layer density (chars per square inch) above which a PDF page
    /// is not OCR'd.
    #[arg(long, env = "DOC2TEXT_MIN_TEXT_DENSITY", default_value_t = 1.0)]
    min_text_density: f32,

    /// Seconds per OCR call.
    #[arg(long, env = "DOC2TEXT_OCR_TIMEOUT", default_value_t = 60)]
    ocr_timeout: u64,

    /// Seconds per .doc conversion.
    #[arg(long, env = "DOC2TEXT_CONVERSION_TIMEOUT", default_value_t = 30)]
    conversion_timeout: u64,

    /// Rasterisation DPI for scanned pages (72–600).
    #[arg(long, env = "DOC2TEXT_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Tesseract language-pack directory.
    #[arg(long, env = "TESSDATA_PREFIX")]
    tessdata_dir: Option<PathBuf>,

    /// pdfium shared library (file or directory).
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,

    /// Tesseract executable.
    #[arg(long, env = "DOC2TEXT_TESSERACT_BIN", default_value = "tesseract")]
    tesseract_bin: String,

    /// LibreOffice executable.
    #[arg(long, env = "DOC2TEXT_LIBREOFFICE_BIN", default_value = "libreoffice")]
    libreoffice_bin: String,

    /// Skip image pre-processing before OCR.
    #[arg(long)]
    no_preprocess: bool,

    /// Pretty-print the JSON response.
    #[arg(long)]
    pretty: bool,

    /// Disable progress bar.
    #[arg(long, env = "DOC2TEXT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOC2TEXT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOC2TEXT_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli)?;
    let extractor = Extractor::new(config);

    // ── Collect the request ──────────────────────────────────────────────
    let request = match cli.base64_request {
        Some(ref path) => read_base64_request(path).await?,
        None => Request::Files(read_files(&cli.files, &cli.language).await?),
    };

    // ── Run ──────────────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress;
    let progress = || -> Option<ProgressCallback> {
        show_progress.then(|| CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    };

    let all_ok = match request {
        Request::Single(doc) => {
            let filename = doc.filename().to_string();
            let outcome = extractor.extract(doc).await;
            let response = ExtractionResponse::from_outcome(&filename, &outcome);
            print_json(&response, cli.pretty)?;
            response.is_success()
        }
        Request::Files(docs) if docs.len() == 1 => {
            let doc = docs.into_iter().next().context("no input files")?;
            let filename = doc.filename().to_string();
            let outcome = extractor.extract(doc).await;
            let response = ExtractionResponse::from_outcome(&filename, &outcome);
            print_json(&response, cli.pretty)?;
            response.is_success()
        }
        Request::Files(docs) => {
            let batch = run_batch(&extractor, docs, progress()).await?;
            print_json(&batch.to_response(), cli.pretty)?;
            batch.failed() == 0
        }
        Request::Base64Batch(payload) => {
            let batch = match progress() {
                Some(cb) => extractor
                    .extract_base64_batch_with_progress(payload, 0, cb)
                    .await,
                None => extractor.extract_base64_batch(payload, 0).await,
            }
            .context("Batch request rejected")?;
            print_json(&batch.to_response(), cli.pretty)?;
            batch.failed() == 0
        }
    };

    Ok(if all_ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

enum Request {
    Single(Document),
    Files(Vec<Document>),
    Base64Batch(BatchBase64Payload),
}

async fn run_batch(
    extractor: &Extractor,
    docs: Vec<Document>,
    progress: Option<ProgressCallback>,
) -> Result<BatchResult> {
    let batch = match progress {
        Some(cb) => extractor.extract_batch_with_progress(docs, 0, cb).await,
        None => extractor.extract_batch(docs, 0).await,
    };
    batch.context("Batch request rejected")
}

/// Map CLI args to `ExtractionConfig`.
fn build_config(cli: &Cli) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder();
    if let Some(n) = cli.max_workers {
        builder = builder.max_workers(n);
    }
    if let Some(n) = cli.batch_concurrency {
        builder = builder.batch_concurrency(n);
    }
    builder = builder
        .page_concurrency(cli.page_concurrency)
        .min_text_density(cli.min_text_density)
        .default_language(cli.language.clone())
        .ocr_timeout_secs(cli.ocr_timeout)
        .conversion_timeout_secs(cli.conversion_timeout)
        .dpi(cli.dpi)
        .preprocess(!cli.no_preprocess)
        .tesseract_bin(cli.tesseract_bin.clone())
        .libreoffice_bin(cli.libreoffice_bin.clone());
    if let Some(ref dir) = cli.tessdata_dir {
        builder = builder.tessdata_dir(dir.clone());
    }
    if let Some(ref path) = cli.pdfium_lib_path {
        builder = builder.pdfium_lib_path(path.clone());
    }
    builder.build().context("Invalid configuration")
}

async fn read_files(paths: &[PathBuf], language: &str) -> Result<Vec<Document>> {
    let mut docs = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        docs.push(Document::new(filename, None, bytes).with_language(language));
    }
    Ok(docs)
}

/// Accepts either `{"files": [...]}` or a single payload object.
async fn read_base64_request(path: &Path) -> Result<Request> {
    let body = if path == Path::new("-") {
        let mut s = String::new();
        io::stdin()
            .read_to_string(&mut s)
            .context("Failed to read request from stdin")?;
        s
    } else {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read request from {}", path.display()))?
    };

    let value: serde_json::Value =
        serde_json::from_str(&body).context("Request body is not valid JSON")?;
    if value.get("files").is_some() {
        let batch: BatchBase64Payload =
            serde_json::from_value(value).context("Invalid batch request body")?;
        Ok(Request::Base64Batch(batch))
    } else {
        let payload: Base64Payload =
            serde_json::from_value(value).context("Invalid request body")?;
        let doc = payload
            .into_document()
            .context("Request payload could not be decoded")?;
        Ok(Request::Single(doc))
    }
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .context("Failed to serialise response")?;
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{json}").context("Failed to write to stdout")?;
    Ok(())
}
