//! PDF rasterisation: render selected pages to `DynamicImage` via pdfium.
//!
//! Only pages whose text layer is too thin reach this stage. The
//! orchestrator asks for one chunk of pages per blocking call, so the
//! document is parsed once per chunk and only that chunk's bitmaps are
//! held in memory. Each page gets its own `Result` so one bad page does not
//! take the others down.
//!
//! pdfium is bound per call: `PDFIUM_LIB_PATH` (file or directory) when
//! configured, otherwise the system library search path.

use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Capability provider for page rasterisation.
///
/// Called from `spawn_blocking`; implementations may block.
pub trait Rasterizer: Send + Sync {
    /// Number of pages in the document.
    fn page_count(&self, bytes: &[u8]) -> Result<usize, RenderError>;

    /// Render each requested 0-based page index.
    ///
    /// The outer error is document-level (engine missing, unparsable file);
    /// per-page failures come back inside the vector.
    fn render_pages(
        &self,
        bytes: &[u8],
        page_indices: &[usize],
    ) -> Result<Vec<(usize, Result<DynamicImage, String>)>, RenderError>;
}

/// Document-level rasterisation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("pdfium unavailable: {0}")]
    Unavailable(String),
    #[error("PDF could not be opened: {0}")]
    CorruptPdf(String),
}

/// Default rasteriser backed by `pdfium-render`.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    library_path: Option<PathBuf>,
    dpi: u32,
    max_pixels: u32,
}

impl PdfiumRasterizer {
    pub fn new(library_path: Option<PathBuf>, dpi: u32, max_pixels: u32) -> Self {
        Self {
            library_path,
            dpi,
            max_pixels,
        }
    }

    fn bind(&self) -> Result<Pdfium, RenderError> {
        let env_path = std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from);
        let bindings = match self.library_path.as_ref().or(env_path.as_ref()) {
            Some(path) => Pdfium::bind_to_library(library_file(path)),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| RenderError::Unavailable(format!("{e:?}")))?;
        Ok(Pdfium::new(bindings))
    }

    /// Target pixel width for a page, honouring both DPI and the pixel cap.
    fn target_size(&self, width_pt: f32, height_pt: f32) -> (i32, i32) {
        let scale = self.dpi as f32 / 72.0;
        let (w, h) = (width_pt * scale, height_pt * scale);
        let longest = w.max(h);
        let cap = self.max_pixels as f32;
        let factor = if longest > cap { cap / longest } else { 1.0 };
        ((w * factor).round().max(1.0) as i32, (h * factor).round().max(1.0) as i32)
    }
}

/// Accept either the library file itself or the directory holding it.
fn library_file(path: &Path) -> PathBuf {
    if path.is_dir() {
        Pdfium::pdfium_platform_library_name_at_path(path)
    } else {
        path.to_path_buf()
    }
}

impl Rasterizer for PdfiumRasterizer {
    fn page_count(&self, bytes: &[u8]) -> Result<usize, RenderError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(bytes, None)
            .map_err(|e| RenderError::CorruptPdf(format!("{e:?}")))?;
        Ok(document.pages().len() as usize)
    }

    fn render_pages(
        &self,
        bytes: &[u8],
        page_indices: &[usize],
    ) -> Result<Vec<(usize, Result<DynamicImage, String>)>, RenderError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(bytes, None)
            .map_err(|e| RenderError::CorruptPdf(format!("{e:?}")))?;

        let pages = document.pages();
        let total_pages = pages.len() as usize;
        info!("Rasterising {} of {} pages", page_indices.len(), total_pages);

        let mut results = Vec::with_capacity(page_indices.len());
        for &idx in page_indices {
            if idx >= total_pages {
                warn!(
                    "Skipping page {} (out of range, total={})",
                    idx + 1,
                    total_pages
                );
                results.push((idx, Err(format!("page out of range ({total_pages} pages)"))));
                continue;
            }

            let rendered = pages
                .get(idx as u16)
                .map_err(|e| format!("{e:?}"))
                .and_then(|page| {
                    let (w, h) = self.target_size(page.width().value, page.height().value);
                    let config = PdfRenderConfig::new()
                        .set_target_width(w)
                        .set_maximum_height(h);
                    page.render_with_config(&config)
                        .map(|bitmap| bitmap.as_image())
                        .map_err(|e| format!("{e:?}"))
                });

            if let Ok(ref image) = rendered {
                debug!(
                    "Rendered page {} → {}x{} px",
                    idx + 1,
                    image.width(),
                    image.height()
                );
            }
            results.push((idx, rendered));
        }

        Ok(results)
    }
}
