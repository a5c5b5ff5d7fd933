//! Image pre-processing ahead of OCR.
//!
//! Applied in this order, each step on 8-bit luma:
//!
//! 1. Grayscale
//! 2. Resample small images up to a minimum longest edge (Lanczos3)
//! 3. Deskew: projection-profile search over ±5°, rotate when ≥ 0.5°
//! 4. Contrast stretch between the 1st and 99th luma percentiles
//! 5. Light Gaussian blur (σ = 0.5) to break up scanner noise
//! 6. Binarise at a fixed threshold
//!
//! Failures are reported, never panicked on; the OCR adapter falls back to
//! the original image and records a note.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};
use tracing::debug;

/// Largest edge we will upscale to; beyond this OCR gains nothing.
const MAX_UPSCALED_EDGE: u32 = 8000;
/// Deskew works on a thumbnail this large.
const SKEW_SAMPLE_EDGE: u32 = 600;
const SKEW_RANGE_DEG: f32 = 5.0;
const SKEW_STEP_DEG: f32 = 0.5;

#[derive(Debug, Clone, Copy)]
pub struct PreprocessOptions {
    pub min_edge_px: u32,
    pub binarize_threshold: u8,
}

/// What pre-processing did to an image.
#[derive(Debug, Clone)]
pub struct Preprocessed {
    pub image: DynamicImage,
    pub skew_deg: f32,
    pub scale: f32,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PreprocessError {
    #[error("image has zero width or height")]
    Empty,
    #[error("image too large to resample: {0}x{1}")]
    TooLarge(u32, u32),
}

/// Run the full pre-processing chain.
pub fn preprocess(img: &DynamicImage, opts: &PreprocessOptions) -> Result<Preprocessed, PreprocessError> {
    let (w, h) = (img.width(), img.height());
    if w == 0 || h == 0 {
        return Err(PreprocessError::Empty);
    }

    let gray = img.to_luma8();
    let (gray, scale) = resample(gray, opts.min_edge_px)?;

    let skew_deg = estimate_skew(&gray);
    let gray = if skew_deg.abs() >= SKEW_STEP_DEG {
        rotate(&gray, skew_deg.to_radians())
    } else {
        gray
    };

    let gray = stretch_contrast(&gray);
    let gray = imageops::blur(&gray, 0.5);
    let gray = binarize(&gray, opts.binarize_threshold);

    debug!(
        "Pre-processed {}x{} → {}x{} (scale {:.2}, skew {:.1}°)",
        w,
        h,
        gray.width(),
        gray.height(),
        scale,
        skew_deg
    );

    Ok(Preprocessed {
        image: DynamicImage::ImageLuma8(gray),
        skew_deg,
        scale,
    })
}

fn resample(gray: GrayImage, min_edge: u32) -> Result<(GrayImage, f32), PreprocessError> {
    let (w, h) = gray.dimensions();
    let longest = w.max(h);
    if min_edge == 0 || longest >= min_edge {
        return Ok((gray, 1.0));
    }
    let scale = (min_edge as f32 / longest as f32).min(4.0);
    let (nw, nh) = (
        (w as f32 * scale).round() as u32,
        (h as f32 * scale).round() as u32,
    );
    if nw.max(nh) > MAX_UPSCALED_EDGE {
        return Err(PreprocessError::TooLarge(nw, nh));
    }
    Ok((
        imageops::resize(&gray, nw.max(1), nh.max(1), FilterType::Lanczos3),
        scale,
    ))
}

/// Estimate text-line skew in degrees (positive = lines descend to the right).
///
/// For each candidate angle θ, dark pixels are projected onto rows along
/// `y - x·tan θ`; the angle with the sharpest profile (largest sum of
/// squared row counts) is the skew.
pub fn estimate_skew(gray: &GrayImage) -> f32 {
    let sample = thumbnail(gray, SKEW_SAMPLE_EDGE);
    let (w, h) = sample.dimensions();
    let dark: Vec<(f32, f32)> = sample
        .enumerate_pixels()
        .filter(|(_, _, p)| p.0[0] < 128)
        .map(|(x, y, _)| (x as f32, y as f32))
        .collect();
    if dark.len() < 16 {
        return 0.0;
    }

    let offset = w as f32 * (SKEW_RANGE_DEG.to_radians().tan()) + 1.0;
    let rows = (h as f32 + 2.0 * offset).ceil() as usize + 1;
    let mut profile = vec![0u32; rows];

    let steps = (SKEW_RANGE_DEG / SKEW_STEP_DEG).round() as i32;
    let mut best = (0.0f32, 0u64);
    for i in -steps..=steps {
        let deg = i as f32 * SKEW_STEP_DEG;
        let tan = deg.to_radians().tan();
        profile.iter_mut().for_each(|c| *c = 0);
        for &(x, y) in &dark {
            let row = (y - x * tan + offset).round();
            if row >= 0.0 && (row as usize) < rows {
                profile[row as usize] += 1;
            }
        }
        let score: u64 = profile.iter().map(|&c| (c as u64) * (c as u64)).sum();
        // Ties keep the angle closest to zero (iteration starts at -range).
        if score > best.1 || (score == best.1 && deg.abs() < best.0.abs()) {
            best = (deg, score);
        }
    }
    best.0
}

fn thumbnail(gray: &GrayImage, max_edge: u32) -> GrayImage {
    let (w, h) = gray.dimensions();
    let longest = w.max(h);
    if longest <= max_edge {
        return gray.clone();
    }
    let f = max_edge as f32 / longest as f32;
    imageops::resize(
        gray,
        ((w as f32 * f).round() as u32).max(1),
        ((h as f32 * f).round() as u32).max(1),
        FilterType::Triangle,
    )
}

/// Rotate about the centre so lines skewed by `angle` become horizontal.
/// Uncovered corners are filled white.
fn rotate(gray: &GrayImage, angle: f32) -> GrayImage {
    let (w, h) = gray.dimensions();
    let (cx, cy) = (w as f32 / 2.0, h as f32 / 2.0);
    let (sin, cos) = angle.sin_cos();
    GrayImage::from_fn(w, h, |x, y| {
        let (dx, dy) = (x as f32 - cx, y as f32 - cy);
        let sx = (dx * cos - dy * sin + cx).round();
        let sy = (dx * sin + dy * cos + cy).round();
        if sx >= 0.0 && sy >= 0.0 && (sx as u32) < w && (sy as u32) < h {
            *gray.get_pixel(sx as u32, sy as u32)
        } else {
            Luma([255])
        }
    })
}

fn stretch_contrast(gray: &GrayImage) -> GrayImage {
    let mut hist = [0u64; 256];
    for p in gray.pixels() {
        hist[p.0[0] as usize] += 1;
    }
    let total: u64 = hist.iter().sum();
    let lo = percentile(&hist, total / 100);
    let hi = percentile(&hist, total - total / 100);
    if hi <= lo {
        return gray.clone();
    }
    let range = (hi - lo) as f32;
    let mut out = gray.clone();
    for p in out.pixels_mut() {
        let v = (p.0[0].saturating_sub(lo) as f32 / range * 255.0).clamp(0.0, 255.0);
        p.0[0] = v as u8;
    }
    out
}

fn percentile(hist: &[u64; 256], target: u64) -> u8 {
    let mut acc = 0u64;
    for (v, &count) in hist.iter().enumerate() {
        acc += count;
        if acc >= target.max(1) {
            return v as u8;
        }
    }
    255
}

fn binarize(gray: &GrayImage, threshold: u8) -> GrayImage {
    let mut out = gray.clone();
    for p in out.pixels_mut() {
        p.0[0] = if p.0[0] > threshold { 255 } else { 0 };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn opts() -> PreprocessOptions {
        PreprocessOptions {
            min_edge_px: 0,
            binarize_threshold: 150,
        }
    }

    fn lines(w: u32, h: u32, skew_deg: f32) -> GrayImage {
        let tan = skew_deg.to_radians().tan();
        let mut img = GrayImage::from_pixel(w, h, Luma([255]));
        for y0 in (40..h.saturating_sub(40)).step_by(30) {
            for x in 20..w - 20 {
                let y = y0 as f32 + x as f32 * tan;
                for t in 0..3 {
                    let yy = y.round() as i64 + t;
                    if yy >= 0 && (yy as u32) < h {
                        img.put_pixel(x, yy as u32, Luma([0]));
                    }
                }
            }
        }
        img
    }

    #[test]
    fn output_is_binary() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(64, 64, |x, _| {
            image::Rgb([(x * 4) as u8, 0, 0])
        }));
        let out = preprocess(&img, &opts()).unwrap().image.to_luma8();
        assert!(out.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
    }

    #[test]
    fn small_images_are_upscaled() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(200, 100, Luma([255])));
        let out = preprocess(
            &img,
            &PreprocessOptions {
                min_edge_px: 800,
                binarize_threshold: 150,
            },
        )
        .unwrap();
        assert_eq!((out.image.width(), out.image.height()), (800, 400));
        assert!((out.scale - 4.0).abs() < f32::EPSILON);
    }

    #[test]
    fn empty_image_is_an_error() {
        let img = DynamicImage::ImageLuma8(GrayImage::new(0, 10));
        assert_eq!(preprocess(&img, &opts()).unwrap_err(), PreprocessError::Empty);
    }

    #[test]
    fn skew_is_detected() {
        let skewed = lines(500, 400, 3.0);
        let est = estimate_skew(&skewed);
        assert!((est - 3.0).abs() <= 0.5, "estimated {est}");
    }

    #[test]
    fn straight_text_has_no_skew() {
        assert_eq!(estimate_skew(&lines(500, 400, 0.0)), 0.0);
    }

    #[test]
    fn blank_page_has_no_skew() {
        let blank = GrayImage::from_pixel(300, 300, Luma([255]));
        assert_eq!(estimate_skew(&blank), 0.0);
    }

    #[test]
    fn deskew_straightens_lines() {
        let skewed = lines(500, 400, 3.0);
        let fixed = rotate(&skewed, 3.0f32.to_radians());
        assert!(estimate_skew(&fixed).abs() <= 0.5);
    }
}
