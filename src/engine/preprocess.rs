//! Candidate image preprocessing.
//!
//! One source page fans out into at most [`MAX_CANDIDATES`] derived images,
//! each produced by a distinct denoise/contrast/binarization/scaling recipe.
//! Each recipe targets a different OCR failure mode (faint text, noisy
//! scans, low contrast); the cap bounds the grid-search cost.
//!
//! There are two disjoint ladders. Persian and mixed pages go through
//! conservative recipes that keep the letterforms connected; pure-English
//! pages get aggressive upscaling and contrast work that would shred
//! Persian script but measurably helps Latin text.

use image::{DynamicImage, GrayImage, imageops::FilterType};
use imageproc::contrast::{ThresholdType, otsu_level, threshold};
use imageproc::filter::{bilateral_filter, filter3x3, gaussian_blur_f32};

use crate::{engine::language::LanguageMode, prelude::*};

/// Upper bound on candidates per page, on either ladder.
pub const MAX_CANDIDATES: usize = 3;

/// Pages shorter than this (in px) are upscaled on the document ladder.
const MIN_DOCUMENT_HEIGHT: u32 = 1200;

/// Target long edge (in px) for the Latin ladder's initial upscale.
const LATIN_TARGET_LONG_EDGE: u32 = 2500;

/// One preprocessed candidate image, tagged with its 1-based strategy index.
pub struct Candidate {
    pub index: usize,
    pub image: GrayImage,
}

/// A preprocessing recipe ladder. Selected by [`LanguageMode`]; each ladder
/// is independently testable.
pub trait PreprocessLadder: Send + Sync {
    /// Produce the ordered candidate list for one page.
    fn candidates(&self, page: &DynamicImage) -> Result<Vec<Candidate>>;
}

/// Select the ladder for a language mode.
pub fn ladder_for(mode: LanguageMode) -> &'static dyn PreprocessLadder {
    match mode {
        LanguageMode::English => &LatinLadder,
        LanguageMode::Persian | LanguageMode::Mixed => &DocumentLadder,
    }
}

/// Ladder for Persian and mixed pages.
pub struct DocumentLadder;

impl PreprocessLadder for DocumentLadder {
    fn candidates(&self, page: &DynamicImage) -> Result<Vec<Candidate>> {
        let gray = page.to_luma8();

        // Strategy 1: minimal processing. Clean scans OCR best untouched.
        let s1 = upscale_if_short(gray.clone());

        // Strategy 2: gentle denoise, local contrast, global binarization.
        let s2 = {
            let denoised = fast_nl_means(&gray, 5.0, 5, 15);
            let enhanced = clahe(&denoised, 1.5, 8, 8);
            upscale_if_short(otsu_binarize(&enhanced))
        };

        // Strategy 3: high contrast and sharpening for faint text.
        let s3 = {
            let boosted = linear_gain(&gray, 1.2, 10.0);
            let sharpened = sharpen_3x3(&boosted);
            upscale_if_short(otsu_binarize(&sharpened))
        };

        Ok(vec![
            Candidate { index: 1, image: s1 },
            Candidate { index: 2, image: s2 },
            Candidate { index: 3, image: s3 },
        ])
    }
}

/// Ladder for pure-English pages.
pub struct LatinLadder;

impl PreprocessLadder for LatinLadder {
    fn candidates(&self, page: &DynamicImage) -> Result<Vec<Candidate>> {
        // Upscale the whole page first so every approach works at the same
        // resolution; Lanczos keeps stroke edges crisp.
        let page = upscale_to_long_edge(page, LATIN_TARGET_LONG_EDGE);
        let gray = page.to_luma8();

        // Approach 1: strong local contrast with an unsharp mask on top.
        let a1 = {
            let denoised = bilateral_filter(&gray, 12, 100.0, 100.0);
            let enhanced = clahe(&denoised, 5.0, 8, 8);
            unsharp_mask(&enhanced, 1.0, 2.0, -1.0)
        };

        // Approach 2: heavier denoise, finer contrast tiles, no sharpening.
        let a2 = {
            let denoised = fast_nl_means(&gray, 15.0, 7, 21);
            clahe(&denoised, 4.0, 16, 16)
        };

        // Approach 3: gamma correction for dark scans.
        let a3 = {
            let corrected = gamma_correct(&gray, 1.4);
            clahe(&corrected, 3.5, 12, 12)
        };

        Ok(vec![
            Candidate { index: 1, image: a1 },
            Candidate { index: 2, image: a2 },
            Candidate { index: 3, image: a3 },
        ])
    }
}

/// Upscale a short page with cubic interpolation.
///
/// Scale factor is `min(2.0, MIN_DOCUMENT_HEIGHT / height)`; pages at or
/// above the minimum height pass through unchanged.
fn upscale_if_short(image: GrayImage) -> GrayImage {
    let (w, h) = image.dimensions();
    if h == 0 || h >= MIN_DOCUMENT_HEIGHT {
        return image;
    }
    let scale = (MIN_DOCUMENT_HEIGHT as f32 / h as f32).min(2.0);
    let new_w = (w as f32 * scale) as u32;
    let new_h = (h as f32 * scale) as u32;
    image::imageops::resize(&image, new_w, new_h, FilterType::CatmullRom)
}

/// Upscale so the longer edge reaches `target` px (Lanczos), if smaller.
fn upscale_to_long_edge(page: &DynamicImage, target: u32) -> DynamicImage {
    let (w, h) = (page.width(), page.height());
    let long_edge = w.max(h);
    if long_edge == 0 || long_edge >= target {
        return page.clone();
    }
    let scale = target as f32 / long_edge as f32;
    let new_w = (w as f32 * scale) as u32;
    let new_h = (h as f32 * scale) as u32;
    page.resize_exact(new_w, new_h, FilterType::Lanczos3)
}

/// Linear contrast stretch: `out = clamp(alpha * in + beta)`.
fn linear_gain(image: &GrayImage, alpha: f32, beta: f32) -> GrayImage {
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        pixel.0[0] = (alpha * pixel.0[0] as f32 + beta).clamp(0.0, 255.0) as u8;
    }
    out
}

/// Gamma correction via a lookup table: `out = (in / 255)^gamma * 255`.
fn gamma_correct(image: &GrayImage, gamma: f32) -> GrayImage {
    let mut lut = [0u8; 256];
    for (i, entry) in lut.iter_mut().enumerate() {
        *entry = ((i as f32 / 255.0).powf(gamma) * 255.0).round() as u8;
    }
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        pixel.0[0] = lut[pixel.0[0] as usize];
    }
    out
}

/// 3×3 sharpening kernel (center 9, neighbors −1).
fn sharpen_3x3(image: &GrayImage) -> GrayImage {
    #[rustfmt::skip]
    let kernel: [f32; 9] = [
        -1.0, -1.0, -1.0,
        -1.0,  9.0, -1.0,
        -1.0, -1.0, -1.0,
    ];
    filter3x3(image, &kernel)
}

/// Global Otsu binarization.
fn otsu_binarize(image: &GrayImage) -> GrayImage {
    let level = otsu_level(image);
    threshold(image, level, ThresholdType::Binary)
}

/// Unsharp mask: `out = clamp(w_image * in + w_blur * gaussian(in, sigma))`.
fn unsharp_mask(image: &GrayImage, sigma: f32, w_image: f32, w_blur: f32) -> GrayImage {
    let blurred = gaussian_blur_f32(image, sigma);
    let mut out = image.clone();
    for (pixel, blur) in out.pixels_mut().zip(blurred.pixels()) {
        let value = w_image * pixel.0[0] as f32 + w_blur * blur.0[0] as f32;
        pixel.0[0] = value.clamp(0.0, 255.0) as u8;
    }
    out
}

/// Contrast-limited adaptive histogram equalization.
///
/// The image is divided into `tiles_x × tiles_y` tiles; each tile gets its
/// own clipped-histogram equalization mapping, and every output pixel
/// bilinearly interpolates the mappings of its four nearest tile centers so
/// tile seams stay invisible. `clip_limit` bounds how much any single gray
/// level may dominate a tile, which keeps flat background regions from
/// exploding into noise.
fn clahe(image: &GrayImage, clip_limit: f32, tiles_x: u32, tiles_y: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }
    let tiles_x = tiles_x.max(1).min(width);
    let tiles_y = tiles_y.max(1).min(height);
    let tile_w = width.div_ceil(tiles_x);
    let tile_h = height.div_ceil(tiles_y);

    // Build one equalization LUT per tile.
    let mut luts = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);

            let mut histogram = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    histogram[image.get_pixel(x, y).0[0] as usize] += 1;
                }
            }
            let area = ((x1 - x0) * (y1 - y0)) as f32;

            // Clip the histogram and redistribute the excess evenly; the
            // division remainder goes one-per-bin so no mass is lost and
            // the mapping still reaches full range.
            let clip = ((clip_limit * area / 256.0).max(1.0)) as u32;
            let mut excess = 0u32;
            for count in histogram.iter_mut() {
                if *count > clip {
                    excess += *count - clip;
                    *count = clip;
                }
            }
            let bonus = excess / 256;
            let remainder = (excess % 256) as usize;
            for (level, count) in histogram.iter_mut().enumerate() {
                *count += bonus + u32::from(level < remainder);
            }

            // Cumulative distribution to mapping.
            let lut = &mut luts[(ty * tiles_x + tx) as usize];
            let mut cdf = 0u32;
            for (level, count) in histogram.iter().enumerate() {
                cdf += count;
                lut[level] = ((cdf as f32 / area) * 255.0).clamp(0.0, 255.0) as u8;
            }
        }
    }

    // Interpolate between the four nearest tile mappings.
    let lut_at = |tx: i64, ty: i64| -> &[u8; 256] {
        let tx = tx.clamp(0, tiles_x as i64 - 1) as u32;
        let ty = ty.clamp(0, tiles_y as i64 - 1) as u32;
        &luts[(ty * tiles_x + tx) as usize]
    };
    let mut out = GrayImage::new(width, height);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let value = image.get_pixel(x, y).0[0] as usize;

        // Position relative to tile centers, in tile units.
        let fx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
        let fy = (y as f32 + 0.5) / tile_h as f32 - 0.5;
        let tx0 = fx.floor() as i64;
        let ty0 = fy.floor() as i64;
        let wx = fx - tx0 as f32;
        let wy = fy - ty0 as f32;

        let top = lut_at(tx0, ty0)[value] as f32 * (1.0 - wx)
            + lut_at(tx0 + 1, ty0)[value] as f32 * wx;
        let bottom = lut_at(tx0, ty0 + 1)[value] as f32 * (1.0 - wx)
            + lut_at(tx0 + 1, ty0 + 1)[value] as f32 * wx;
        let blended = top * (1.0 - wy) + bottom * wy;
        pixel.0[0] = blended.clamp(0.0, 255.0) as u8;
    }
    out
}

/// Fast non-local-means denoising for grayscale images.
///
/// For each pixel, averages pixels in a `search × search` window, weighted
/// by how similar their `template × template` neighborhoods are:
/// `w = exp(-patch_distance² / h²)`. Small `h` preserves detail; large `h`
/// smooths harder. Borders are handled by clamping coordinates.
///
/// The naive formulation is O(N · search² · template²), which is unusable
/// on a full scan. This is the integral-image variant: for each of the
/// search² offsets we build a summed-area table of squared differences
/// against the shifted image, which makes every patch distance an O(1)
/// lookup and the whole filter O(N · search²).
fn fast_nl_means(image: &GrayImage, h: f32, template: u32, search: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }
    let (w, ht) = (width as usize, height as usize);
    let t_radius = (template / 2) as i64;
    let s_radius = (search / 2) as i64;
    let h2 = h * h;

    let clamp_idx = |x: i64, y: i64| -> usize {
        let x = x.clamp(0, w as i64 - 1) as usize;
        let y = y.clamp(0, ht as i64 - 1) as usize;
        y * w + x
    };
    let src: Vec<f32> = image.pixels().map(|p| p.0[0] as f32).collect();

    let mut weight_sum = vec![0.0f32; w * ht];
    let mut value_sum = vec![0.0f32; w * ht];
    let mut shifted = vec![0.0f32; w * ht];
    // Summed-area table of squared differences, one row/column of padding.
    let mut sat = vec![0.0f64; (w + 1) * (ht + 1)];

    for dy in -s_radius..=s_radius {
        for dx in -s_radius..=s_radius {
            // The image shifted by (dx, dy), clamped at the borders.
            for y in 0..ht {
                for x in 0..w {
                    shifted[y * w + x] = src[clamp_idx(x as i64 + dx, y as i64 + dy)];
                }
            }

            // Integral image of (src - shifted)².
            for y in 0..ht {
                let mut row_sum = 0.0f64;
                for x in 0..w {
                    let d = (src[y * w + x] - shifted[y * w + x]) as f64;
                    row_sum += d * d;
                    sat[(y + 1) * (w + 1) + (x + 1)] = sat[y * (w + 1) + (x + 1)] + row_sum;
                }
            }

            // Fold this offset's contribution into every pixel.
            for y in 0..ht {
                for x in 0..w {
                    let x0 = (x as i64 - t_radius).max(0) as usize;
                    let y0 = (y as i64 - t_radius).max(0) as usize;
                    let x1 = ((x as i64 + t_radius) as usize).min(w - 1) + 1;
                    let y1 = ((y as i64 + t_radius) as usize).min(ht - 1) + 1;
                    let area = ((x1 - x0) * (y1 - y0)) as f64;
                    let patch = sat[y1 * (w + 1) + x1] - sat[y0 * (w + 1) + x1]
                        - sat[y1 * (w + 1) + x0]
                        + sat[y0 * (w + 1) + x0];
                    let d2 = (patch / area) as f32;

                    let weight = (-d2 / h2).exp();
                    let idx = y * w + x;
                    weight_sum[idx] += weight;
                    value_sum[idx] += weight * shifted[idx];
                }
            }
        }
    }

    let mut out = GrayImage::new(width, height);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let idx = y as usize * w + x as usize;
        pixel.0[0] = (value_sum[idx] / weight_sum[idx]).clamp(0.0, 255.0) as u8;
    }
    out
}
