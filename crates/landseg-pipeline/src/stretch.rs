//! 8-bit conversion of arbitrary-depth rasters.
//!
//! Satellite products arrive as 16-bit or floating-point reflectance; the
//! segmentation model and the visualization both want 8-bit RGB. The
//! conversion is a global min/max stretch:
//!
//! ```text
//! out = trunc((v - min) * 255 / (max - min))
//! ```
//!
//! A constant raster (`max == min`) maps to black.

use crate::types::{MultibandRaster, RgbImage};

/// Which bands contribute to the stretch range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StretchRange {
    /// Only the bands that end up in the RGB output.
    #[default]
    DisplayBands,
    /// Every band, including alpha or extra spectral bands.
    AllBands,
}

/// Band indices used for RGB output: the first three, or band 0
/// replicated when fewer than three exist.
fn display_bands(band_count: usize) -> [usize; 3] {
    if band_count >= 3 { [0, 1, 2] } else { [0, 0, 0] }
}

/// Minimum and maximum finite sample over the selected bands.
fn sample_range(raster: &MultibandRaster, range: StretchRange) -> Option<(f64, f64)> {
    let bands = raster.band_count();
    let limit = match range {
        StretchRange::DisplayBands => bands.min(3),
        StretchRange::AllBands => bands,
    };
    raster
        .samples()
        .chunks_exact(bands)
        .flat_map(|pixel| &pixel[..limit])
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// Stretch the raster to 8-bit RGB.
///
/// Non-finite samples map to 0.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn to_rgb8(raster: &MultibandRaster, range: StretchRange) -> RgbImage {
    let dims = raster.dimensions();
    let bands = display_bands(raster.band_count());
    let (min, max) = sample_range(raster, range).unwrap_or((0.0, 0.0));
    let scale = if max > min { 255.0 / (max - min) } else { 0.0 };

    let stretch = |v: f64| -> u8 {
        if v.is_finite() {
            ((v - min) * scale).clamp(0.0, 255.0) as u8
        } else {
            0
        }
    };

    RgbImage::from_fn(dims.width, dims.height, |x, y| {
        let pixel = raster.pixel(x, y);
        image::Rgb(bands.map(|b| stretch(pixel[b])))
    })
}

/// Take the display bands as-is, saturating into `0..=255`.
///
/// Used for rasters that are already 8-bit, such as annotations.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn cast_rgb8(raster: &MultibandRaster) -> RgbImage {
    let dims = raster.dimensions();
    let bands = display_bands(raster.band_count());
    RgbImage::from_fn(dims.width, dims.height, |x, y| {
        let pixel = raster.pixel(x, y);
        image::Rgb(bands.map(|b| {
            let v = pixel[b];
            if v.is_finite() {
                v.round().clamp(0.0, 255.0) as u8
            } else {
                0
            }
        }))
    })
}
