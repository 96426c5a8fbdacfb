//! Side-by-side comparison image: original | segmentation | overlay.
//!
//! The overlay is a fixed-weight blend of the 8-bit original and the
//! annotation raster. Only the first three bands of either input are
//! shown.

use image::GenericImage;

use crate::stretch::{StretchRange, cast_rgb8, to_rgb8};
use crate::types::{Dimensions, MultibandRaster, PipelineError, RgbImage};

/// Weight of the original image in the overlay.
pub const ORIGINAL_WEIGHT: f64 = 0.7;

/// Weight of the annotation in the overlay.
pub const ANNOTATION_WEIGHT: f64 = 0.3;

/// White gutter between panels, in pixels.
pub const PANEL_GAP: u32 = 8;

/// Weighted per-channel blend with rounding and saturation.
///
/// # Errors
///
/// Returns [`PipelineError::SizeMismatch`] if the images differ in size.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn blend(
    original: &RgbImage,
    annotation: &RgbImage,
    original_weight: f64,
    annotation_weight: f64,
) -> Result<RgbImage, PipelineError> {
    check_same_size(original, annotation)?;
    Ok(RgbImage::from_fn(original.width(), original.height(), |x, y| {
        let o = original.get_pixel(x, y).0;
        let a = annotation.get_pixel(x, y).0;
        image::Rgb(std::array::from_fn(|c| {
            f64::from(o[c])
                .mul_add(original_weight, f64::from(a[c]) * annotation_weight)
                .round()
                .clamp(0.0, 255.0) as u8
        }))
    }))
}

/// Lay `panels` out left to right with a [`PANEL_GAP`] white gutter.
///
/// # Errors
///
/// Returns [`PipelineError::SizeMismatch`] if the panels differ in size.
pub fn compose_panels(panels: &[&RgbImage]) -> Result<RgbImage, PipelineError> {
    let Some(first) = panels.first() else {
        return Ok(RgbImage::new(0, 0));
    };
    for panel in &panels[1..] {
        check_same_size(first, panel)?;
    }

    let count = u32::try_from(panels.len())
        .map_err(|_| PipelineError::InvalidConfig("too many panels".to_string()))?;
    let width = first.width() * count + PANEL_GAP * (count - 1);
    let mut canvas = RgbImage::from_pixel(width, first.height(), image::Rgb([255, 255, 255]));

    for (i, panel) in (0u32..).zip(panels) {
        let x = i * (first.width() + PANEL_GAP);
        canvas
            .copy_from(*panel, x, 0)
            .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
    }
    Ok(canvas)
}

/// Build the three-panel comparison image.
///
/// The original is stretched to 8-bit over all of its bands; the
/// annotation is taken as 8-bit already.
///
/// # Errors
///
/// Returns [`PipelineError::SizeMismatch`] if the rasters differ in size.
pub fn comparison(
    original: &MultibandRaster,
    annotation: &MultibandRaster,
) -> Result<RgbImage, PipelineError> {
    if original.dimensions() != annotation.dimensions() {
        return Err(PipelineError::SizeMismatch {
            expected: original.dimensions(),
            actual: annotation.dimensions(),
        });
    }
    let original = to_rgb8(original, StretchRange::AllBands);
    let annotation = cast_rgb8(annotation);
    let overlay = blend(&original, &annotation, ORIGINAL_WEIGHT, ANNOTATION_WEIGHT)?;
    compose_panels(&[&original, &annotation, &overlay])
}

fn check_same_size(expected: &RgbImage, actual: &RgbImage) -> Result<(), PipelineError> {
    let dims = |img: &RgbImage| Dimensions {
        width: img.width(),
        height: img.height(),
    };
    if dims(expected) == dims(actual) {
        Ok(())
    } else {
        Err(PipelineError::SizeMismatch {
            expected: dims(expected),
            actual: dims(actual),
        })
    }
}
