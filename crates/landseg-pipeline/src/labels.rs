//! Flatten overlapping binary masks into one label raster.
//!
//! Masks are painted largest first, each with a unique label (`1` for the
//! largest, counting up), so smaller masks overwrite the larger ones they
//! overlap and every pixel ends up with at most one label.

use crate::generator::{BinaryMask, GeneratorError, area_order, validate_masks};
use crate::types::{Dimensions, GeoReference, LabelRaster};

/// Compose `masks` into a unique-label raster georeferenced like the
/// source image.
///
/// # Errors
///
/// Returns [`GeneratorError::MaskSize`] if a mask does not match
/// `dimensions`.
pub fn compose_unique(
    masks: &[BinaryMask],
    dimensions: Dimensions,
    georef: GeoReference,
) -> Result<LabelRaster, GeneratorError> {
    validate_masks(dimensions, masks)?;
    let mut raster = LabelRaster::empty(dimensions, georef);
    let labels = raster.labels_mut();

    for (label, idx) in (1u32..).zip(area_order(masks)) {
        for (slot, pixel) in labels.iter_mut().zip(masks[idx].mask.pixels()) {
            if pixel.0[0] > 0 {
                *slot = label;
            }
        }
    }
    Ok(raster)
}
