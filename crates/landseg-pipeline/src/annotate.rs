//! Colour overlay of the generated masks.
//!
//! Each mask is filled with a colour derived from its paint order, on a
//! transparent background, largest mask first. Colours come from a
//! SipHash of the order index so reruns on the same masks produce the
//! same image.

use std::hash::Hasher;

use siphasher::sip::SipHasher13;

use crate::generator::{BinaryMask, GeneratorError, area_order, validate_masks};
use crate::types::{Dimensions, RgbaImage};

/// Default overlay opacity.
pub const DEFAULT_ALPHA: f64 = 1.0;

/// Colour of the `index`-th painted mask.
#[must_use]
pub fn mask_color(index: usize) -> [u8; 3] {
    let mut hasher = SipHasher13::new_with_keys(0x6c61_6e64, 0x7365_676d);
    hasher.write_usize(index);
    let [r, g, b, ..] = hasher.finish().to_le_bytes();
    [r, g, b]
}

/// Render the annotation overlay.
///
/// `alpha` is clamped to `[0, 1]` and applied to every painted pixel.
///
/// # Errors
///
/// Returns [`GeneratorError::MaskSize`] if a mask does not match
/// `dimensions`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn render_annotations(
    masks: &[BinaryMask],
    dimensions: Dimensions,
    alpha: f64,
) -> Result<RgbaImage, GeneratorError> {
    validate_masks(dimensions, masks)?;
    let alpha = (alpha.clamp(0.0, 1.0) * 255.0).round() as u8;
    let mut overlay = RgbaImage::new(dimensions.width, dimensions.height);

    for (index, idx) in area_order(masks).into_iter().enumerate() {
        let [r, g, b] = mask_color(index);
        for (out, pixel) in overlay.pixels_mut().zip(masks[idx].mask.pixels()) {
            if pixel.0[0] > 0 {
                *out = image::Rgba([r, g, b, alpha]);
            }
        }
    }
    Ok(overlay)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::generator::tests::mask;

    const DIMS: Dimensions = Dimensions {
        width: 3,
        height: 1,
    };

    #[test]
    fn colors_are_deterministic() {
        assert_eq!(mask_color(0), mask_color(0));
        assert_ne!(mask_color(0), mask_color(1));
    }

    #[test]
    fn background_is_transparent() {
        let overlay = render_annotations(&[mask(3, 1, &[(0, 0)])], DIMS, 1.0).unwrap();
        assert_eq!(overlay.get_pixel(1, 0).0, [0, 0, 0, 0]);
        assert_eq!(overlay.get_pixel(0, 0).0[3], 255);
    }

    #[test]
    fn larger_mask_painted_first() {
        let small = mask(3, 1, &[(1, 0)]);
        let large = mask(3, 1, &[(0, 0), (1, 0), (2, 0)]);
        let overlay = render_annotations(&[small, large], DIMS, 1.0).unwrap();

        let [r0, g0, b0] = mask_color(0);
        let [r1, g1, b1] = mask_color(1);
        assert_eq!(overlay.get_pixel(0, 0).0, [r0, g0, b0, 255]);
        assert_eq!(overlay.get_pixel(1, 0).0, [r1, g1, b1, 255]);
    }

    #[test]
    fn alpha_is_applied_and_clamped() {
        let m = [mask(3, 1, &[(2, 0)])];
        let half = render_annotations(&m, DIMS, 0.5).unwrap();
        assert_eq!(half.get_pixel(2, 0).0[3], 128);
        let over = render_annotations(&m, DIMS, 3.0).unwrap();
        assert_eq!(over.get_pixel(2, 0).0[3], 255);
    }
}
