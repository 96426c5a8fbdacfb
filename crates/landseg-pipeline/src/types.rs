//! Shared types for the landseg pipeline.

use serde::{Deserialize, Serialize};

use crate::crs::Crs;

/// Re-export `GrayImage` so downstream crates can reference binary
/// masks without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbImage` for the 8-bit model input.
pub use image::RgbImage;

/// Re-export `RgbaImage` for annotation rasters.
pub use image::RgbaImage;

/// Raster dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Number of pixels covered by these dimensions.
    #[must_use]
    pub const fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Affine transform from pixel-corner coordinates to CRS coordinates.
///
/// ```text
/// x = a * col + b * row + c
/// y = d * col + e * row + f
/// ```
///
/// `(col, row) = (0, 0)` is the outer top-left corner of the top-left
/// pixel, not its center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl GeoTransform {
    /// Pixel space: one unit per pixel, rows increasing downward.
    pub const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 0.0,
        e: 1.0,
        f: 0.0,
    };

    /// A north-up transform with square-or-rectangular pixels.
    ///
    /// `origin` is the CRS coordinate of the top-left corner;
    /// `pixel_height` is given as a positive size and stored negated.
    #[must_use]
    pub const fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            a: pixel_width,
            b: 0.0,
            c: origin_x,
            d: 0.0,
            e: -pixel_height,
            f: origin_y,
        }
    }

    /// Map a pixel-corner coordinate to CRS coordinates.
    #[must_use]
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.a.mul_add(col, self.b.mul_add(row, self.c)),
            self.d.mul_add(col, self.e.mul_add(row, self.f)),
        )
    }

    /// Returns `true` when the transform has no rotation or shear terms.
    #[must_use]
    pub fn is_rectilinear(&self) -> bool {
        self.b == 0.0 && self.d == 0.0
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// GeoTIFF CRS tags exactly as a source raster stored them.
///
/// Carrying them unchanged keeps user-defined and citation-only CRSs on
/// derived rasters even when no EPSG code can be recovered.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoKeys {
    /// GeoKeyDirectory (tag 34735).
    pub directory: Vec<u16>,
    /// GeoDoubleParams (tag 34736).
    pub double_params: Vec<f64>,
    /// GeoAsciiParams (tag 34737).
    pub ascii_params: String,
}

/// Georeferencing carried from a source raster to every derived product.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoReference {
    pub transform: GeoTransform,
    /// `None` when the source raster carries no recognised CRS.
    pub crs: Option<Crs>,
    /// Raw CRS tags of the source, written back verbatim when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geokeys: Option<GeoKeys>,
}

/// A single-band raster of segment ids; 0 is background.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelRaster {
    dimensions: Dimensions,
    labels: Vec<u32>,
    /// Transform and CRS of the source raster.
    pub georef: GeoReference,
}

impl LabelRaster {
    /// Wrap row-major label data.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DimensionMismatch`] if `labels` does not
    /// hold exactly `width * height` values.
    pub fn new(
        dimensions: Dimensions,
        labels: Vec<u32>,
        georef: GeoReference,
    ) -> Result<Self, PipelineError> {
        if labels.len() != dimensions.pixel_count() {
            return Err(PipelineError::DimensionMismatch {
                expected: dimensions.pixel_count(),
                actual: labels.len(),
            });
        }
        Ok(Self {
            dimensions,
            labels,
            georef,
        })
    }

    /// An all-background raster.
    #[must_use]
    pub fn empty(dimensions: Dimensions, georef: GeoReference) -> Self {
        Self {
            dimensions,
            labels: vec![0; dimensions.pixel_count()],
            georef,
        }
    }

    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Row-major label values.
    #[must_use]
    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    /// Mutable row-major label values.
    pub fn labels_mut(&mut self) -> &mut [u32] {
        &mut self.labels
    }

    /// Label at `(x, y)`, or `None` outside the raster.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.dimensions.width || y >= self.dimensions.height {
            return None;
        }
        let idx = y as usize * self.dimensions.width as usize + x as usize;
        self.labels.get(idx).copied()
    }
}

/// A band-interleaved raster with any number of bands.
///
/// Samples are widened to `f64` so that 8-, 16- and 32-bit as well as
/// floating-point sources share one representation.
#[derive(Debug, Clone, PartialEq)]
pub struct MultibandRaster {
    dimensions: Dimensions,
    bands: usize,
    samples: Vec<f64>,
    pub georef: GeoReference,
}

impl MultibandRaster {
    /// Wrap pixel-interleaved samples (`[b0, b1, .., b0, b1, ..]`).
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DimensionMismatch`] if the sample count is
    /// not `width * height * bands`, and [`PipelineError::InvalidConfig`]
    /// if `bands` is zero.
    pub fn new(
        dimensions: Dimensions,
        bands: usize,
        samples: Vec<f64>,
        georef: GeoReference,
    ) -> Result<Self, PipelineError> {
        if bands == 0 {
            return Err(PipelineError::InvalidConfig(
                "raster must have at least one band".to_string(),
            ));
        }
        let expected = dimensions.pixel_count() * bands;
        if samples.len() != expected {
            return Err(PipelineError::DimensionMismatch {
                expected,
                actual: samples.len(),
            });
        }
        Ok(Self {
            dimensions,
            bands,
            samples,
            georef,
        })
    }

    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Number of bands per pixel.
    #[must_use]
    pub const fn band_count(&self) -> usize {
        self.bands
    }

    /// All samples, pixel-interleaved.
    #[must_use]
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// The samples of one pixel (one value per band).
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> &[f64] {
        let start = (y as usize * self.dimensions.width as usize + x as usize) * self.bands;
        &self.samples[start..start + self.bands]
    }
}

/// One polygon traced from the label raster.
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonRecord {
    /// Geometry in CRS coordinates.
    pub geometry: geo::Polygon<f64>,
    /// The label value of the traced region.
    pub segment_id: u32,
    /// Planar area of `geometry` in CRS units.
    pub area: f64,
}

/// Errors that can occur in the pure pipeline stages.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Raster data does not match its declared dimensions.
    #[error("raster holds {actual} values, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Two rasters that must line up have different sizes.
    #[error("raster size {actual:?} does not match {expected:?}")]
    SizeMismatch {
        expected: Dimensions,
        actual: Dimensions,
    },

    /// A configuration value is out of range.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn north_up_maps_corners() {
        let t = GeoTransform::north_up(500_000.0, 4_000_000.0, 10.0, 10.0);
        assert_eq!(t.apply(0.0, 0.0), (500_000.0, 4_000_000.0));
        assert_eq!(t.apply(2.0, 3.0), (500_020.0, 3_999_970.0));
        assert!(t.is_rectilinear());
    }

    #[test]
    fn rotated_transform_is_not_rectilinear() {
        let t = GeoTransform {
            a: 0.0,
            b: 2.0,
            c: 0.0,
            d: 3.0,
            e: 0.0,
            f: 0.0,
        };
        assert!(!t.is_rectilinear());
        assert_eq!(t.apply(1.0, 1.0), (2.0, 3.0));
    }

    #[test]
    fn label_raster_rejects_wrong_length() {
        let dims = Dimensions {
            width: 3,
            height: 2,
        };
        let result = LabelRaster::new(dims, vec![0; 5], GeoReference::default());
        assert!(matches!(
            result,
            Err(PipelineError::DimensionMismatch {
                expected: 6,
                actual: 5
            })
        ));
    }

    #[test]
    fn label_raster_get_is_bounds_checked() {
        let dims = Dimensions {
            width: 2,
            height: 2,
        };
        let raster = LabelRaster::new(dims, vec![1, 2, 3, 4], GeoReference::default())
            .unwrap_or_else(|_| LabelRaster::empty(dims, GeoReference::default()));
        assert_eq!(raster.get(1, 1), Some(4));
        assert_eq!(raster.get(2, 0), None);
    }

    #[test]
    fn multiband_pixel_slices_bands() {
        let dims = Dimensions {
            width: 2,
            height: 1,
        };
        let raster = MultibandRaster::new(
            dims,
            3,
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            GeoReference::default(),
        );
        assert!(matches!(&raster, Ok(r) if r.pixel(1, 0) == [4.0, 5.0, 6.0]));
    }

    #[test]
    fn multiband_rejects_zero_bands() {
        let dims = Dimensions {
            width: 1,
            height: 1,
        };
        let result = MultibandRaster::new(dims, 0, vec![], GeoReference::default());
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn error_display() {
        let err = PipelineError::InvalidConfig("percentile out of range".to_string());
        assert_eq!(
            err.to_string(),
            "invalid pipeline configuration: percentile out of range"
        );
    }
}
