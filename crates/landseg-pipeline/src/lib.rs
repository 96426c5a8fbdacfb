//! landseg-pipeline: Pure segmentation-to-polygon pipeline (sans-IO).
//!
//! Turns model output into vector land regions through:
//! 8-bit stretch -> mask generation -> unique labelling ->
//! percentile filter -> polygon tracing -> sorted records.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! rasters and returns structured data. GeoTIFF, shapefile, checkpoint
//! and model-process handling live in `landseg-io`.

pub mod annotate;
pub mod crs;
pub mod generator;
pub mod labels;
pub mod percentile;
pub mod polygonize;
pub mod stretch;
pub mod types;
pub mod vectorize;
pub mod visualize;

pub use crs::Crs;
pub use generator::{
    BinaryMask, Device, GeneratorError, MaskGenerator, MaskGeneratorParams, ModelType,
};
pub use types::{
    Dimensions, GeoKeys, GeoReference, GeoTransform, GrayImage, LabelRaster, MultibandRaster,
    PipelineError, PolygonRecord, RgbImage, RgbaImage,
};
pub use vectorize::{VectorizeConfig, VectorizeOutcome, vectorize};

/// Rasters derived from one run of the mask generator.
#[derive(Debug, Clone)]
pub struct Segmentation {
    /// Unique-label mask, georeferenced like the source.
    pub labels: LabelRaster,
    /// Colour overlay of the masks.
    pub annotations: RgbaImage,
    /// Number of masks the model returned.
    pub mask_count: usize,
}

/// Run `generator` on an 8-bit image and derive the label and
/// annotation rasters.
///
/// # Pipeline steps
///
/// 1. Generate binary masks
/// 2. Compose unique labels, largest mask first
/// 3. Render the colour annotation overlay
///
/// # Errors
///
/// Propagates [`GeneratorError`] from the generator, and returns
/// [`GeneratorError::MaskSize`] if a mask does not cover the image.
pub fn segment(
    generator: &dyn MaskGenerator,
    image: &RgbImage,
    params: &MaskGeneratorParams,
    georef: GeoReference,
    annotation_alpha: f64,
) -> Result<Segmentation, GeneratorError> {
    let dimensions = Dimensions {
        width: image.width(),
        height: image.height(),
    };

    // 1. Mask generation.
    let masks = generator.generate(image, params)?;
    log::info!("model produced {} masks", masks.len());

    // 2. Unique labels.
    let labels = labels::compose_unique(&masks, dimensions, georef)?;

    // 3. Annotation overlay.
    let annotations = annotate::render_annotations(&masks, dimensions, annotation_alpha)?;

    Ok(Segmentation {
        labels,
        annotations,
        mask_count: masks.len(),
    })
}
