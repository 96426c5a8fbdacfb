//! End-to-end driver: satellite GeoTIFF in, masks, overlay and polygons out.
//!
//! All paths are fixed relative to a base directory:
//!
//! ```text
//! <base>/temp/imagery/temp_satellite.tif             input
//! <base>/temp/imagery/temp_satellite.tif_temp.png    8-bit sidecar (kept)
//! <base>/temp/segmentation/temp_masks.tif            unique-label mask
//! <base>/temp/segmentation/temp_annotations.tif      RGBA overlay
//! <base>/temp/segmentation/temp_polygons.shp         filtered polygons
//! <base>/temp/segmentation/visualization_<stem>.png  optional comparison
//! ```

use std::path::{Path, PathBuf};

use landseg_pipeline::stretch::{StretchRange, to_rgb8};
use landseg_pipeline::{
    Device, GeneratorError, MaskGenerator, MaskGeneratorParams, ModelType, PipelineError,
    VectorizeConfig, VectorizeOutcome,
};
use serde::{Deserialize, Serialize};

use crate::checkpoint::{self, CheckpointError, DownloadPolicy};
use crate::geotiff::{self, GeoTiffError};
use crate::vector::{VectorError, masks_to_shapefile};

/// Fixed file layout under a base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    base: PathBuf,
}

impl Layout {
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    #[must_use]
    pub fn imagery_dir(&self) -> PathBuf {
        self.base.join("temp").join("imagery")
    }

    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.base.join("temp").join("segmentation")
    }

    #[must_use]
    pub fn input_image(&self) -> PathBuf {
        self.imagery_dir().join("temp_satellite.tif")
    }

    /// The 8-bit PNG written next to the input.
    #[must_use]
    pub fn png_sidecar(&self) -> PathBuf {
        let mut name = self.input_image().into_os_string();
        name.push("_temp.png");
        PathBuf::from(name)
    }

    #[must_use]
    pub fn masks(&self) -> PathBuf {
        self.output_dir().join("temp_masks.tif")
    }

    #[must_use]
    pub fn annotations(&self) -> PathBuf {
        self.output_dir().join("temp_annotations.tif")
    }

    #[must_use]
    pub fn polygons(&self) -> PathBuf {
        self.output_dir().join("temp_polygons.shp")
    }

    #[must_use]
    pub fn visualization(&self) -> PathBuf {
        let stem = self
            .input_image()
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.output_dir().join(format!("visualization_{stem}.png"))
    }
}

/// Everything a segmentation run can be configured with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Root of the `temp/` layout.
    pub base_dir: PathBuf,
    pub model_type: ModelType,
    pub device: Device,
    /// Explicit checkpoint; `None` uses the torch hub cache.
    pub checkpoint: Option<PathBuf>,
    /// Forbid downloading a missing checkpoint.
    pub offline: bool,
    pub generator: MaskGeneratorParams,
    pub vectorize: VectorizeConfig,
    /// Opacity of the annotation overlay, `[0, 1]`.
    pub annotation_alpha: f64,
    /// Also save the three-panel comparison image.
    pub plot: bool,
}

impl SegmentConfig {
    pub const DEFAULT_ANNOTATION_ALPHA: f64 = landseg_pipeline::annotate::DEFAULT_ALPHA;

    #[must_use]
    pub fn layout(&self) -> Layout {
        Layout::new(&self.base_dir)
    }

    /// The configured checkpoint, or the cache default for the model.
    #[must_use]
    pub fn checkpoint_path(&self) -> PathBuf {
        self.checkpoint
            .clone()
            .unwrap_or_else(|| checkpoint::default_checkpoint_path(self.model_type))
    }
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            model_type: ModelType::default(),
            device: Device::default(),
            checkpoint: None,
            offline: false,
            generator: MaskGeneratorParams::default(),
            vectorize: VectorizeConfig::default(),
            annotation_alpha: Self::DEFAULT_ANNOTATION_ALPHA,
            plot: false,
        }
    }
}

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationReport {
    pub masks_path: PathBuf,
    pub annotations_path: PathBuf,
    /// `None` when no polygons survived and nothing was written.
    pub shapefile_path: Option<PathBuf>,
    pub visualization_path: Option<PathBuf>,
    /// Number of masks the model returned.
    pub mask_count: usize,
    pub outcome: VectorizeOutcome,
}

impl SegmentationReport {
    #[must_use]
    pub fn polygon_count(&self) -> usize {
        self.outcome.records().len()
    }
}

/// Errors from a segmentation run.
#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    /// The input raster does not exist.
    #[error("input image not found at {}", .0.display())]
    MissingInput(PathBuf),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Generator(#[from] GeneratorError),

    #[error(transparent)]
    GeoTiff(#[from] GeoTiffError),

    #[error(transparent)]
    Vector(#[from] VectorError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Segment the satellite image of `config`'s layout.
///
/// `build` receives the provisioned checkpoint path and returns the mask
/// generator to run.
///
/// # Pipeline steps
///
/// 1. Create the output directory and check that the input exists
/// 2. Provision the checkpoint
/// 3. Read the input and stretch it to 8-bit RGB (sidecar PNG if absent)
/// 4. Generate masks, compose unique labels and the overlay
/// 5. Write the mask and overlay GeoTIFFs
/// 6. Convert the mask to a filtered shapefile
/// 7. Optionally save the comparison image
///
/// # Errors
///
/// Returns [`SegmentError::MissingInput`] before any model work if the
/// input is absent; every other failure is wrapped from the stage that
/// raised it. Files written before the failure stay on disk.
pub fn segment_satellite_image<G, F>(
    config: &SegmentConfig,
    build: F,
) -> Result<SegmentationReport, SegmentError>
where
    G: MaskGenerator,
    F: FnOnce(&Path) -> G,
{
    let layout = config.layout();

    // 1. Layout.
    std::fs::create_dir_all(layout.output_dir())?;
    let input = layout.input_image();
    if !input.exists() {
        return Err(SegmentError::MissingInput(input));
    }

    // 2. Checkpoint.
    let policy = if config.offline {
        DownloadPolicy::Offline
    } else {
        DownloadPolicy::Download
    };
    let checkpoint = checkpoint::ensure_checkpoint(
        &config.checkpoint_path(),
        &checkpoint::checkpoint_url(config.model_type),
        policy,
    )?;

    // 3. Input.
    let source = geotiff::read_multiband(&input)?;
    let rgb = to_rgb8(&source, StretchRange::DisplayBands);
    let sidecar = layout.png_sidecar();
    if !sidecar.exists() {
        rgb.save(&sidecar)?;
        log::info!("wrote 8-bit sidecar {}", sidecar.display());
    }

    // 4. Segmentation.
    log::info!("segmenting {}", input.display());
    let generator = build(&checkpoint);
    let segmentation = landseg_pipeline::segment(
        &generator,
        &rgb,
        &config.generator,
        source.georef.clone(),
        config.annotation_alpha,
    )?;

    // 5. Rasters.
    let masks_path = layout.masks();
    let annotations_path = layout.annotations();
    geotiff::write_label_raster(&masks_path, &segmentation.labels)?;
    geotiff::write_rgba(&annotations_path, &segmentation.annotations, &source.georef)?;
    log::info!("masks saved to {}", masks_path.display());

    // 6. Polygons.
    let shp = layout.polygons();
    let outcome = masks_to_shapefile(&masks_path, &shp, &config.vectorize)?;
    let shapefile_path = matches!(outcome, VectorizeOutcome::Polygons { .. }).then_some(shp);

    // 7. Comparison.
    let visualization_path = if config.plot {
        let path = layout.visualization();
        save_visualization(&input, &annotations_path, &path)?;
        Some(path)
    } else {
        None
    };

    Ok(SegmentationReport {
        masks_path,
        annotations_path,
        shapefile_path,
        visualization_path,
        mask_count: segmentation.mask_count,
        outcome,
    })
}

/// Render the original | annotation | overlay comparison of two rasters
/// and save it as PNG.
///
/// # Errors
///
/// Returns [`SegmentError::GeoTiff`] if either raster cannot be read,
/// [`SegmentError::Pipeline`] if their sizes differ, and
/// [`SegmentError::Image`] if the PNG cannot be written.
pub fn save_visualization(
    original: &Path,
    annotation: &Path,
    output: &Path,
) -> Result<(), SegmentError> {
    let original = geotiff::read_multiband(original)?;
    let annotation = geotiff::read_multiband(annotation)?;
    let image = landseg_pipeline::visualize::comparison(&original, &annotation)?;
    image.save(output)?;
    log::info!("visualization saved to {}", output.display());
    Ok(())
}
