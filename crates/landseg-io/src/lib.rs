//! landseg-io: Files, downloads and processes around the landseg pipeline.
//!
//! Reads and writes georeferenced rasters, writes shapefiles, provisions
//! model checkpoints, runs the segmentation model as a child process and
//! drives the end-to-end run over the fixed `temp/` layout.

pub mod checkpoint;
pub mod command;
pub mod geotiff;
pub mod segment;
pub mod vector;

pub use checkpoint::{CheckpointError, DownloadPolicy, ensure_checkpoint};
pub use command::CommandMaskGenerator;
pub use geotiff::GeoTiffError;
pub use segment::{
    Layout, SegmentConfig, SegmentError, SegmentationReport, save_visualization,
    segment_satellite_image,
};
pub use vector::{VectorError, masks_to_shapefile, write_shapefile};
