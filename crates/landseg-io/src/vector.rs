//! Shapefile output.
//!
//! Polygon records are written as a `.shp`/`.shx`/`.dbf` triple with two
//! numeric attributes, `segment_id` and `area`, plus a `.prj` sidecar
//! holding the CRS as WKT.

use std::path::{Path, PathBuf};

use geo::LineString;
use landseg_pipeline::{Crs, PipelineError, PolygonRecord, VectorizeConfig, VectorizeOutcome};
use shapefile::dbase::{FieldName, FieldValue, Record, TableWriterBuilder};
use shapefile::{Point, PolygonRing};

use crate::geotiff::{GeoTiffError, read_label_raster};

/// Attribute holding the label value of each polygon.
pub const SEGMENT_ID_FIELD: &str = "segment_id";

/// Attribute holding the planar area of each polygon.
pub const AREA_FIELD: &str = "area";

/// Errors from vector output.
#[derive(Debug, thiserror::Error)]
pub enum VectorError {
    /// The mask raster could not be read.
    #[error(transparent)]
    GeoTiff(#[from] GeoTiffError),

    /// Vectorizing the mask failed.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// The shapefile could not be written.
    #[error("shapefile error: {0}")]
    Shapefile(#[from] shapefile::Error),

    /// An attribute name was rejected by the dBase writer.
    #[error("invalid attribute name {0:?}")]
    FieldName(&'static str),

    /// The `.prj` sidecar could not be read or written.
    #[error("failed to access {}: {source}", path.display())]
    Prj {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn field_name(name: &'static str) -> Result<FieldName, VectorError> {
    FieldName::try_from(name).map_err(|_| VectorError::FieldName(name))
}

fn ring(line: &LineString<f64>) -> Vec<Point> {
    line.coords().map(|c| Point::new(c.x, c.y)).collect()
}

fn to_shape(polygon: &geo::Polygon<f64>) -> shapefile::Polygon {
    let mut rings = vec![PolygonRing::Outer(ring(polygon.exterior()))];
    rings.extend(
        polygon
            .interiors()
            .iter()
            .map(|hole| PolygonRing::Inner(ring(hole))),
    );
    shapefile::Polygon::with_rings(rings)
}

/// Path of the `.prj` sidecar for `shp_path`.
#[must_use]
pub fn prj_path(shp_path: &Path) -> PathBuf {
    shp_path.with_extension("prj")
}

/// Write `records` to `path` in order, with a `.prj` for `crs`.
///
/// When `crs` is `None` or has no WKT rendering the `.prj` is skipped
/// with a warning.
///
/// # Errors
///
/// Returns [`VectorError::Shapefile`] if any of the three shapefile
/// components cannot be written and [`VectorError::Prj`] if the sidecar
/// cannot be written.
pub fn write_shapefile(
    path: &Path,
    records: &[PolygonRecord],
    crs: Option<Crs>,
) -> Result<(), VectorError> {
    let table = TableWriterBuilder::new()
        .add_numeric_field(field_name(SEGMENT_ID_FIELD)?, 10, 0)
        .add_numeric_field(field_name(AREA_FIELD)?, 24, 15);
    let mut writer = shapefile::Writer::from_path(path, table)?;

    for record in records {
        let mut attributes = Record::default();
        attributes.insert(
            SEGMENT_ID_FIELD.to_string(),
            FieldValue::Numeric(Some(f64::from(record.segment_id))),
        );
        attributes.insert(
            AREA_FIELD.to_string(),
            FieldValue::Numeric(Some(record.area)),
        );
        writer.write_shape_and_record(&to_shape(&record.geometry), &attributes)?;
    }
    // Headers are finalized on drop.
    drop(writer);

    match crs.and_then(Crs::to_wkt) {
        Some(wkt) => {
            let prj = prj_path(path);
            std::fs::write(&prj, wkt).map_err(|source| VectorError::Prj { path: prj, source })?;
        }
        None => log::warn!(
            "no WKT available for CRS {}; {} written without .prj",
            crs.map_or_else(|| "(unknown)".to_string(), |c| c.to_string()),
            path.display()
        ),
    }
    Ok(())
}

/// Read the CRS from the `.prj` sidecar of `shp_path`.
///
/// Returns `Ok(None)` when there is no sidecar or its WKT is not
/// recognised.
///
/// # Errors
///
/// Returns [`VectorError::Prj`] if the sidecar exists but cannot be read.
pub fn read_prj(shp_path: &Path) -> Result<Option<Crs>, VectorError> {
    let prj = prj_path(shp_path);
    match std::fs::read_to_string(&prj) {
        Ok(wkt) => Ok(Crs::from_wkt(&wkt)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(VectorError::Prj { path: prj, source }),
    }
}

/// Convert a label mask GeoTIFF to a filtered, sorted shapefile.
///
/// Nothing is written when the outcome is
/// [`VectorizeOutcome::NoSegments`] or [`VectorizeOutcome::AllFiltered`];
/// an existing file at `shp_path` is left untouched.
///
/// # Errors
///
/// Returns [`VectorError::GeoTiff`] if the mask cannot be read,
/// [`VectorError::Pipeline`] for an out-of-range percentile, and the
/// errors of [`write_shapefile`].
pub fn masks_to_shapefile(
    mask_path: &Path,
    shp_path: &Path,
    config: &VectorizeConfig,
) -> Result<VectorizeOutcome, VectorError> {
    let raster = read_label_raster(mask_path)?;
    let outcome = landseg_pipeline::vectorize(&raster, config)?;
    if let VectorizeOutcome::Polygons { records, .. } = &outcome {
        write_shapefile(shp_path, records, raster.georef.crs)?;
        log::info!("saved {} polygons to {}", records.len(), shp_path.display());
    }
    Ok(outcome)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use geo::polygon;

    fn square_with_hole() -> geo::Polygon<f64> {
        polygon!(
            exterior: [(x: 0.0, y: 0.0), (x: 4.0, y: 0.0), (x: 4.0, y: 4.0), (x: 0.0, y: 4.0)],
            interiors: [[(x: 1.0, y: 1.0), (x: 1.0, y: 2.0), (x: 2.0, y: 2.0), (x: 2.0, y: 1.0)]]
        )
    }

    #[test]
    fn shape_keeps_all_rings() {
        let shape = to_shape(&square_with_hole());
        assert_eq!(shape.rings().len(), 2);
        assert!(matches!(shape.rings()[0], PolygonRing::Outer(_)));
        assert!(matches!(shape.rings()[1], PolygonRing::Inner(_)));
    }

    #[test]
    fn prj_is_written_for_known_crs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.shp");
        let record = PolygonRecord {
            geometry: square_with_hole(),
            segment_id: 3,
            area: 15.0,
        };
        write_shapefile(&path, &[record], Some(Crs::Geographic(4326))).unwrap();
        assert_eq!(read_prj(&path).unwrap(), Some(Crs::Geographic(4326)));
    }

    #[test]
    fn prj_is_skipped_without_crs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.shp");
        let record = PolygonRecord {
            geometry: square_with_hole(),
            segment_id: 1,
            area: 15.0,
        };
        write_shapefile(&path, &[record], None).unwrap();
        assert!(path.exists());
        assert!(!prj_path(&path).exists());
        assert_eq!(read_prj(&path).unwrap(), None);
    }
}
