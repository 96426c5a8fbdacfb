//! Integration tests: label mask GeoTIFF on disk to shapefile on disk.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::path::{Path, PathBuf};

use landseg_io::geotiff::{read_label_raster, write_label_raster};
use landseg_io::vector::{AREA_FIELD, SEGMENT_ID_FIELD, read_prj};
use landseg_io::{VectorError, masks_to_shapefile};
use landseg_pipeline::{
    Crs, Dimensions, GeoReference, GeoTransform, LabelRaster, VectorizeConfig, VectorizeOutcome,
};
use shapefile::dbase::{FieldValue, Record};

struct Scratch {
    _dir: tempfile::TempDir,
    mask: PathBuf,
    shp: PathBuf,
}

fn scratch() -> Scratch {
    let dir = tempfile::tempdir().unwrap();
    let mask = dir.path().join("masks.tif");
    let shp = dir.path().join("polygons.shp");
    Scratch {
        _dir: dir,
        mask,
        shp,
    }
}

fn utm() -> GeoReference {
    GeoReference {
        transform: GeoTransform::north_up(600_000.0, 5_000_000.0, 10.0, 10.0),
        crs: Some(Crs::Projected(32632)),
        geokeys: None,
    }
}

/// British National Grid.
fn osgb() -> GeoReference {
    GeoReference {
        transform: GeoTransform::north_up(530_000.0, 180_000.0, 5.0, 5.0),
        crs: Some(Crs::Projected(27700)),
        geokeys: None,
    }
}

fn write_mask(path: &Path, width: u32, labels: Vec<u32>, georef: GeoReference) {
    let height = u32::try_from(labels.len()).unwrap() / width;
    let raster = LabelRaster::new(Dimensions { width, height }, labels, georef).unwrap();
    write_label_raster(path, &raster).unwrap();
}

fn numeric(record: &Record, field: &str) -> f64 {
    match record.get(field) {
        Some(FieldValue::Numeric(Some(v))) => *v,
        other => panic!("field {field} is {other:?}"),
    }
}

fn read_back(shp: &Path) -> Vec<(shapefile::Polygon, Record)> {
    shapefile::read_as::<_, shapefile::Polygon, Record>(shp).expect("shapefile should be readable")
}

fn at_percentile(threshold_percentile: f64) -> VectorizeConfig {
    VectorizeConfig {
        threshold_percentile,
    }
}

#[test]
fn empty_mask_writes_nothing() {
    let s = scratch();
    write_mask(&s.mask, 3, vec![0; 6], utm());

    let outcome = masks_to_shapefile(&s.mask, &s.shp, &VectorizeConfig::default()).unwrap();
    assert_eq!(outcome, VectorizeOutcome::NoSegments);
    assert!(!s.shp.exists());
}

#[test]
fn single_region_becomes_one_polygon() {
    let s = scratch();
    #[rustfmt::skip]
    let labels = vec![
        0, 7, 7, 0,
        0, 7, 7, 0,
        0, 7, 7, 0,
    ];
    write_mask(&s.mask, 4, labels, utm());

    masks_to_shapefile(&s.mask, &s.shp, &VectorizeConfig::default()).unwrap();
    let shapes = read_back(&s.shp);
    assert_eq!(shapes.len(), 1);

    let (polygon, record) = &shapes[0];
    assert!((numeric(record, SEGMENT_ID_FIELD) - 7.0).abs() < f64::EPSILON);
    // Six 10 m pixels.
    assert!((numeric(record, AREA_FIELD) - 600.0).abs() < 1e-6);

    let bbox = polygon.bbox();
    assert!((bbox.min.x - 600_010.0).abs() < 1e-6);
    assert!((bbox.max.x - 600_030.0).abs() < 1e-6);
    assert!((bbox.min.y - 4_999_970.0).abs() < 1e-6);
    assert!((bbox.max.y - 5_000_000.0).abs() < 1e-6);
}

#[test]
fn crs_is_carried_to_prj() {
    let s = scratch();
    write_mask(&s.mask, 2, vec![5, 5], utm());

    masks_to_shapefile(&s.mask, &s.shp, &VectorizeConfig::default()).unwrap();
    assert_eq!(read_prj(&s.shp).unwrap(), Some(Crs::Projected(32632)));
}

#[test]
fn national_grid_crs_is_carried() {
    let s = scratch();
    write_mask(&s.mask, 2, vec![5, 5], osgb());

    assert_eq!(read_label_raster(&s.mask).unwrap().georef.crs, Some(Crs::Projected(27700)));
    masks_to_shapefile(&s.mask, &s.shp, &VectorizeConfig::default()).unwrap();
    assert_eq!(read_prj(&s.shp).unwrap(), Some(Crs::Projected(27700)));
}

#[test]
fn geographic_crs_is_carried() {
    let s = scratch();
    let georef = GeoReference {
        transform: GeoTransform::north_up(-93.0, 45.0, 0.001, 0.001),
        crs: Some(Crs::Geographic(4269)),
        geokeys: None,
    };
    write_mask(&s.mask, 1, vec![2], georef);

    assert_eq!(read_label_raster(&s.mask).unwrap().georef.crs, Some(Crs::Geographic(4269)));
    masks_to_shapefile(&s.mask, &s.shp, &VectorizeConfig::default()).unwrap();
    assert_eq!(read_prj(&s.shp).unwrap(), Some(Crs::Geographic(4269)));
}

#[test]
fn single_pixel_mask_becomes_one_polygon() {
    let s = scratch();
    write_mask(&s.mask, 1, vec![5], osgb());

    masks_to_shapefile(&s.mask, &s.shp, &VectorizeConfig::default()).unwrap();
    let shapes = read_back(&s.shp);
    assert_eq!(shapes.len(), 1);
    assert!((numeric(&shapes[0].1, SEGMENT_ID_FIELD) - 5.0).abs() < f64::EPSILON);
    assert!((numeric(&shapes[0].1, AREA_FIELD) - 25.0).abs() < 1e-6);
}

#[test]
fn fully_covered_mask_keeps_every_label() {
    let s = scratch();
    #[rustfmt::skip]
    let labels = vec![
        1, 3,
        2, 1,
    ];
    write_mask(&s.mask, 2, labels, utm());

    masks_to_shapefile(&s.mask, &s.shp, &at_percentile(0.0)).unwrap();
    let shapes = read_back(&s.shp);
    let ids: Vec<f64> = shapes.iter().map(|(_, r)| numeric(r, SEGMENT_ID_FIELD)).collect();
    assert_eq!(ids, vec![3.0, 2.0, 1.0, 1.0]);
    let total: f64 = shapes.iter().map(|(_, r)| numeric(r, AREA_FIELD)).sum();
    assert!((total - 400.0).abs() < 1e-6);
}

#[test]
fn adjacent_labels_in_one_row_at_zero_percentile() {
    let s = scratch();
    write_mask(&s.mask, 99, (1..=99).collect(), utm());

    let outcome = masks_to_shapefile(&s.mask, &s.shp, &at_percentile(0.0)).unwrap();
    assert_eq!(outcome.records().len(), 99);
    assert_eq!(read_back(&s.shp).len(), 99);
}

#[test]
fn low_labels_are_filtered_by_percentile() {
    let s = scratch();
    // Labels 1..=99, one pixel each.
    write_mask(&s.mask, 99, (1..=99).collect(), utm());

    let outcome = masks_to_shapefile(&s.mask, &s.shp, &VectorizeConfig::default()).unwrap();
    let threshold = outcome.threshold().unwrap();
    assert!((threshold - 5.9).abs() < 1e-9);

    let ids: Vec<f64> = read_back(&s.shp)
        .iter()
        .map(|(_, r)| numeric(r, SEGMENT_ID_FIELD))
        .collect();
    assert_eq!(ids.len(), 94);
    assert!((ids[0] - 99.0).abs() < f64::EPSILON);
    assert!((ids[93] - 6.0).abs() < f64::EPSILON);
    assert!(ids.windows(2).all(|w| w[0] > w[1]));
}

#[test]
fn records_sorted_by_segment_id_descending() {
    let s = scratch();
    #[rustfmt::skip]
    let labels = vec![
        10, 10, 0, 90,
        10, 10, 0, 90,
    ];
    write_mask(&s.mask, 4, labels, utm());

    masks_to_shapefile(&s.mask, &s.shp, &at_percentile(0.0)).unwrap();
    let ids: Vec<f64> = read_back(&s.shp)
        .iter()
        .map(|(_, r)| numeric(r, SEGMENT_ID_FIELD))
        .collect();
    assert_eq!(ids, vec![90.0, 10.0]);
}

#[test]
fn region_with_hole_keeps_inner_ring() {
    let s = scratch();
    #[rustfmt::skip]
    let labels = vec![
        4, 4, 4,
        4, 0, 4,
        4, 4, 4,
    ];
    write_mask(&s.mask, 3, labels, utm());

    masks_to_shapefile(&s.mask, &s.shp, &VectorizeConfig::default()).unwrap();
    let shapes = read_back(&s.shp);
    assert_eq!(shapes.len(), 1);
    assert_eq!(shapes[0].0.rings().len(), 2);
    assert!((numeric(&shapes[0].1, AREA_FIELD) - 800.0).abs() < 1e-6);
}

#[test]
fn out_of_range_percentile_is_rejected() {
    let s = scratch();
    write_mask(&s.mask, 1, vec![1], utm());

    let result = masks_to_shapefile(&s.mask, &s.shp, &at_percentile(150.0));
    assert!(matches!(result, Err(VectorError::Pipeline(_))));
    assert!(!s.shp.exists());
}

#[test]
fn missing_mask_is_geotiff_error() {
    let s = scratch();
    let result = masks_to_shapefile(&s.mask, &s.shp, &VectorizeConfig::default());
    assert!(matches!(result, Err(VectorError::GeoTiff(_))));
}
