//! Mask-to-polygon conversion with percentile label filtering.
//!
//! This is the pure half of `masks_to_shapefile`: the label raster goes
//! in, sorted [`PolygonRecord`]s come out. Reading the mask and writing
//! the shapefile live in `landseg-io`.

use geo::Area;
use serde::{Deserialize, Serialize};

use crate::percentile::{apply_threshold, distinct_labels, percentile};
use crate::polygonize::polygonize;
use crate::types::{LabelRaster, PipelineError, PolygonRecord};

/// Parameters for [`vectorize`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorizeConfig {
    /// Labels strictly below this percentile of the distinct non-zero
    /// labels are dropped. Must lie in `[0, 100]`.
    pub threshold_percentile: f64,
}

impl VectorizeConfig {
    pub const DEFAULT_THRESHOLD_PERCENTILE: f64 = 5.0;
}

impl Default for VectorizeConfig {
    fn default() -> Self {
        Self {
            threshold_percentile: Self::DEFAULT_THRESHOLD_PERCENTILE,
        }
    }
}

/// What [`vectorize`] produced.
///
/// The two empty outcomes are reported conditions, not errors: no
/// output should be written for them.
#[derive(Debug, Clone, PartialEq)]
pub enum VectorizeOutcome {
    /// The mask has no non-zero pixels.
    NoSegments,
    /// Every region was removed by the threshold.
    AllFiltered { threshold: f64 },
    /// Polygons sorted by `segment_id` descending.
    Polygons {
        threshold: f64,
        records: Vec<PolygonRecord>,
    },
}

impl VectorizeOutcome {
    /// The records, or an empty slice for the empty outcomes.
    #[must_use]
    pub fn records(&self) -> &[PolygonRecord] {
        match self {
            Self::Polygons { records, .. } => records,
            Self::NoSegments | Self::AllFiltered { .. } => &[],
        }
    }

    /// The computed threshold, if the mask had any segments.
    #[must_use]
    pub const fn threshold(&self) -> Option<f64> {
        match self {
            Self::NoSegments => None,
            Self::AllFiltered { threshold } | Self::Polygons { threshold, .. } => Some(*threshold),
        }
    }
}

/// Filter `raster` by label percentile and trace the surviving regions.
///
/// Steps:
///
/// 1. Collect the distinct non-zero labels; none → [`VectorizeOutcome::NoSegments`].
/// 2. Threshold = `config.threshold_percentile` of those labels.
/// 3. Zero every pixel whose label is strictly below the threshold.
/// 4. Trace 4-connected equal-label regions into polygons.
/// 5. Attach `segment_id` and planar `area`, then stable-sort by
///    `segment_id` descending.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if the percentile is outside
/// `[0, 100]`.
pub fn vectorize(
    raster: &LabelRaster,
    config: &VectorizeConfig,
) -> Result<VectorizeOutcome, PipelineError> {
    let candidates = distinct_labels(raster);
    let Some(threshold) = percentile(&candidates, config.threshold_percentile)? else {
        log::warn!("no valid masks found");
        return Ok(VectorizeOutcome::NoSegments);
    };
    log::info!(
        "filtering out masks with values below {threshold} ({} distinct labels)",
        candidates.len()
    );

    let mut filtered = raster.clone();
    let cleared = apply_threshold(&mut filtered, threshold);
    log::debug!("cleared {cleared} pixels below threshold");

    let mut records: Vec<PolygonRecord> = polygonize(&filtered)
        .into_iter()
        .map(|(geometry, segment_id)| PolygonRecord {
            area: geometry.unsigned_area(),
            geometry,
            segment_id,
        })
        .collect();

    if records.is_empty() {
        log::warn!("no shapes remain after filtering");
        return Ok(VectorizeOutcome::AllFiltered { threshold });
    }

    records.sort_by(|a, b| b.segment_id.cmp(&a.segment_id));
    Ok(VectorizeOutcome::Polygons { threshold, records })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::crs::Crs;
    use crate::types::{Dimensions, GeoReference, GeoTransform};

    fn raster(width: u32, height: u32, labels: Vec<u32>) -> LabelRaster {
        LabelRaster::new(Dimensions { width, height }, labels, GeoReference::default()).unwrap()
    }

    #[test]
    fn default_percentile_is_five() {
        assert!((VectorizeConfig::default().threshold_percentile - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_mask_reports_no_segments() {
        let r = raster(4, 4, vec![0; 16]);
        let outcome = vectorize(&r, &VectorizeConfig::default()).unwrap();
        assert_eq!(outcome, VectorizeOutcome::NoSegments);
        assert!(outcome.records().is_empty());
        assert_eq!(outcome.threshold(), None);
    }

    #[test]
    fn single_region_keeps_value_and_area() {
        let mut labels = vec![0; 10 * 10];
        for y in 2..6 {
            for x in 3..8 {
                labels[y * 10 + x] = 42;
            }
        }
        let mut r = raster(10, 10, labels);
        r.georef = GeoReference {
            transform: GeoTransform::north_up(300_000.0, 5_000_000.0, 0.5, 0.5),
            crs: Some(Crs::Projected(32633)),
            ..GeoReference::default()
        };

        let outcome = vectorize(&r, &VectorizeConfig::default()).unwrap();
        let records = outcome.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].segment_id, 42);
        // 20 pixels of 0.25 square units each.
        assert!((records[0].area - 5.0).abs() < 1e-9, "area {}", records[0].area);
    }

    #[test]
    fn filter_removes_only_labels_below_threshold() {
        let labels: Vec<u32> = (1..=99).flat_map(|v| [v, 0]).collect();
        let r = raster(198, 1, labels);
        let outcome = vectorize(&r, &VectorizeConfig::default()).unwrap();

        let ids: Vec<u32> = outcome.records().iter().map(|p| p.segment_id).collect();
        assert_eq!(ids, (6..=99).rev().collect::<Vec<_>>());
        assert!((outcome.threshold().unwrap() - 5.9).abs() < 1e-9);
    }

    #[test]
    fn touching_labels_without_background() {
        let r = raster(99, 1, (1..=99).collect());
        let config = VectorizeConfig {
            threshold_percentile: 0.0,
        };
        let outcome = vectorize(&r, &config).unwrap();
        let records = outcome.records();
        assert_eq!(records.len(), 99);
        assert_eq!(records[0].segment_id, 99);
        assert!(records.iter().all(|p| (p.area - 1.0).abs() < 1e-9));
    }

    #[test]
    fn single_pixel_mask() {
        let outcome = vectorize(&raster(1, 1, vec![5]), &VectorizeConfig::default()).unwrap();
        assert_eq!(outcome.records().len(), 1);
        assert_eq!(outcome.records()[0].segment_id, 5);
    }

    #[test]
    fn output_is_sorted_descending() {
        let r = raster(5, 1, vec![3, 0, 17, 0, 8]);
        let config = VectorizeConfig {
            threshold_percentile: 0.0,
        };
        let outcome = vectorize(&r, &config).unwrap();
        let ids: Vec<u32> = outcome.records().iter().map(|p| p.segment_id).collect();
        assert_eq!(ids, vec![17, 8, 3]);
    }

    #[test]
    fn equal_labels_keep_scan_order() {
        let r = raster(3, 2, vec![5, 0, 5, 0, 9, 0]);
        let config = VectorizeConfig {
            threshold_percentile: 0.0,
        };
        let outcome = vectorize(&r, &config).unwrap();
        let records = outcome.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].segment_id, 9);
        let first_five_x = records[1]
            .geometry
            .exterior()
            .coords()
            .map(|c| c.x)
            .fold(f64::MAX, f64::min);
        assert!(first_five_x.abs() < f64::EPSILON);
    }

    #[test]
    fn two_regions_both_pass() {
        let mut labels = vec![0; 8 * 4];
        for y in 0..4 {
            labels[y * 8] = 10;
            labels[y * 8 + 1] = 10;
            labels[y * 8 + 6] = 90;
            labels[y * 8 + 7] = 90;
        }
        let r = raster(8, 4, labels);
        let config = VectorizeConfig {
            threshold_percentile: 0.0,
        };
        let outcome = vectorize(&r, &config).unwrap();
        let records = outcome.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].segment_id, 90);
        assert_eq!(records[1].segment_id, 10);
        assert!((records[0].area - 8.0).abs() < 1e-9);
    }

    #[test]
    fn default_percentile_drops_low_label_of_two() {
        // 5th percentile of {10, 90} is 14, so label 10 goes.
        let r = raster(3, 1, vec![10, 0, 90]);
        let outcome = vectorize(&r, &VectorizeConfig::default()).unwrap();
        let ids: Vec<u32> = outcome.records().iter().map(|p| p.segment_id).collect();
        assert_eq!(ids, vec![90]);
    }

    #[test]
    fn largest_label_always_survives() {
        // The interpolated percentile never exceeds the largest label.
        let r = raster(3, 1, vec![4, 0, 4]);
        let outcome = vectorize(
            &r,
            &VectorizeConfig {
                threshold_percentile: 100.0,
            },
        )
        .unwrap();
        assert_eq!(outcome.records().len(), 2);
        assert_eq!(outcome.threshold(), Some(4.0));
    }

    #[test]
    fn invalid_percentile_is_an_error() {
        let r = raster(1, 1, vec![1]);
        let result = vectorize(
            &r,
            &VectorizeConfig {
                threshold_percentile: 150.0,
            },
        );
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: VectorizeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, VectorizeConfig::default());
    }
}
