//! Percentile-based label filtering.
//!
//! The threshold is computed over the *distinct* non-zero label values,
//! not over the per-pixel histogram: filtering strength follows the
//! spread of label values rather than spatial coverage.

use std::collections::BTreeSet;

use crate::types::{LabelRaster, PipelineError};

/// Distinct non-zero labels present in the raster, ascending.
#[must_use]
pub fn distinct_labels(raster: &LabelRaster) -> Vec<u32> {
    raster
        .labels()
        .iter()
        .copied()
        .filter(|&v| v > 0)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// The `q`-th percentile of sorted `values`, interpolating linearly
/// between the two closest ranks.
///
/// Returns `None` for empty input.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `q` is outside `[0, 100]`
/// or not finite.
///
/// # Examples
///
/// ```
/// use landseg_pipeline::percentile::percentile;
///
/// let values: Vec<u32> = (1..=99).collect();
/// let p5 = percentile(&values, 5.0).unwrap().unwrap();
/// assert!((p5 - 5.9).abs() < 1e-9);
/// ```
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn percentile(sorted: &[u32], q: f64) -> Result<Option<f64>, PipelineError> {
    if !q.is_finite() || !(0.0..=100.0).contains(&q) {
        return Err(PipelineError::InvalidConfig(format!(
            "percentile must be within [0, 100], got {q}"
        )));
    }
    let Some(last) = sorted.len().checked_sub(1) else {
        return Ok(None);
    };

    let rank = q / 100.0 * last as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let lo_val = f64::from(sorted[lo]);
    let hi_val = f64::from(sorted[hi]);
    Ok(Some((hi_val - lo_val).mul_add(rank - lo as f64, lo_val)))
}

/// Zero every label strictly below `threshold`.
///
/// Returns the number of pixels that were cleared.
pub fn apply_threshold(raster: &mut LabelRaster, threshold: f64) -> usize {
    let mut cleared = 0;
    for value in raster.labels_mut() {
        if *value != 0 && f64::from(*value) < threshold {
            *value = 0;
            cleared += 1;
        }
    }
    cleared
}
