//! Mask generation: the seam to the segmentation model.
//!
//! The model itself (weights, architecture, inference) is an external
//! collaborator. This module fixes what the rest of the pipeline needs
//! from it: an 8-bit RGB image goes in, a set of binary masks comes out.
//! Implementations receive the target [`Device`] at construction time;
//! nothing here touches process-wide state.

use serde::{Deserialize, Serialize};

use crate::types::{Dimensions, GrayImage, RgbImage};

/// Execution device for the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    #[default]
    Cpu,
    /// CUDA device by ordinal.
    Cuda(u32),
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
        }
    }
}

impl std::str::FromStr for Device {
    type Err = String;

    /// Parses `cpu`, `cuda` (ordinal 0) or `cuda:<ordinal>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|n| n.parse().ok())
                .map(Self::Cuda)
                .ok_or_else(|| format!("unknown device {s:?}; expected cpu, cuda or cuda:<n>")),
        }
    }
}

/// Backbone variant of the segmentation model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    #[default]
    VitH,
    VitL,
    VitB,
}

impl ModelType {
    /// Identifier understood by the model runtime.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VitH => "vit_h",
            Self::VitL => "vit_l",
            Self::VitB => "vit_b",
        }
    }

    /// File name of the matching HQ checkpoint.
    #[must_use]
    pub const fn checkpoint_file_name(self) -> &'static str {
        match self {
            Self::VitH => "sam_hq_vit_h.pth",
            Self::VitL => "sam_hq_vit_l.pth",
            Self::VitB => "sam_hq_vit_b.pth",
        }
    }
}

/// Automatic mask generation hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskGeneratorParams {
    /// Prompt grid density along each image side.
    pub points_per_side: u32,
    /// Minimum predicted mask quality.
    pub pred_iou_thresh: f64,
    /// Minimum stability under threshold perturbation.
    pub stability_score_thresh: f64,
    /// Number of crop layers; 0 runs on the full image only.
    pub crop_n_layers: u32,
    /// Disconnected regions and holes smaller than this (pixels) are removed.
    pub min_mask_region_area: u32,
    /// Box IoU cutoff for non-maximum suppression within a crop.
    pub box_nms_thresh: f64,
    /// Box IoU cutoff for non-maximum suppression across crops.
    pub crop_nms_thresh: f64,
    /// Fractional overlap between neighbouring crops.
    pub crop_overlap_ratio: f64,
}

impl MaskGeneratorParams {
    pub const DEFAULT_POINTS_PER_SIDE: u32 = 24;
    pub const DEFAULT_PRED_IOU_THRESH: f64 = 0.90;
    pub const DEFAULT_STABILITY_SCORE_THRESH: f64 = 0.95;
    pub const DEFAULT_CROP_N_LAYERS: u32 = 0;
    pub const DEFAULT_MIN_MASK_REGION_AREA: u32 = 5000;
    pub const DEFAULT_BOX_NMS_THRESH: f64 = 0.7;
    pub const DEFAULT_CROP_NMS_THRESH: f64 = 0.7;
    pub const DEFAULT_CROP_OVERLAP_RATIO: f64 = 0.34;
}

impl Default for MaskGeneratorParams {
    fn default() -> Self {
        Self {
            points_per_side: Self::DEFAULT_POINTS_PER_SIDE,
            pred_iou_thresh: Self::DEFAULT_PRED_IOU_THRESH,
            stability_score_thresh: Self::DEFAULT_STABILITY_SCORE_THRESH,
            crop_n_layers: Self::DEFAULT_CROP_N_LAYERS,
            min_mask_region_area: Self::DEFAULT_MIN_MASK_REGION_AREA,
            box_nms_thresh: Self::DEFAULT_BOX_NMS_THRESH,
            crop_nms_thresh: Self::DEFAULT_CROP_NMS_THRESH,
            crop_overlap_ratio: Self::DEFAULT_CROP_OVERLAP_RATIO,
        }
    }
}

/// One mask proposed by the model.
#[derive(Debug, Clone)]
pub struct BinaryMask {
    /// Non-zero pixels belong to the mask.
    pub mask: GrayImage,
    /// The model's own estimate of mask quality.
    pub predicted_iou: f64,
    /// Stability of the mask under threshold changes.
    pub stability_score: f64,
}

impl BinaryMask {
    /// Number of pixels inside the mask.
    #[must_use]
    pub fn area(&self) -> usize {
        self.mask.pixels().filter(|p| p.0[0] > 0).count()
    }

    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.mask.width(),
            height: self.mask.height(),
        }
    }
}

/// Errors from a mask generator.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    /// The program running the model could not be located.
    #[error("segmentation program {} not found", .0.display())]
    ProgramNotFound(std::path::PathBuf),

    /// The model runtime could not be started or exited with failure.
    #[error("segmentation backend failed: {0}")]
    Backend(String),

    /// The model runtime answered with something unreadable.
    #[error("malformed segmentation response: {0}")]
    Protocol(String),

    /// A mask does not cover the input image exactly.
    #[error("mask {index} is {actual:?}, image is {expected:?}")]
    MaskSize {
        index: usize,
        expected: Dimensions,
        actual: Dimensions,
    },

    /// Reading or writing exchange files failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A mask image could not be decoded.
    #[error("failed to decode mask image: {0}")]
    Image(#[from] image::ImageError),
}

/// A segmentation model producing binary masks for a whole image.
pub trait MaskGenerator {
    /// Generate masks for `image`.
    ///
    /// # Errors
    ///
    /// Implementation-specific; see [`GeneratorError`].
    fn generate(
        &self,
        image: &RgbImage,
        params: &MaskGeneratorParams,
    ) -> Result<Vec<BinaryMask>, GeneratorError>;
}

/// Check that every mask matches the image size.
///
/// # Errors
///
/// Returns [`GeneratorError::MaskSize`] for the first mismatching mask.
pub fn validate_masks(image: Dimensions, masks: &[BinaryMask]) -> Result<(), GeneratorError> {
    masks
        .iter()
        .enumerate()
        .find(|(_, m)| m.dimensions() != image)
        .map_or(Ok(()), |(index, m)| {
            Err(GeneratorError::MaskSize {
                index,
                expected: image,
                actual: m.dimensions(),
            })
        })
}

/// Mask indices ordered by area, largest first. Ties keep input order.
#[must_use]
pub fn area_order(masks: &[BinaryMask]) -> Vec<usize> {
    let areas: Vec<usize> = masks.iter().map(BinaryMask::area).collect();
    let mut order: Vec<usize> = (0..masks.len()).collect();
    order.sort_by(|&a, &b| areas[b].cmp(&areas[a]));
    order
}
