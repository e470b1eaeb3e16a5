//! Segmentation request constants, validation, and result types.
//!
//! Pure functions and constants used by the queue manager, the inference
//! pool, and the API handlers.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Model registry
// ---------------------------------------------------------------------------

/// HRNet segmentation model (default).
pub const MODEL_HRNET: &str = "hrnet";
/// CBAM-ResUNet segmentation model.
pub const MODEL_CBAM_RESUNET: &str = "cbam_resunet";

/// All models known to the engine.
pub const VALID_MODELS: &[&str] = &[MODEL_HRNET, MODEL_CBAM_RESUNET];

// ---------------------------------------------------------------------------
// Priority constants
// ---------------------------------------------------------------------------

/// Priority value for urgent jobs. Dequeued before all others.
pub const PRIORITY_URGENT: i32 = 10;

/// Priority value for normal jobs. Default.
pub const PRIORITY_NORMAL: i32 = 0;

/// Priority value for background jobs. Dequeued last.
pub const PRIORITY_BACKGROUND: i32 = -10;

// ---------------------------------------------------------------------------
// Request defaults and bounds
// ---------------------------------------------------------------------------

/// Default confidence threshold applied when the request omits one.
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Default minimum polygon area (px²) for post-processing.
pub const DEFAULT_MIN_AREA: u32 = 100;

/// Upper bound on minimum polygon area; larger values would discard every
/// plausible detection.
const MAX_MIN_AREA: u32 = 1_000_000;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate that a model name is one of the known models.
pub fn validate_model(model: &str) -> Result<(), CoreError> {
    if VALID_MODELS.contains(&model) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Unknown model: '{model}'. Valid models: {}",
            VALID_MODELS.join(", ")
        )))
    }
}

/// Validate that a confidence threshold lies in `[0, 1]`.
pub fn validate_threshold(threshold: f32) -> Result<(), CoreError> {
    if threshold.is_finite() && (0.0..=1.0).contains(&threshold) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Confidence threshold must be within [0, 1], got {threshold}"
        )))
    }
}

/// Validate the minimum polygon area post-processing parameter.
pub fn validate_min_area(min_area: u32) -> Result<(), CoreError> {
    if min_area <= MAX_MIN_AREA {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Minimum polygon area must not exceed {MAX_MIN_AREA}, got {min_area}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// A closed polygon in image coordinates, with detection confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Polygon {
    /// Vertices as `[x, y]` pairs. The polygon is implicitly closed.
    pub points: Vec<[f32; 2]>,
    /// Detection confidence in `[0, 1]`.
    pub confidence: f32,
}

impl Polygon {
    /// Absolute polygon area via the shoelace formula.
    ///
    /// Returns 0.0 for degenerate polygons (fewer than 3 vertices).
    pub fn area(&self) -> f64 {
        if self.points.len() < 3 {
            return 0.0;
        }
        let mut twice_area = 0.0f64;
        let n = self.points.len();
        for i in 0..n {
            let [x1, y1] = self.points[i];
            let [x2, y2] = self.points[(i + 1) % n];
            twice_area += (x1 as f64) * (y2 as f64) - (x2 as f64) * (y1 as f64);
        }
        (twice_area / 2.0).abs()
    }
}

/// The committed output of a successful segmentation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationResult {
    pub polygons: Vec<Polygon>,
    /// Model that produced the result.
    pub model: String,
    /// Per-worker batch size actually used (after memory fitting / OOM halving).
    pub batch_size: usize,
    /// Wall-clock duration of the forward pass in milliseconds.
    pub inference_ms: u64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- validate_model --------------------------------------------------------

    #[test]
    fn known_models_accepted() {
        assert!(validate_model("hrnet").is_ok());
        assert!(validate_model("cbam_resunet").is_ok());
    }

    #[test]
    fn unknown_model_rejected() {
        assert!(validate_model("resnet50").is_err());
        assert!(validate_model("").is_err());
    }

    // -- validate_threshold ----------------------------------------------------

    #[test]
    fn threshold_bounds_accepted() {
        assert!(validate_threshold(0.0).is_ok());
        assert!(validate_threshold(0.5).is_ok());
        assert!(validate_threshold(1.0).is_ok());
    }

    #[test]
    fn threshold_out_of_range_rejected() {
        assert!(validate_threshold(-0.1).is_err());
        assert!(validate_threshold(1.5).is_err());
        assert!(validate_threshold(f32::NAN).is_err());
    }

    // -- validate_min_area -----------------------------------------------------

    #[test]
    fn min_area_within_bounds() {
        assert!(validate_min_area(0).is_ok());
        assert!(validate_min_area(DEFAULT_MIN_AREA).is_ok());
    }

    #[test]
    fn min_area_too_large_rejected() {
        assert!(validate_min_area(2_000_000).is_err());
    }

    // -- Polygon::area ---------------------------------------------------------

    #[test]
    fn unit_square_area() {
        let poly = Polygon {
            points: vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
            confidence: 0.9,
        };
        assert!((poly.area() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn winding_order_does_not_matter() {
        let poly = Polygon {
            points: vec![[0.0, 0.0], [0.0, 2.0], [2.0, 2.0], [2.0, 0.0]],
            confidence: 0.9,
        };
        assert!((poly.area() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn degenerate_polygon_has_zero_area() {
        let poly = Polygon {
            points: vec![[0.0, 0.0], [1.0, 1.0]],
            confidence: 0.5,
        };
        assert_eq!(poly.area(), 0.0);
    }
}
