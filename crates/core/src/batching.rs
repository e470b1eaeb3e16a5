//! Batch-size planning for the inference pool.
//!
//! Each model carries a tuned `(optimal, max_safe)` batch-size pair and an
//! estimated per-image device memory footprint. Under N-way concurrency the
//! per-worker batch is reduced so the pool's aggregate peak stays under
//! `device_memory - reserved_memory`.

use crate::segmentation::{MODEL_CBAM_RESUNET, MODEL_HRNET};

/// Tuned batch characteristics for a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSpec {
    /// Batch size that hit the latency target during tuning.
    pub optimal: usize,
    /// Largest batch observed to run without memory pressure on a single
    /// worker. Never exceeded, even when memory headroom would allow it.
    pub max_safe: usize,
    /// Estimated peak device memory per image in the batch (MiB).
    pub per_image_mb: u64,
}

/// Look up the batch spec for a model.
///
/// Returns `None` for unknown models; callers validate the model name at
/// submission time, so `None` here indicates a bug upstream.
pub fn spec_for_model(model: &str) -> Option<BatchSpec> {
    match model {
        MODEL_HRNET => Some(BatchSpec {
            optimal: 8,
            max_safe: 16,
            per_image_mb: 512,
        }),
        MODEL_CBAM_RESUNET => Some(BatchSpec {
            optimal: 4,
            max_safe: 8,
            per_image_mb: 768,
        }),
        _ => None,
    }
}

/// Compute the per-worker batch size for `workers`-way concurrency.
///
/// The result `b` is the largest value satisfying all of:
/// - `b <= spec.optimal` (never exceed the tuned size),
/// - `workers * b * spec.per_image_mb <= device_mb - reserved_mb`,
/// - `b >= 1` (a single image must always be admissible; if even that
///   exceeds the budget the memory governor and OOM retry handle it).
pub fn per_worker_batch_size(
    spec: &BatchSpec,
    workers: usize,
    device_mb: u64,
    reserved_mb: u64,
) -> usize {
    let workers = workers.max(1) as u64;
    let budget_mb = device_mb.saturating_sub(reserved_mb);
    let fits = budget_mb / (workers * spec.per_image_mb.max(1));
    (fits as usize).clamp(1, spec.optimal)
}

/// Halve a batch size, never going below one image.
pub fn halve(batch: usize) -> usize {
    (batch / 2).max(1)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- spec_for_model --------------------------------------------------------

    #[test]
    fn known_models_have_specs() {
        assert!(spec_for_model(MODEL_HRNET).is_some());
        assert!(spec_for_model(MODEL_CBAM_RESUNET).is_some());
    }

    #[test]
    fn unknown_model_has_no_spec() {
        assert!(spec_for_model("resnet50").is_none());
    }

    #[test]
    fn max_safe_is_at_least_optimal() {
        for model in [MODEL_HRNET, MODEL_CBAM_RESUNET] {
            let spec = spec_for_model(model).unwrap();
            assert!(spec.max_safe >= spec.optimal);
        }
    }

    // -- per_worker_batch_size -------------------------------------------------

    #[test]
    fn single_worker_with_headroom_uses_optimal() {
        let spec = spec_for_model(MODEL_HRNET).unwrap();
        // 24 GiB device, 2 GiB reserved: plenty of room for optimal=8.
        assert_eq!(per_worker_batch_size(&spec, 1, 24_576, 2_048), 8);
    }

    #[test]
    fn concurrency_reduces_per_worker_batch() {
        let spec = BatchSpec {
            optimal: 8,
            max_safe: 16,
            per_image_mb: 1_024,
        };
        // Budget 16 GiB across 4 workers at 1 GiB/image: 4 images each.
        assert_eq!(per_worker_batch_size(&spec, 4, 18_432, 2_048), 4);
    }

    #[test]
    fn aggregate_peak_stays_under_budget() {
        let spec = spec_for_model(MODEL_CBAM_RESUNET).unwrap();
        for workers in 1..=8usize {
            let batch = per_worker_batch_size(&spec, workers, 24_576, 2_048);
            let aggregate = workers as u64 * batch as u64 * spec.per_image_mb;
            assert!(
                aggregate <= 24_576 - 2_048,
                "workers={workers} batch={batch} aggregate={aggregate}"
            );
        }
    }

    #[test]
    fn batch_never_below_one() {
        let spec = BatchSpec {
            optimal: 8,
            max_safe: 16,
            per_image_mb: 4_096,
        };
        // Budget smaller than a single image: still admit one.
        assert_eq!(per_worker_batch_size(&spec, 8, 4_096, 2_048), 1);
    }

    // -- halve -----------------------------------------------------------------

    #[test]
    fn halve_rounds_down() {
        assert_eq!(halve(8), 4);
        assert_eq!(halve(5), 2);
    }

    #[test]
    fn halve_floors_at_one() {
        assert_eq!(halve(1), 1);
    }
}
