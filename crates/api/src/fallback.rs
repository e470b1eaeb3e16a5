//! CPU fallback device.
//!
//! When no accelerator is attached, the engine still needs a working
//! inference primitive for local development: a luminance-threshold
//! segmenter that emits the bounding polygon of the bright region per
//! image. Memory figures are approximated from in-flight batch size so the
//! governor and batch planner behave realistically.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use annolab_core::segmentation::Polygon;
use annolab_inference::{AcceleratorDevice, DeviceError, ForwardRequest, StreamSlot};

/// Approximate working-set cost per in-flight image (MiB).
const APPROX_IMAGE_COST_MB: u64 = 64;

/// Threshold segmentation on the CPU.
pub struct CpuFallbackDevice {
    total_memory_mb: u64,
    allocated_mb: AtomicU64,
}

impl CpuFallbackDevice {
    pub fn new(total_memory_mb: u64) -> Self {
        tracing::warn!("No accelerator attached, using CPU fallback inference");
        Self {
            total_memory_mb,
            allocated_mb: AtomicU64::new(0),
        }
    }

    /// Bounding polygon of the pixels whose luminance clears `threshold`.
    fn segment(bytes: &[u8], threshold: f32) -> Result<Vec<Polygon>, DeviceError> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| DeviceError::Execution(format!("failed to decode image: {e}")))?
            .to_luma8();

        let cutoff = (threshold.clamp(0.0, 1.0) * 255.0) as u8;
        let (mut min_x, mut min_y) = (u32::MAX, u32::MAX);
        let (mut max_x, mut max_y) = (0u32, 0u32);
        let mut hits = 0u64;

        for (x, y, pixel) in decoded.enumerate_pixels() {
            if pixel.0[0] >= cutoff {
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
                hits += 1;
            }
        }

        if hits == 0 {
            return Ok(Vec::new());
        }

        let coverage = hits as f32 / (decoded.width() * decoded.height()) as f32;
        Ok(vec![Polygon {
            points: vec![
                [min_x as f32, min_y as f32],
                [max_x as f32 + 1.0, min_y as f32],
                [max_x as f32 + 1.0, max_y as f32 + 1.0],
                [min_x as f32, max_y as f32 + 1.0],
            ],
            confidence: coverage.clamp(0.0, 1.0),
        }])
    }
}

#[async_trait]
impl AcceleratorDevice for CpuFallbackDevice {
    fn total_memory_mb(&self) -> u64 {
        self.total_memory_mb
    }

    fn memory_allocated_mb(&self) -> u64 {
        self.allocated_mb.load(Ordering::Relaxed)
    }

    async fn forward(
        &self,
        _stream: StreamSlot,
        request: ForwardRequest<'_>,
    ) -> Result<Vec<Vec<Polygon>>, DeviceError> {
        let cost = request.images.len() as u64 * APPROX_IMAGE_COST_MB;
        self.allocated_mb.fetch_add(cost, Ordering::Relaxed);

        let result = request
            .images
            .iter()
            .map(|bytes| Self::segment(bytes, request.threshold))
            .collect();

        self.allocated_mb.fetch_sub(cost, Ordering::Relaxed);
        result
    }

    async fn synchronize(&self, _stream: StreamSlot) {}

    async fn flush_cache(&self) {}
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
