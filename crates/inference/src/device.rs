//! Accelerator device seam.
//!
//! The model-inference primitive is an external collaborator: given image
//! bytes and a job descriptor it produces polygon data. The engine talks to
//! it through this trait only. Model weights behind an implementation must
//! be safe for concurrent read-only forward passes; the pool relies on
//! that and takes no lock around [`AcceleratorDevice::forward`].

use async_trait::async_trait;

use annolab_core::segmentation::Polygon;

use crate::streams::StreamSlot;

/// Raw encoded image bytes for one submission.
#[derive(Debug, Clone, Default)]
pub struct ImageBatch {
    pub images: Vec<Vec<u8>>,
}

impl ImageBatch {
    /// A batch holding a single image.
    pub fn single(bytes: Vec<u8>) -> Self {
        Self {
            images: vec![bytes],
        }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// One forward-pass invocation.
#[derive(Debug)]
pub struct ForwardRequest<'a> {
    pub model: &'a str,
    pub images: &'a [Vec<u8>],
    pub threshold: f32,
    pub detect_holes: bool,
}

/// Failures surfaced by the device.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The allocator could not satisfy the batch. The pool flushes, halves
    /// the batch, and retries once before giving up.
    #[error("device out of memory: {0}")]
    OutOfMemory(String),

    /// Any other forward-pass failure.
    #[error("forward pass failed: {0}")]
    Execution(String),
}

/// A single accelerator with N independent compute streams.
#[async_trait]
pub trait AcceleratorDevice: Send + Sync {
    /// Total device memory in MiB.
    fn total_memory_mb(&self) -> u64;

    /// Currently allocated device memory in MiB.
    fn memory_allocated_mb(&self) -> u64;

    /// Run a no-gradient forward pass on `stream`.
    ///
    /// Returns one polygon set per input image, in input order. The call
    /// must not require any external synchronization: weights are read-only
    /// and streams are independent.
    async fn forward(
        &self,
        stream: StreamSlot,
        request: ForwardRequest<'_>,
    ) -> Result<Vec<Vec<Polygon>>, DeviceError>;

    /// Block until all work queued on `stream` has drained.
    async fn synchronize(&self, stream: StreamSlot);

    /// Drop cached allocations and trigger allocator reclaim.
    async fn flush_cache(&self);

    /// Fraction of device memory currently allocated, in `0.0..=1.0`.
    fn memory_utilization(&self) -> f64 {
        let total = self.total_memory_mb();
        if total == 0 {
            return 0.0;
        }
        (self.memory_allocated_mb() as f64 / total as f64).clamp(0.0, 1.0)
    }
}
