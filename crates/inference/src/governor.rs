//! Device memory governor.
//!
//! Samples device memory utilization after every batch. At the warning
//! threshold it logs pressure; at the critical threshold it forces a cache
//! flush and allocator reclaim before the pool admits further batches.
//! Counters live behind a lock held only for the increment/read, never
//! across a device call.

use std::sync::Mutex;

use serde::Serialize;

use crate::device::AcceleratorDevice;

/// Utilization at which a pressure warning is logged.
pub const PRESSURE_WARN_UTILIZATION: f64 = 0.90;

/// Utilization at which a cache flush + reclaim is forced.
pub const PRESSURE_FLUSH_UTILIZATION: f64 = 0.95;

/// Governor counters, exposed via the metrics endpoint.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct GovernorStats {
    /// Batches sampled.
    pub samples: u64,
    /// Samples at or above the warning threshold.
    pub pressure_warnings: u64,
    /// Forced cache flushes (critical threshold plus OOM recovery).
    pub cache_flushes: u64,
}

/// Watches device memory and intervenes under pressure.
#[derive(Default)]
pub struct MemoryGovernor {
    stats: Mutex<GovernorStats>,
}

impl MemoryGovernor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sample utilization after a batch and intervene if needed.
    pub async fn after_batch(&self, device: &dyn AcceleratorDevice) {
        let utilization = device.memory_utilization();

        let flush = {
            let mut stats = self.stats.lock().expect("governor stats lock poisoned");
            stats.samples += 1;
            if utilization >= PRESSURE_WARN_UTILIZATION {
                stats.pressure_warnings += 1;
            }
            if utilization >= PRESSURE_FLUSH_UTILIZATION {
                stats.cache_flushes += 1;
                true
            } else {
                false
            }
        };

        if flush {
            tracing::warn!(
                utilization_pct = utilization * 100.0,
                "Critical device memory pressure, flushing cache",
            );
            device.flush_cache().await;
        } else if utilization >= PRESSURE_WARN_UTILIZATION {
            tracing::warn!(
                utilization_pct = utilization * 100.0,
                "Device memory pressure",
            );
        }
    }

    /// Unconditional flush, used for OOM recovery and cancellation cleanup.
    pub async fn force_flush(&self, device: &dyn AcceleratorDevice) {
        {
            let mut stats = self.stats.lock().expect("governor stats lock poisoned");
            stats.cache_flushes += 1;
        }
        device.flush_cache().await;
    }

    /// Snapshot the counters.
    pub fn stats(&self) -> GovernorStats {
        *self.stats.lock().expect("governor stats lock poisoned")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceError, ForwardRequest};
    use crate::streams::StreamSlot;
    use annolab_core::segmentation::Polygon;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Device reporting a fixed utilization and counting flushes.
    struct FixedDevice {
        allocated_mb: u64,
        flushes: AtomicU64,
    }

    impl FixedDevice {
        fn at_utilization(pct: u64) -> Self {
            Self {
                allocated_mb: pct * 10, // total is 1000
                flushes: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl crate::device::AcceleratorDevice for FixedDevice {
        fn total_memory_mb(&self) -> u64 {
            1000
        }

        fn memory_allocated_mb(&self) -> u64 {
            self.allocated_mb
        }

        async fn forward(
            &self,
            _stream: StreamSlot,
            _request: ForwardRequest<'_>,
        ) -> Result<Vec<Vec<Polygon>>, DeviceError> {
            Ok(Vec::new())
        }

        async fn synchronize(&self, _stream: StreamSlot) {}

        async fn flush_cache(&self) {
            self.flushes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn below_warn_threshold_only_samples() {
        let governor = MemoryGovernor::new();
        let device = FixedDevice::at_utilization(50);

        governor.after_batch(&device).await;

        let stats = governor.stats();
        assert_eq!(stats.samples, 1);
        assert_eq!(stats.pressure_warnings, 0);
        assert_eq!(stats.cache_flushes, 0);
        assert_eq!(device.flushes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn warn_threshold_counts_pressure_without_flush() {
        let governor = MemoryGovernor::new();
        let device = FixedDevice::at_utilization(92);

        governor.after_batch(&device).await;

        let stats = governor.stats();
        assert_eq!(stats.pressure_warnings, 1);
        assert_eq!(stats.cache_flushes, 0);
        assert_eq!(device.flushes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn critical_threshold_flushes_cache() {
        let governor = MemoryGovernor::new();
        let device = FixedDevice::at_utilization(96);

        governor.after_batch(&device).await;

        let stats = governor.stats();
        assert_eq!(stats.pressure_warnings, 1);
        assert_eq!(stats.cache_flushes, 1);
        assert_eq!(device.flushes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn force_flush_always_flushes() {
        let governor = MemoryGovernor::new();
        let device = FixedDevice::at_utilization(10);

        governor.force_flush(&device).await;

        assert_eq!(governor.stats().cache_flushes, 1);
        assert_eq!(device.flushes.load(Ordering::SeqCst), 1);
    }
}
