//! Inference execution pool.
//!
//! A bounded worker pool bound to one accelerator device. Each worker owns
//! one of N compute streams for its whole lifetime; model weights are shared
//! read-only, so N forward passes run truly in parallel. The pool governs
//! device memory pressure, adapts batch sizes to the concurrency level, and
//! retries exactly once at half batch on an out-of-memory signal.
//!
//! The pool never writes a terminal job status: it returns an
//! [`InferenceOutcome`] to the dispatcher, which commits it through the
//! store's compare-and-set path.

pub mod device;
pub mod governor;
pub mod pool;
pub mod streams;

pub use device::{AcceleratorDevice, DeviceError, ForwardRequest, ImageBatch};
pub use governor::MemoryGovernor;
pub use pool::{InferenceConfig, InferenceOutcome, InferencePool};
pub use streams::{StreamAssigner, StreamSlot};
