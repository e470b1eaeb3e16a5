//! Export job processor.
//!
//! A multi-phase, cancellable long-running job: copy originals, render
//! visualizations, emit annotations, compute metrics, write documentation,
//! then package everything into a downloadable archive. Phases have no
//! inter-phase data dependency and run concurrently under a shared
//! concurrency limit; cancellation is cooperative and checked between
//! items. The terminal `Completed` write is gated by a final status
//! re-check so a job cancelled moments before its archive lands never
//! exposes a download.

pub mod archive;
pub mod phases;
pub mod runner;
pub mod source;

pub use runner::ExportProcessor;
pub use source::{ExportItem, ExportSource};
