//! Export phase definitions and options.
//!
//! An export job runs up to five independent phases over a project's images.
//! Phases have no inter-phase data dependency and may execute concurrently;
//! which ones run is chosen per job via [`ExportOptions`].

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

/// One independent unit of export work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportPhase {
    /// Copy original image bytes into the working directory.
    CopyOriginals,
    /// Render annotation overlays as PNG visualizations.
    RenderVisualizations,
    /// Emit per-image polygon annotations as JSON.
    EmitAnnotations,
    /// Compute per-image polygon metrics into a summary table.
    ComputeMetrics,
    /// Write the export manifest / documentation file.
    WriteDocumentation,
}

impl ExportPhase {
    /// All phases in canonical order.
    pub const ALL: [ExportPhase; 5] = [
        ExportPhase::CopyOriginals,
        ExportPhase::RenderVisualizations,
        ExportPhase::EmitAnnotations,
        ExportPhase::ComputeMetrics,
        ExportPhase::WriteDocumentation,
    ];

    /// Lowercase wire name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            ExportPhase::CopyOriginals => "copy_originals",
            ExportPhase::RenderVisualizations => "render_visualizations",
            ExportPhase::EmitAnnotations => "emit_annotations",
            ExportPhase::ComputeMetrics => "compute_metrics",
            ExportPhase::WriteDocumentation => "write_documentation",
        }
    }

    /// Subdirectory of the working directory this phase writes into.
    pub fn subdir(self) -> &'static str {
        match self {
            ExportPhase::CopyOriginals => "originals",
            ExportPhase::RenderVisualizations => "visualizations",
            ExportPhase::EmitAnnotations => "annotations",
            ExportPhase::ComputeMetrics => "metrics",
            ExportPhase::WriteDocumentation => "",
        }
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Smallest allowed per-job concurrency limit.
pub const MIN_CONCURRENCY: usize = 1;
/// Largest allowed per-job concurrency limit.
pub const MAX_CONCURRENCY: usize = 16;
/// Default per-job concurrency limit.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Default number of items processed per batch within a phase.
pub const DEFAULT_BATCH_SIZE: usize = 25;
/// Largest allowed per-phase batch size.
pub const MAX_BATCH_SIZE: usize = 500;

/// Per-job export configuration: which phases run, and how hard to push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportOptions {
    #[serde(default = "default_true")]
    pub include_originals: bool,
    #[serde(default = "default_true")]
    pub include_visualizations: bool,
    #[serde(default = "default_true")]
    pub include_annotations: bool,
    #[serde(default = "default_true")]
    pub include_metrics: bool,
    #[serde(default = "default_true")]
    pub include_documentation: bool,
    /// Concurrent item limit shared across all running phases.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Items processed per batch within a phase, to cap peak memory.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_originals: true,
            include_visualizations: true,
            include_annotations: true,
            include_metrics: true,
            include_documentation: true,
            concurrency: DEFAULT_CONCURRENCY,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl ExportOptions {
    /// The phases enabled by these options, in canonical order.
    pub fn enabled_phases(&self) -> Vec<ExportPhase> {
        ExportPhase::ALL
            .into_iter()
            .filter(|phase| self.is_enabled(*phase))
            .collect()
    }

    /// Whether a specific phase is enabled.
    pub fn is_enabled(&self, phase: ExportPhase) -> bool {
        match phase {
            ExportPhase::CopyOriginals => self.include_originals,
            ExportPhase::RenderVisualizations => self.include_visualizations,
            ExportPhase::EmitAnnotations => self.include_annotations,
            ExportPhase::ComputeMetrics => self.include_metrics,
            ExportPhase::WriteDocumentation => self.include_documentation,
        }
    }

    /// Validate option bounds and that at least one phase is enabled.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.enabled_phases().is_empty() {
            return Err(CoreError::Validation(
                "At least one export phase must be enabled".to_string(),
            ));
        }
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.concurrency) {
            return Err(CoreError::Validation(format!(
                "Export concurrency must be within {MIN_CONCURRENCY}..={MAX_CONCURRENCY}, got {}",
                self.concurrency
            )));
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(CoreError::Validation(format!(
                "Export batch size must be within 1..={MAX_BATCH_SIZE}, got {}",
                self.batch_size
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
