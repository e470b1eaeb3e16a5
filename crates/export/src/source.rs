//! Export input seam.
//!
//! Image persistence and annotation storage live outside the engine; an
//! export job only needs, per image, the encoded bytes and the committed
//! polygons. The API binary wires a source backed by the real stores;
//! tests use synthetic items.

use async_trait::async_trait;

use annolab_core::error::CoreResult;
use annolab_core::segmentation::Polygon;
use annolab_core::types::DbId;

/// One image's worth of export input.
#[derive(Debug, Clone)]
pub struct ExportItem {
    pub image_id: DbId,
    /// Artifact-safe file stem, e.g. `img_000123`.
    pub name: String,
    /// Encoded image bytes (PNG).
    pub image_bytes: Vec<u8>,
    /// Committed segmentation polygons for the image.
    pub polygons: Vec<Polygon>,
}

/// Yields the exportable items of a project.
#[async_trait]
pub trait ExportSource: Send + Sync {
    /// All exportable items for `project_id`, in stable order.
    async fn items(&self, project_id: DbId) -> CoreResult<Vec<ExportItem>>;
}
