//! Export source backed by the job registry and image storage.
//!
//! An export packages a project's committed segmentation results: for each
//! image with a completed job, the original bytes plus the job's polygons.
//! When an image was segmented more than once, the most recent completion
//! wins.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use annolab_core::error::CoreResult;
use annolab_core::storage::ImageSource;
use annolab_core::types::DbId;
use annolab_export::{ExportItem, ExportSource};
use annolab_store::JobStore;

/// Yields one export item per segmented image of a project.
pub struct EngineExportSource {
    jobs: Arc<JobStore>,
    images: Arc<dyn ImageSource>,
}

impl EngineExportSource {
    pub fn new(jobs: Arc<JobStore>, images: Arc<dyn ImageSource>) -> Self {
        Self { jobs, images }
    }
}

#[async_trait]
impl ExportSource for EngineExportSource {
    async fn items(&self, project_id: DbId) -> CoreResult<Vec<ExportItem>> {
        let completed = self.jobs.completed_for_project(project_id).await;

        // Latest completion per image wins; completed_for_project is in
        // completion order, so later entries overwrite earlier ones.
        let mut latest = HashMap::new();
        for job in completed {
            latest.insert(job.image_id, job);
        }

        let mut image_ids: Vec<DbId> = latest.keys().copied().collect();
        image_ids.sort_unstable();

        let mut items = Vec::with_capacity(image_ids.len());
        for image_id in image_ids {
            let job = &latest[&image_id];
            let image_bytes = self.images.load(image_id).await?;
            let polygons = job
                .result
                .as_ref()
                .map(|result| result.polygons.clone())
                .unwrap_or_default();
            items.push(ExportItem {
                image_id,
                name: format!("img_{image_id:06}"),
                image_bytes,
                polygons,
            });
        }
        Ok(items)
    }
}
