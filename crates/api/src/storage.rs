//! Directory-backed image source.
//!
//! The platform's image storage is external; this adapter reads images
//! that the upload service persisted as `<image_root>/<id>.png`.

use std::path::PathBuf;

use async_trait::async_trait;

use annolab_core::error::{CoreError, CoreResult};
use annolab_core::storage::ImageSource;
use annolab_core::types::DbId;

/// Reads image bytes from a directory keyed by image id.
pub struct DirImageSource {
    root: PathBuf,
}

impl DirImageSource {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path_for(&self, image_id: DbId) -> PathBuf {
        self.root.join(format!("{image_id}.png"))
    }
}

#[async_trait]
impl ImageSource for DirImageSource {
    async fn load(&self, image_id: DbId) -> CoreResult<Vec<u8>> {
        tokio::fs::read(self.path_for(image_id))
            .await
            .map_err(|_| CoreError::NotFound {
                entity: "Image",
                id: image_id.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
