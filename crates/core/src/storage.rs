//! Image byte storage seam.
//!
//! Image persistence lives outside the engine; the dispatcher and the export
//! processor only need to read raw encoded bytes by id.

use async_trait::async_trait;

use crate::error::CoreResult;
use crate::types::DbId;

/// Read-only access to stored image bytes.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Load the encoded bytes for an image.
    ///
    /// Returns `CoreError::NotFound` if the image does not exist or is not
    /// readable.
    async fn load(&self, image_id: DbId) -> CoreResult<Vec<u8>>;
}
