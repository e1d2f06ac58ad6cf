use async_trait::async_trait;
use bytes::Bytes;

use crate::{CompletedPart, Destination, UploadId, UploadResult};

/// The three-call multipart protocol of an object-storage backend.
///
/// Every call may fail with [`UploadError::Backend`](crate::UploadError::Backend);
/// the orchestrator does not distinguish transient from permanent failures.
#[async_trait]
pub trait TransferClient: Send + Sync {
    /// Start a multipart upload and return the backend's identifier for it.
    ///
    /// An empty identifier is passed through as-is; the orchestrator rejects it.
    async fn initiate(&self, destination: &Destination) -> UploadResult<UploadId>;

    /// Upload one part and return its confirmation token (e.g. an ETag)
    async fn upload_part(
        &self,
        upload_id: &UploadId,
        destination: &Destination,
        part_number: u32,
        body: Bytes,
    ) -> UploadResult<String>;

    /// Assemble the parts, given in ascending part order, into the final object
    async fn complete(
        &self,
        upload_id: &UploadId,
        destination: &Destination,
        parts: Vec<CompletedPart>,
    ) -> UploadResult<()>;

    /// Discard an unfinished upload. Backends without cleanup keep the default no-op.
    async fn abort(&self, _upload_id: &UploadId, _destination: &Destination) -> UploadResult<()> {
        Ok(())
    }
}
