use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::{CompletedPart, Destination, TransferClient, UploadError, UploadId, UploadResult};

/// In-process multipart backend.
///
/// Parts are kept until `complete` stitches them into an object, so the
/// finished bytes can be compared against the source.
#[derive(Debug, Default)]
pub struct MemoryTransferClient {
    pending: Mutex<HashMap<UploadId, PendingUpload>>,
    objects: Mutex<HashMap<Destination, Bytes>>,
}

#[derive(Debug)]
struct PendingUpload {
    destination: Destination,
    parts: BTreeMap<u32, StoredPart>,
}

#[derive(Debug)]
struct StoredPart {
    etag: String,
    body: Bytes,
}

impl MemoryTransferClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finished object at `destination`, if one was completed
    pub fn object(&self, destination: &Destination) -> Option<Bytes> {
        self.objects.lock().get(destination).cloned()
    }

    /// Number of uploads initiated but neither completed nor aborted
    pub fn pending_uploads(&self) -> usize {
        self.pending.lock().len()
    }

    /// Number of parts received so far for an unfinished upload
    pub fn received_parts(&self, upload_id: &UploadId) -> usize {
        self.pending
            .lock()
            .get(upload_id)
            .map(|upload| upload.parts.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl TransferClient for MemoryTransferClient {
    async fn initiate(&self, destination: &Destination) -> UploadResult<UploadId> {
        let upload_id = UploadId(format!("mpu_{}", Uuid::new_v4().simple()));
        self.pending.lock().insert(
            upload_id.clone(),
            PendingUpload {
                destination: destination.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        upload_id: &UploadId,
        destination: &Destination,
        part_number: u32,
        body: Bytes,
    ) -> UploadResult<String> {
        let mut pending = self.pending.lock();
        let upload = pending.get_mut(upload_id).ok_or_else(|| {
            UploadError::backend_message("upload_part", format!("NoSuchUpload: {}", upload_id))
        })?;
        if &upload.destination != destination {
            return Err(UploadError::backend_message(
                "upload_part",
                format!("upload {} belongs to {}", upload_id, upload.destination),
            ));
        }
        if part_number == 0 {
            return Err(UploadError::backend_message("upload_part", "part numbers start at 1"));
        }

        let etag = format!("\"{}\"", Uuid::new_v4().simple());
        upload.parts.insert(
            part_number,
            StoredPart {
                etag: etag.clone(),
                body,
            },
        );
        Ok(etag)
    }

    async fn complete(
        &self,
        upload_id: &UploadId,
        destination: &Destination,
        parts: Vec<CompletedPart>,
    ) -> UploadResult<()> {
        let mut pending = self.pending.lock();
        let upload = pending.get(upload_id).ok_or_else(|| {
            UploadError::backend_message("complete_multipart_upload", format!("NoSuchUpload: {}", upload_id))
        })?;
        if &upload.destination != destination {
            return Err(UploadError::backend_message(
                "complete_multipart_upload",
                format!("upload {} belongs to {}", upload_id, upload.destination),
            ));
        }
        if parts.is_empty() {
            return Err(UploadError::backend_message(
                "complete_multipart_upload",
                "MalformedXML: no parts given",
            ));
        }

        let mut assembled = BytesMut::new();
        for (index, part) in parts.iter().enumerate() {
            let expected = index as u32 + 1;
            if part.part_number != expected {
                return Err(UploadError::backend_message(
                    "complete_multipart_upload",
                    format!("InvalidPartOrder: expected part {}, got {}", expected, part.part_number),
                ));
            }
            let stored = upload.parts.get(&part.part_number).ok_or_else(|| {
                UploadError::backend_message(
                    "complete_multipart_upload",
                    format!("InvalidPart: part {} was never uploaded", part.part_number),
                )
            })?;
            if stored.etag != part.etag {
                return Err(UploadError::backend_message(
                    "complete_multipart_upload",
                    format!("InvalidPart: ETag mismatch for part {}", part.part_number),
                ));
            }
            assembled.extend_from_slice(&stored.body);
        }

        pending.remove(upload_id);
        drop(pending);
        self.objects
            .lock()
            .insert(destination.clone(), assembled.freeze());
        Ok(())
    }

    async fn abort(&self, upload_id: &UploadId, _destination: &Destination) -> UploadResult<()> {
        self.pending
            .lock()
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| {
                UploadError::backend_message("abort_multipart_upload", format!("NoSuchUpload: {}", upload_id))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn assembles_parts_in_order() {
        let client = MemoryTransferClient::new();
        let dest = Destination::new("bucket", "movie.mp4");
        let id = client.initiate(&dest).await.unwrap();

        let second = client.upload_part(&id, &dest, 2, Bytes::from_static(b"world")).await.unwrap();
        let first = client.upload_part(&id, &dest, 1, Bytes::from_static(b"hello ")).await.unwrap();
        assert_eq!(client.received_parts(&id), 2);

        client
            .complete(
                &id,
                &dest,
                vec![
                    CompletedPart { part_number: 1, etag: first },
                    CompletedPart { part_number: 2, etag: second },
                ],
            )
            .await
            .unwrap();

        assert_eq!(client.object(&dest).unwrap(), Bytes::from_static(b"hello world"));
        assert_eq!(client.pending_uploads(), 0);
    }

    #[tokio::test]
    async fn rejects_out_of_order_and_wrong_etags() {
        let client = MemoryTransferClient::new();
        let dest = Destination::new("bucket", "key");
        let id = client.initiate(&dest).await.unwrap();
        let a = client.upload_part(&id, &dest, 1, Bytes::from_static(b"a")).await.unwrap();
        let b = client.upload_part(&id, &dest, 2, Bytes::from_static(b"b")).await.unwrap();

        let reversed = vec![
            CompletedPart { part_number: 2, etag: b.clone() },
            CompletedPart { part_number: 1, etag: a.clone() },
        ];
        assert!(client.complete(&id, &dest, reversed).await.is_err());

        let forged = vec![
            CompletedPart { part_number: 1, etag: a },
            CompletedPart { part_number: 2, etag: "\"forged\"".into() },
        ];
        assert!(client.complete(&id, &dest, forged).await.is_err());

        assert!(client.object(&dest).is_none());
        assert_eq!(client.pending_uploads(), 1);
    }

    #[tokio::test]
    async fn abort_discards_pending_upload() {
        let client = MemoryTransferClient::new();
        let dest = Destination::new("bucket", "key");
        let id = client.initiate(&dest).await.unwrap();
        client.upload_part(&id, &dest, 1, Bytes::from_static(b"x")).await.unwrap();

        client.abort(&id, &dest).await.unwrap();
        assert_eq!(client.pending_uploads(), 0);
        assert!(client.abort(&id, &dest).await.is_err());
        assert!(client
            .upload_part(&id, &dest, 2, Bytes::from_static(b"y"))
            .await
            .is_err());
    }
}
