use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CompletedPart, Destination, UploadId, UploadPlan};

/// Receipt returned after an upload has been finalized on the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub upload_id: UploadId,
    pub destination: Destination,
    pub total_bytes: u64,
    pub part_size: u64,
    pub part_count: u32,
    /// Confirmations exactly as sent to the finalize call
    pub parts: Vec<CompletedPart>,
    pub elapsed: Duration,
    pub completed_at: DateTime<Utc>,
}

impl UploadReceipt {
    pub fn new(
        upload_id: UploadId,
        destination: Destination,
        plan: &UploadPlan,
        parts: Vec<CompletedPart>,
        elapsed: Duration,
    ) -> Self {
        Self {
            upload_id,
            destination,
            total_bytes: plan.total_size,
            part_size: plan.part_size,
            part_count: plan.part_count,
            parts,
            elapsed,
            completed_at: Utc::now(),
        }
    }
}
