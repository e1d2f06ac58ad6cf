//! # dog-upload: Concurrent multipart uploads for large files
//!
//! `dog-upload` pushes a local file to S3-compatible object storage as a
//! multipart upload. The file is split into contiguous parts, the parts travel
//! concurrently under a fixed admission limit, and the upload is finalized only
//! when every part has been confirmed.
//!
//! ## Key Features
//!
//! - **Bounded concurrency**: at most `max_concurrency` parts are read and sent at once
//! - **Part-count aware planning**: part size grows automatically so a file never needs more than 10,000 parts
//! - **All-or-nothing finalize**: one failed part means no finalize call, and the session is aborted
//! - **Single deadline**: initiate, every part and finalize share one absolute cutoff
//! - **Backend agnostic**: S3 through `aws-sdk-s3`, an in-memory backend for tests, or your own [`TransferClient`]
//! - **Cache-friendly reads**: optional `FADV_DONTNEED` or `O_DIRECT` file access
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dog_upload::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> UploadResult<()> {
//! // 1. Backend from S3_ENDPOINT / S3_REGION and the AWS credential chain
//! let client = S3TransferClient::from_env().await;
//!
//! // 2. Upload settings, overridable through UPLOAD__* variables
//! let config = UploadConfig::from_env("UPLOAD")?.with_logger(Arc::new(TracingLogger));
//!
//! // 3. Upload
//! let orchestrator = UploadOrchestrator::new(client);
//! let receipt = orchestrator
//!     .upload("backup.tar", &Destination::new("archive", "2026/backup.tar"), &config)
//!     .await?;
//!
//! println!("{} bytes in {} parts", receipt.total_bytes, receipt.part_count);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │ UploadOrchestrator  │  ← session lifecycle, deadline, admission gate
//! ├──────────┬──────────┤
//! │ Planner  │  Source  │  ← part layout / positioned reads
//! ├──────────┴──────────┤
//! │   TransferClient    │  ← initiate, upload_part, complete, abort
//! └─────────────────────┘
//! ```

mod config;
mod error;
mod logging;
mod memory;
mod orchestrator;
mod planner;
mod receipt;
pub mod retry;
mod s3;
pub mod source;
mod transfer;
mod types;

// Re-export main types for clean API
pub use config::{
    PlanLimits, ReadMode, UploadConfig, DEFAULT_BLOCK_SIZE, DEFAULT_PART_SIZE, MAX_PART_COUNT,
    MIN_PART_SIZE,
};
pub use error::{UploadError, UploadResult};
#[cfg(feature = "tracing-basic")]
pub use logging::init_tracing;
pub use logging::{LogFields, LogLevel, NoopLogger, TracingLogger, UploadLogger};
pub use memory::MemoryTransferClient;
pub use orchestrator::{upload, UploadOrchestrator};
pub use planner::{compute_plan, compute_plan_with_limits, derive_part_tasks, UploadPlan};
pub use receipt::UploadReceipt;
pub use retry::{with_backoff, with_backoff_if, RetryPolicy};
pub use s3::{S3Config, S3TransferClient};
pub use source::{open_source, DirectFileSource, FileSource, PartSource};
pub use transfer::TransferClient;
pub use types::{
    CompletedPart, Destination, PartResult, PartTask, UploadId, UploadSession, UploadState,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Destination, MemoryTransferClient, RetryPolicy, S3TransferClient, TracingLogger,
        TransferClient, UploadConfig, UploadError, UploadOrchestrator, UploadReceipt,
        UploadResult,
    };
}
