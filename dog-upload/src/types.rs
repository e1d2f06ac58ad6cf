use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::{UploadError, UploadPlan, UploadResult};

/// Identifier the backend issues for a multipart upload session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadId(pub String);

impl UploadId {
    /// Create from existing string
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the backend handed back nothing usable
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for UploadId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where the finished object lands
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    pub bucket: String,
    pub key: String,
}

impl Destination {
    pub fn new<B: Into<String>, K: Into<String>>(bucket: B, key: K) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// One contiguous byte range of the source, uploaded as its own part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartTask {
    /// 1-based part number
    pub part_number: u32,
    pub offset: u64,
    pub length: u64,
}

/// Part confirmation handed back to the backend at finalize time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Outcome of the single transfer attempt for one part
#[derive(Debug)]
pub struct PartResult {
    pub part_number: u32,
    pub result: UploadResult<String>,
}

impl PartResult {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Lifecycle of an upload session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadState {
    Created,
    Initiated,
    PartsInFlight,
    AllPartsOk,
    AnyPartFailed,
    DeadlineExceeded,
    Completed,
    Failed,
}

impl UploadState {
    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: UploadState) -> bool {
        use UploadState::*;
        matches!(
            (self, next),
            (Created, Initiated)
                | (Initiated, PartsInFlight)
                | (PartsInFlight, AllPartsOk)
                | (PartsInFlight, AnyPartFailed)
                | (AllPartsOk, Completed)
                | (AnyPartFailed, Failed)
                | (DeadlineExceeded, Failed)
                | (Created | Initiated | PartsInFlight | AllPartsOk, DeadlineExceeded)
                | (Created | Initiated | AllPartsOk, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, UploadState::Completed | UploadState::Failed)
    }
}

/// Orchestrator-owned state of one multipart upload
#[derive(Debug)]
pub struct UploadSession {
    pub upload_id: Option<UploadId>,
    pub destination: Destination,
    pub plan: UploadPlan,
    /// Indexed by `part_number - 1`
    pub results: Vec<Option<PartResult>>,
    pub deadline: Instant,
    state: UploadState,
}

impl UploadSession {
    pub fn new(destination: Destination, plan: UploadPlan, deadline: Instant) -> Self {
        let results = (0..plan.part_count).map(|_| None).collect();
        Self {
            upload_id: None,
            destination,
            plan,
            results,
            deadline,
            state: UploadState::Created,
        }
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Move to `next`, refusing moves the lifecycle does not allow
    pub fn transition(&mut self, next: UploadState) -> UploadResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(UploadError::internal(format!(
                "Illegal upload state transition {:?} -> {:?}",
                self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Store the outcome for its part slot
    pub fn record(&mut self, result: PartResult) -> UploadResult<()> {
        let index = result
            .part_number
            .checked_sub(1)
            .map(|i| i as usize)
            .filter(|i| *i < self.results.len())
            .ok_or_else(|| {
                UploadError::internal(format!("Part {} outside plan", result.part_number))
            })?;

        let slot = &mut self.results[index];
        if slot.is_some() {
            return Err(UploadError::internal(format!(
                "Part {} reported twice",
                result.part_number
            )));
        }
        *slot = Some(result);
        Ok(())
    }

    /// Confirmations in ascending part order, or `None` if any part is missing or failed
    pub fn ordered_confirmations(&self) -> Option<Vec<CompletedPart>> {
        self.results
            .iter()
            .map(|slot| match slot {
                Some(PartResult { part_number, result: Ok(etag) }) => Some(CompletedPart {
                    part_number: *part_number,
                    etag: etag.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Remove and return the error recorded for `part_number`, if that part failed
    pub fn take_failure(&mut self, part_number: u32) -> Option<UploadError> {
        let index = part_number.checked_sub(1)? as usize;
        let slot = self.results.get_mut(index)?;
        match slot.take() {
            Some(PartResult { result: Err(err), .. }) => Some(err),
            other => {
                *slot = other;
                None
            }
        }
    }
}
