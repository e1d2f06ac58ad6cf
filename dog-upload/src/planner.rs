//! Part geometry for multipart uploads.
//!
//! Splitting is a pure computation: the same file size and requested part
//! size always produce the same plan, and planning never touches the file or
//! the network.

use serde::{Deserialize, Serialize};

use crate::{PartTask, PlanLimits, UploadError, UploadResult};

/// How a file of `total_size` bytes is split into parts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPlan {
    pub total_size: u64,
    pub part_size: u64,
    pub part_count: u32,
}

impl UploadPlan {
    /// Length of the part at zero-based `index`
    pub fn part_length(&self, index: u32) -> u64 {
        let offset = u64::from(index) * self.part_size;
        self.part_size.min(self.total_size.saturating_sub(offset))
    }
}

/// Compute a plan under the default provider limits
pub fn compute_plan(total_size: u64, requested_part_size: u64) -> UploadResult<UploadPlan> {
    compute_plan_with_limits(total_size, requested_part_size, &PlanLimits::default())
}

/// Compute a plan that respects `limits`.
///
/// A requested size below the minimum is replaced by the default. When the
/// resulting count would exceed the part ceiling, the part size is enlarged so
/// the file fits in at most `max_part_count` parts. An empty file becomes a
/// single empty part.
pub fn compute_plan_with_limits(
    total_size: u64,
    requested_part_size: u64,
    limits: &PlanLimits,
) -> UploadResult<UploadPlan> {
    if limits.max_part_count == 0 {
        return Err(UploadError::invalid("max_part_count must be at least 1"));
    }

    let part_size = if requested_part_size < limits.min_part_size {
        limits.default_part_size
    } else {
        requested_part_size
    };
    if part_size == 0 {
        return Err(UploadError::invalid("part size must be positive"));
    }

    if total_size == 0 {
        return Ok(UploadPlan {
            total_size,
            part_size,
            part_count: 1,
        });
    }

    let max_count = u64::from(limits.max_part_count);
    let naive_count = total_size.div_ceil(part_size);
    if naive_count <= max_count {
        return Ok(UploadPlan {
            total_size,
            part_size,
            part_count: count_to_u32(naive_count)?,
        });
    }

    let mut part_size = enlarged_part_size(total_size, max_count);
    // The one-less divisor undershoots when total_size is small next to max_count squared.
    if part_size.saturating_mul(max_count) < total_size {
        part_size = total_size.div_ceil(max_count);
    }

    // Recount so a remainder absorbed into earlier parts never leaves an empty tail.
    let part_count = total_size.div_ceil(part_size);
    Ok(UploadPlan {
        total_size,
        part_size,
        part_count: count_to_u32(part_count)?,
    })
}

fn enlarged_part_size(total_size: u64, max_count: u64) -> u64 {
    if total_size % max_count == 0 || max_count == 1 {
        total_size.div_ceil(max_count)
    } else {
        total_size / (max_count - 1)
    }
}

fn count_to_u32(count: u64) -> UploadResult<u32> {
    u32::try_from(count)
        .map_err(|_| UploadError::invalid(format!("part count {} does not fit the part numbering", count)))
}

/// Expand a plan into its parts, ordered by part number
pub fn derive_part_tasks(plan: &UploadPlan) -> Vec<PartTask> {
    (0..plan.part_count)
        .map(|index| PartTask {
            part_number: index + 1,
            offset: u64::from(index) * plan.part_size,
            length: plan.part_length(index),
        })
        .collect()
}
