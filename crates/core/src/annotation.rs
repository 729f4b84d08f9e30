//! Annotation choice validation.
//!
//! An annotation names the best image of a batch (`chosen_index`), optionally
//! the worst (`rejected_index`), or flags the whole batch as spam. Indices
//! point into the batch's seed list. A missing index is sent either as JSON
//! `null` or as the sentinel `-1`.

use crate::error::CoreError;

/// Wire sentinel meaning "no index".
pub const NONE_INDEX: i32 = -1;

/// A validated annotation choice with sentinels resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Choice {
    pub chosen: Option<usize>,
    pub rejected: Option<usize>,
    pub spam: bool,
}

impl Choice {
    /// Index columns as stored (`NULL` for none).
    pub fn stored_indices(&self) -> (Option<i32>, Option<i32>) {
        (
            self.chosen.map(|i| i as i32),
            self.rejected.map(|i| i as i32),
        )
    }
}

fn resolve_index(field: &str, value: Option<i32>, batch_len: usize) -> Result<Option<usize>, CoreError> {
    match value {
        None | Some(NONE_INDEX) => Ok(None),
        Some(i) if i < 0 => Err(CoreError::InvalidAnnotation(format!(
            "{field} must be a non-negative index or {NONE_INDEX}"
        ))),
        Some(i) => {
            let idx = i as usize;
            if idx >= batch_len {
                return Err(CoreError::InvalidAnnotation(format!(
                    "{field} {idx} is out of range for a batch of {batch_len} images"
                )));
            }
            Ok(Some(idx))
        }
    }
}

/// Validate a submitted choice against a batch of `batch_len` images.
///
/// Rules:
/// - Indices must be inside the batch.
/// - `spam = true` requires both indices to be none.
/// - Otherwise `chosen_index` is required.
/// - `chosen_index` and `rejected_index` must differ.
pub fn validate_choice(
    chosen_index: Option<i32>,
    rejected_index: Option<i32>,
    spam: bool,
    batch_len: usize,
) -> Result<Choice, CoreError> {
    let chosen = resolve_index("chosen_index", chosen_index, batch_len)?;
    let rejected = resolve_index("rejected_index", rejected_index, batch_len)?;

    if spam {
        if chosen.is_some() || rejected.is_some() {
            return Err(CoreError::InvalidAnnotation(
                "A spam annotation must not carry chosen_index or rejected_index".to_string(),
            ));
        }
    } else if chosen.is_none() {
        return Err(CoreError::InvalidAnnotation(
            "chosen_index is required unless the batch is marked as spam".to_string(),
        ));
    }

    if let (Some(c), Some(r)) = (chosen, rejected) {
        if c == r {
            return Err(CoreError::InvalidAnnotation(
                "rejected_index must differ from chosen_index".to_string(),
            ));
        }
    }

    Ok(Choice {
        chosen,
        rejected,
        spam,
    })
}
