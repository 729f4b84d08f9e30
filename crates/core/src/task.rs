//! Task parameter validation and completion rules.

use std::collections::HashSet;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Upper bound on `target_prompts` for a single task.
pub const MAX_TARGET_PROMPTS: i32 = 100_000;

/// Maximum number of variable pools a task may combine.
pub const MAX_POOLS_PER_TASK: usize = 16;

/// Default page size for the batch feed.
pub const DEFAULT_BATCH_PAGE: i64 = 10;

/// Largest page the batch feed will serve in one call.
pub const MAX_BATCH_PAGE: i64 = 100;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate the numeric task parameters against the workflow.
///
/// - `target_prompts` (K) must be in `1..=MAX_TARGET_PROMPTS`.
/// - `seeds_per_prompt` (N) must be at least 1 and at most the workflow's
///   `max_batch_size`, since one batch holds N images.
pub fn validate_task_params(
    target_prompts: i32,
    seeds_per_prompt: i32,
    max_batch_size: i32,
) -> Result<(), CoreError> {
    if !(1..=MAX_TARGET_PROMPTS).contains(&target_prompts) {
        return Err(CoreError::Validation(format!(
            "target_prompts must be between 1 and {MAX_TARGET_PROMPTS}"
        )));
    }
    if seeds_per_prompt < 1 {
        return Err(CoreError::Validation(
            "seeds_per_prompt must be at least 1".to_string(),
        ));
    }
    if seeds_per_prompt > max_batch_size {
        return Err(CoreError::Validation(format!(
            "seeds_per_prompt ({seeds_per_prompt}) exceeds the workflow max_batch_size ({max_batch_size})"
        )));
    }
    Ok(())
}

/// Validate that the selected pools bind cleanly onto the workflow slots.
///
/// Each pool fills the slot with the same name. Rules:
/// - At least one pool and at most `MAX_POOLS_PER_TASK`, no repeated names.
/// - When the workflow declares slots, every slot needs a pool and every
///   pool needs a slot.
pub fn validate_pool_binding(slots: &[String], pool_names: &[&str]) -> Result<(), CoreError> {
    if pool_names.is_empty() {
        return Err(CoreError::Validation(
            "At least one variable pool is required".to_string(),
        ));
    }
    if pool_names.len() > MAX_POOLS_PER_TASK {
        return Err(CoreError::Validation(format!(
            "A task may combine at most {MAX_POOLS_PER_TASK} variable pools"
        )));
    }

    let mut seen = HashSet::with_capacity(pool_names.len());
    for name in pool_names {
        if !seen.insert(*name) {
            return Err(CoreError::Validation(format!(
                "Variable pool '{name}' is selected more than once"
            )));
        }
    }

    if slots.is_empty() {
        return Ok(());
    }

    if let Some(missing) = slots.iter().find(|s| !seen.contains(s.as_str())) {
        return Err(CoreError::Validation(format!(
            "Workflow slot '{{{missing}}}' has no variable pool with that name"
        )));
    }
    if let Some(extra) = pool_names.iter().find(|n| !slots.iter().any(|s| s == *n)) {
        return Err(CoreError::Validation(format!(
            "Variable pool '{extra}' does not match any workflow slot"
        )));
    }
    Ok(())
}

/// Clamp a requested page size into `1..=MAX_BATCH_PAGE`.
pub fn clamp_batch_page(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_BATCH_PAGE).clamp(1, MAX_BATCH_PAGE)
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// Terminal outcome of a task whose sampler and dispatches have settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Finished, possibly short of the target.
    Complete { shortfall: i32 },
    /// Every drawn unit failed; nothing is annotatable.
    Failed,
}

/// Decide how a task ends.
///
/// `drawn` counts prompts taken from the sampler, `produced` counts batches
/// that rendered. Shortfall is the gap between target and drawn, i.e. what
/// the pools could not supply. Failed units do not turn a task FAILED unless
/// not a single batch was produced.
pub fn settle(target_prompts: i32, drawn: i32, produced: i32, failed: i32) -> TaskOutcome {
    if produced == 0 && failed > 0 {
        return TaskOutcome::Failed;
    }
    TaskOutcome::Complete {
        shortfall: (target_prompts - drawn).max(0),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
