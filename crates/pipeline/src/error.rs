use datalabel_core::error::CoreError;
use datalabel_core::types::DbId;
use datalabel_db::store::StoreError;

/// Errors surfaced by pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// A render unit failed on every worker it was tried on. Recorded on
    /// the unit; the owning task keeps generating.
    #[error("Render unit {unit_id} failed after {attempts} attempt(s): {reason}")]
    DispatchFailed {
        unit_id: DbId,
        attempts: usize,
        reason: String,
    },
}

pub type PipelineResult<T> = Result<T, PipelineError>;
