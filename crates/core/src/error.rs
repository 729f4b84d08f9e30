use crate::types::DbId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// The batch already carries an accepted annotation.
    #[error("Batch {batch_id} has already been annotated")]
    AlreadyAnnotated { batch_id: DbId },

    /// The submitted choice violates index bounds or the spam/choice rules.
    #[error("Invalid annotation: {0}")]
    InvalidAnnotation(String),

    /// No enabled worker is currently HEALTHY or past its cooldown.
    #[error("No healthy worker available")]
    NoHealthyWorker,

    #[error("Internal error: {0}")]
    Internal(String),
}
