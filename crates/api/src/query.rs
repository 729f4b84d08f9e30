//! Shared query parameter types for API handlers.

use serde::Deserialize;

/// Annotation feed parameters (`?limit=&cursor=`).
///
/// `limit` is clamped by the task manager; `cursor` is the lowest
/// sequence number the caller still wants.
#[derive(Debug, Deserialize)]
pub struct BatchFeedParams {
    pub limit: Option<i64>,
    pub cursor: Option<i64>,
}

/// Pool preview parameters (`?count=&seed=`).
#[derive(Debug, Deserialize)]
pub struct SampleParams {
    pub count: Option<usize>,
    pub seed: Option<u64>,
}
