//! DPO (direct preference optimisation) export records.
//!
//! One NDJSON line per annotated, non-spam batch:
//! `{prompt, chosen: {uri, seed}, rejected: [{uri, seed}], metadata}`.

use serde::Serialize;

use crate::types::{DbId, Timestamp};

/// NDJSON media type used by the export endpoint.
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// One image reference in a preference pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DpoImage {
    pub uri: String,
    pub seed: i64,
}

/// Provenance attached to every exported record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DpoMetadata {
    pub task_id: DbId,
    pub workflow_id: DbId,
    pub batch_id: DbId,
    pub sequence_number: i64,
    pub annotated_at: Timestamp,
}

/// A single exported preference record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DpoRecord {
    pub prompt: String,
    pub chosen: DpoImage,
    pub rejected: Vec<DpoImage>,
    pub metadata: DpoMetadata,
}

/// The annotated batch fields the record is built from.
#[derive(Debug, Clone, Copy)]
pub struct AnnotatedBatch<'a> {
    pub prompt_text: &'a str,
    pub seeds: &'a [i64],
    pub images: &'a [String],
    pub chosen_index: Option<i32>,
    pub rejected_index: Option<i32>,
    pub spam: bool,
}

fn image_at(batch: &AnnotatedBatch<'_>, index: Option<i32>) -> Option<DpoImage> {
    let idx = usize::try_from(index?).ok()?;
    Some(DpoImage {
        uri: batch.images.get(idx)?.clone(),
        seed: *batch.seeds.get(idx)?,
    })
}

/// Build the export record, or `None` for spam and for batches without a
/// resolvable chosen image.
pub fn build_dpo_record(batch: AnnotatedBatch<'_>, metadata: DpoMetadata) -> Option<DpoRecord> {
    if batch.spam {
        return None;
    }
    let chosen = image_at(&batch, batch.chosen_index)?;
    let rejected = image_at(&batch, batch.rejected_index).into_iter().collect();
    Some(DpoRecord {
        prompt: batch.prompt_text.to_string(),
        chosen,
        rejected,
        metadata,
    })
}

/// Serialise a record as one NDJSON line (with trailing newline).
pub fn to_ndjson_line(record: &DpoRecord) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    Ok(line)
}
