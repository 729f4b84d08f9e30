//! Interpretation of `GET /history/{prompt_id}` payloads.
//!
//! ComfyUI answers `{}` while a prompt is still queued or running. Once it
//! finishes the payload is keyed by prompt ID:
//!
//! ```text
//! { "<prompt_id>": {
//!     "outputs": { "<node_id>": { "images": [{filename, subfolder, type}] } },
//!     "status":  { "status_str": "success", "completed": true, "messages": [...] } } }
//! ```

use serde::Deserialize;

/// One output file reference.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
}

fn default_kind() -> String {
    "output".to_string()
}

/// Where a prompt stands according to its history entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptState {
    /// No history entry yet.
    Pending,
    /// Finished with these output images (node order).
    Completed(Vec<ImageRef>),
    /// Finished with an execution error.
    Failed(String),
}

/// Classify the history payload for `prompt_id`.
pub fn prompt_state(history: &serde_json::Value, prompt_id: &str) -> PromptState {
    let Some(entry) = history.get(prompt_id) else {
        return PromptState::Pending;
    };

    if let Some(error) = execution_error(entry) {
        return PromptState::Failed(error);
    }

    let images = collect_images(entry.get("outputs"));
    if images.is_empty() {
        if is_completed(entry) {
            return PromptState::Failed("prompt finished without image outputs".to_string());
        }
        return PromptState::Pending;
    }
    PromptState::Completed(images)
}

fn execution_error(entry: &serde_json::Value) -> Option<String> {
    let status = entry.get("status")?;
    let status_str = status
        .get("status_str")
        .or(Some(status))
        .and_then(|s| s.as_str())?;
    if status_str != "error" {
        return None;
    }

    let detail = status
        .get("messages")
        .and_then(|m| m.as_array())
        .and_then(|messages| {
            messages.iter().find_map(|msg| {
                let pair = msg.as_array()?;
                if pair.first()?.as_str()? != "execution_error" {
                    return None;
                }
                pair.get(1)?
                    .get("exception_message")?
                    .as_str()
                    .map(str::to_string)
            })
        });
    Some(detail.unwrap_or_else(|| "execution error".to_string()))
}

fn is_completed(entry: &serde_json::Value) -> bool {
    match entry.get("status") {
        Some(serde_json::Value::Object(status)) => status
            .get("completed")
            .and_then(|c| c.as_bool())
            .unwrap_or(false),
        Some(serde_json::Value::String(s)) => s == "completed" || s == "success",
        _ => false,
    }
}

/// Images under `outputs`, whether nested per node or flat.
fn collect_images(outputs: Option<&serde_json::Value>) -> Vec<ImageRef> {
    let Some(outputs) = outputs.and_then(|o| o.as_object()) else {
        return Vec::new();
    };

    if let Some(flat) = outputs.get("images") {
        return parse_images(flat);
    }

    let mut node_ids: Vec<&String> = outputs.keys().collect();
    node_ids.sort_by(|a, b| match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    });

    node_ids
        .into_iter()
        .filter_map(|id| outputs.get(id)?.get("images"))
        .flat_map(parse_images)
        .collect()
}

fn parse_images(value: &serde_json::Value) -> Vec<ImageRef> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value::<ImageRef>(item.clone()).ok())
                .filter(|img| img.kind != "temp")
                .collect()
        })
        .unwrap_or_default()
}
