//! Render workflow documents: validation, slot discovery and per-job
//! injection.
//!
//! A workflow is a ComfyUI API-format node graph, either bare
//! (`{"3": {"class_type": ..., "inputs": {...}}, ...}`) or wrapped under a
//! top-level `"prompt"` key. The core only cares about three node kinds:
//! text-encode nodes (carry the prompt template), sampler/seed nodes (carry
//! the seed) and the empty-latent node (carries the batch size).

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::sampling::Combination;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Node class markers that must never appear in an uploaded workflow.
pub const FORBIDDEN_NODE_MARKERS: &[&str] = &["ComfyUI-Manager", "ComfyUI-Custom-Scripts"];

/// `class_type` substring identifying prompt (text-encode) nodes.
pub const PROMPT_NODE_MARKER: &str = "CLIPTextEncode";

/// `class_type` substrings identifying nodes that take a seed input.
pub const SEED_NODE_MARKERS: &[&str] = &["KSampler", "Seed"];

/// `class_type` of the node that controls how many images one job renders.
pub const LATENT_NODE_CLASS: &str = "EmptyLatentImage";

/// Upper bound for a workflow's `max_batch_size`.
pub const MAX_BATCH_SIZE_LIMIT: i32 = 64;

/// Maximum length of a workflow name or version label.
const MAX_LABEL_LEN: usize = 128;

/// Regex pattern matching `{slot}` tokens. Slot names follow pool names.
pub const SLOT_PATTERN: &str = r"\{([A-Za-z0-9_-]+)\}";

static SLOT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(SLOT_PATTERN).expect("valid regex"));

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// What the pipeline needs to know about an uploaded workflow graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowAnalysis {
    /// Node ids of text-encode nodes, in graph key order.
    pub prompt_nodes: Vec<String>,
    /// Node ids of seed-bearing nodes.
    pub seed_nodes: Vec<String>,
    /// Distinct `{slot}` names found in prompt node texts, first-seen order.
    pub slots: Vec<String>,
}

/// Return the node map of a workflow document, unwrapping `"prompt"`.
pub fn graph_nodes(document: &Value) -> Result<&Map<String, Value>, CoreError> {
    let graph = match document.get("prompt") {
        Some(inner) if inner.is_object() => inner,
        _ => document,
    };
    graph.as_object().ok_or_else(|| {
        CoreError::Validation("Workflow must be a JSON object of nodes".to_string())
    })
}

fn class_type(node: &Value) -> Option<&str> {
    node.get("class_type").and_then(Value::as_str)
}

fn is_prompt_node(class: &str) -> bool {
    class.contains(PROMPT_NODE_MARKER)
}

fn is_seed_node(class: &str) -> bool {
    SEED_NODE_MARKERS.iter().any(|m| class.contains(m))
}

/// Extract `{slot}` names from a template string, first-seen order.
pub fn extract_slots(template: &str) -> Vec<String> {
    let mut slots: Vec<String> = Vec::new();
    for caps in SLOT_RE.captures_iter(template) {
        let name = &caps[1];
        if !slots.iter().any(|s| s == name) {
            slots.push(name.to_string());
        }
    }
    slots
}

/// Substitute `{slot}` placeholders. Unknown placeholders are left as-is.
pub fn render_template(template: &str, combination: &Combination) -> String {
    SLOT_RE
        .replace_all(template, |caps: &regex::Captures<'_>| {
            combination
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Validate a workflow graph and find its prompt nodes, seed nodes and slots.
pub fn analyze(document: &Value) -> Result<WorkflowAnalysis, CoreError> {
    let nodes = graph_nodes(document)?;
    if nodes.is_empty() {
        return Err(CoreError::Validation(
            "Workflow graph contains no nodes".to_string(),
        ));
    }

    let mut analysis = WorkflowAnalysis {
        prompt_nodes: Vec::new(),
        seed_nodes: Vec::new(),
        slots: Vec::new(),
    };

    for (id, node) in nodes {
        let class = class_type(node).ok_or_else(|| {
            CoreError::Validation(format!("Node '{id}' is missing a string class_type"))
        })?;

        if let Some(marker) = FORBIDDEN_NODE_MARKERS.iter().find(|m| class.contains(*m)) {
            return Err(CoreError::Validation(format!(
                "Node '{id}' uses forbidden node type '{marker}'"
            )));
        }

        if is_prompt_node(class) {
            analysis.prompt_nodes.push(id.clone());
            if let Some(text) = node.pointer("/inputs/text").and_then(Value::as_str) {
                for slot in extract_slots(text) {
                    if !analysis.slots.contains(&slot) {
                        analysis.slots.push(slot);
                    }
                }
            }
        } else if is_seed_node(class) {
            analysis.seed_nodes.push(id.clone());
        }
    }

    if analysis.prompt_nodes.is_empty() {
        return Err(CoreError::Validation(format!(
            "Workflow has no {PROMPT_NODE_MARKER} node to receive the prompt"
        )));
    }

    Ok(analysis)
}

// ---------------------------------------------------------------------------
// Metadata validation
// ---------------------------------------------------------------------------

/// Validate a workflow name or version label.
pub fn validate_label(field: &str, value: &str) -> Result<(), CoreError> {
    if value.trim().is_empty() {
        return Err(CoreError::Validation(format!("{field} must not be empty")));
    }
    if value.len() > MAX_LABEL_LEN {
        return Err(CoreError::Validation(format!(
            "{field} must not exceed {MAX_LABEL_LEN} characters"
        )));
    }
    Ok(())
}

/// Validate `max_batch_size` is within `1..=MAX_BATCH_SIZE_LIMIT`.
pub fn validate_max_batch_size(max_batch_size: i32) -> Result<(), CoreError> {
    if !(1..=MAX_BATCH_SIZE_LIMIT).contains(&max_batch_size) {
        return Err(CoreError::Validation(format!(
            "max_batch_size must be between 1 and {MAX_BATCH_SIZE_LIMIT}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Prompt text and injection
// ---------------------------------------------------------------------------

fn prompt_template(node: &Value) -> Option<&str> {
    node.pointer("/inputs/text").and_then(Value::as_str)
}

fn has_slots(node: &Value) -> bool {
    prompt_template(node).is_some_and(|t| SLOT_RE.is_match(t))
}

/// Id of the prompt node that carries the positive prompt.
///
/// Follows a sampler's `inputs.positive` link (`["<node id>", <output>]`)
/// when it points at a prompt node. Otherwise falls back to the first
/// prompt node with a `{slot}`, then to the first prompt node.
pub fn positive_prompt_node(document: &Value) -> Result<Option<String>, CoreError> {
    let nodes = graph_nodes(document)?;
    let is_prompt = |id: &str| {
        nodes
            .get(id)
            .and_then(class_type)
            .is_some_and(is_prompt_node)
    };

    let linked = nodes
        .values()
        .filter(|n| class_type(n).is_some_and(is_seed_node))
        .filter_map(|n| n.pointer("/inputs/positive/0").and_then(Value::as_str))
        .find(|&id| is_prompt(id));
    if let Some(id) = linked {
        return Ok(Some(id.to_string()));
    }

    let prompts = || {
        nodes
            .iter()
            .filter(|(_, n)| class_type(n).is_some_and(is_prompt_node))
    };
    Ok(prompts()
        .find(|(_, n)| has_slots(n))
        .or_else(|| prompts().next())
        .map(|(id, _)| id.clone()))
}

/// The human-readable prompt for a combination.
///
/// The positive prompt node's template, rendered, when it references a
/// slot. Otherwise the drawn items joined with `", "`.
pub fn prompt_text(document: &Value, combination: &Combination) -> Result<String, CoreError> {
    let nodes = graph_nodes(document)?;
    let template = positive_prompt_node(document)?
        .and_then(|id| nodes.get(&id))
        .filter(|n| has_slots(n))
        .and_then(prompt_template);

    Ok(match template {
        Some(t) => render_template(t, combination),
        None => joined_items(combination),
    })
}

fn joined_items(combination: &Combination) -> String {
    combination
        .values()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Produce the concrete graph for one render job.
///
/// - Prompt nodes get their `{slot}` placeholders substituted. A positive
///   prompt node without slots receives the joined items instead; other
///   prompt nodes (the negative prompt) keep their text.
/// - Seed nodes get `seed` (and `noise_seed` where present).
/// - The empty-latent node renders exactly one image per job.
///
/// The returned value is always the bare node graph.
pub fn inject(
    document: &Value,
    combination: &Combination,
    seed: i64,
) -> Result<Value, CoreError> {
    let positive = positive_prompt_node(document)?;
    let mut nodes = graph_nodes(document)?.clone();

    for (id, node) in nodes.iter_mut() {
        let Some(class) = class_type(node).map(str::to_owned) else {
            continue;
        };
        let joined = positive.as_deref() == Some(id.as_str()) && !has_slots(node);
        let Some(inputs) = node.get_mut("inputs").and_then(Value::as_object_mut) else {
            continue;
        };

        if is_prompt_node(&class) {
            let text = if joined {
                Some(joined_items(combination))
            } else {
                inputs
                    .get("text")
                    .and_then(Value::as_str)
                    .map(|t| render_template(t, combination))
            };
            if let Some(text) = text {
                inputs.insert("text".to_string(), Value::String(text));
            }
        } else if is_seed_node(&class) {
            inputs.insert("seed".to_string(), Value::from(seed));
            if inputs.contains_key("noise_seed") {
                inputs.insert("noise_seed".to_string(), Value::from(seed));
            }
        } else if class == LATENT_NODE_CLASS {
            inputs.insert("batch_size".to_string(), Value::from(1));
        }
    }

    Ok(Value::Object(nodes))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
