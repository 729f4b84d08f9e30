//! Handlers for workflow upload and listing.
//!
//! Workflows arrive as multipart forms: `name`, `version`, `max_batch_size`
//! and `file` (the ComfyUI graph JSON). The graph is validated and its
//! template slots extracted before anything is stored.

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use datalabel_core::error::CoreError;
use datalabel_core::types::DbId;
use datalabel_core::workflow::{analyze, validate_label, validate_max_batch_size};
use datalabel_db::models::workflow::CreateWorkflow;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Collected multipart fields, all optional until checked.
#[derive(Default)]
struct WorkflowForm {
    name: Option<String>,
    version: Option<String>,
    max_batch_size: Option<String>,
    file: Option<Vec<u8>>,
}

impl WorkflowForm {
    async fn read(mut multipart: Multipart) -> AppResult<Self> {
        let mut form = WorkflowForm::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "file" => {
                    let data = field
                        .bytes()
                        .await
                        .map_err(|e| AppError::BadRequest(e.to_string()))?;
                    form.file = Some(data.to_vec());
                }
                "name" | "version" | "max_batch_size" => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| AppError::BadRequest(e.to_string()))?;
                    match name.as_str() {
                        "name" => form.name = Some(text),
                        "version" => form.version = Some(text),
                        _ => form.max_batch_size = Some(text),
                    }
                }
                _ => {}
            }
        }
        Ok(form)
    }

    fn into_create(self) -> AppResult<CreateWorkflow> {
        let name = required(self.name, "name")?;
        let version = required(self.version, "version")?;
        validate_label("name", &name)?;
        validate_label("version", &version)?;

        let max_batch_size: i32 = required(self.max_batch_size, "max_batch_size")?
            .trim()
            .parse()
            .map_err(|_| {
                CoreError::Validation("max_batch_size must be an integer".to_string())
            })?;
        validate_max_batch_size(max_batch_size)?;

        let file = self
            .file
            .ok_or_else(|| CoreError::Validation("file is required".to_string()))?;
        let document: serde_json::Value = serde_json::from_slice(&file)
            .map_err(|e| CoreError::Validation(format!("file is not valid JSON: {e}")))?;
        let analysis = analyze(&document)?;

        Ok(CreateWorkflow {
            name: name.trim().to_string(),
            version: version.trim().to_string(),
            max_batch_size,
            document,
            slots: analysis.slots,
        })
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, CoreError> {
    value.ok_or_else(|| CoreError::Validation(format!("{field} is required")))
}

// ---------------------------------------------------------------------------
// GET /workflows
// ---------------------------------------------------------------------------

pub async fn list_workflows(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let workflows = state.store.list_workflows().await?;
    Ok(Json(DataResponse { data: workflows }))
}

// ---------------------------------------------------------------------------
// GET /workflows/{id}
// ---------------------------------------------------------------------------

pub async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let workflow = state
        .store
        .find_workflow(id)
        .await?
        .ok_or(CoreError::NotFound {
            entity: "workflow",
            id,
        })?;
    Ok(Json(DataResponse { data: workflow }))
}

// ---------------------------------------------------------------------------
// POST /workflows
// ---------------------------------------------------------------------------

/// Upload a workflow graph.
pub async fn create_workflow(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let input = WorkflowForm::read(multipart).await?.into_create()?;
    let workflow = state.store.insert_workflow(&input).await?;

    tracing::info!(
        workflow_id = workflow.id,
        name = %workflow.name,
        version = %workflow.version,
        slots = ?workflow.slots,
        "Workflow uploaded",
    );

    Ok((StatusCode::CREATED, Json(DataResponse { data: workflow })))
}
