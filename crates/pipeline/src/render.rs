//! The render seam between the dispatcher and remote workers.
//!
//! [`RenderClient`] is what the pipeline needs from a worker: render one
//! unit (N seeds of one prompt) and answer a health probe. [`ComfyRenderer`]
//! implements it over the ComfyUI REST API, submitting one prompt per seed.

use std::time::Duration;

use async_trait::async_trait;
use datalabel_comfyui::api::{ComfyUIApi, ComfyUIApiError};
use datalabel_comfyui::history::{prompt_state, ImageRef, PromptState};
use datalabel_comfyui::poll::{next_delay, PollConfig};
use datalabel_core::error::CoreError;
use datalabel_core::sampling::Combination;
use datalabel_core::types::DbId;
use datalabel_core::workflow;
use tokio::time::{timeout_at, Instant};

/// Connection details of one worker, as seen by a render client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerTarget {
    pub id: DbId,
    pub name: String,
    pub base_url: String,
    pub api_key: Option<String>,
}

/// One render unit: a prompt combination rendered once per seed.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub unit_id: DbId,
    pub prompt_text: String,
    pub combination: Combination,
    pub seeds: Vec<i64>,
}

/// Result of a successful render: one thumbnail reference per seed, in
/// seed order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutput {
    pub thumbnails: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Api(#[from] ComfyUIApiError),

    #[error("Render timed out after {0:?}")]
    Timeout(Duration),

    /// The worker ran the job and reported an execution failure.
    #[error("Execution failed: {0}")]
    Execution(String),

    /// The workflow could not be prepared for this unit. Not the worker's
    /// fault.
    #[error("Workflow rejected: {0}")]
    Workflow(#[from] CoreError),
}

impl RenderError {
    /// Whether the failure should count against the worker's health.
    pub fn is_worker_fault(&self) -> bool {
        !matches!(self, RenderError::Workflow(_))
    }
}

/// What the pipeline needs from a render backend.
#[async_trait]
pub trait RenderClient: Send + Sync + 'static {
    /// Render `job` on `worker` using the workflow `document`.
    async fn render(
        &self,
        worker: &WorkerTarget,
        document: &serde_json::Value,
        job: &RenderJob,
    ) -> Result<RenderOutput, RenderError>;

    /// Check that `worker` is reachable and able to accept work.
    async fn probe(&self, worker: &WorkerTarget) -> Result<(), RenderError>;
}

// ---------------------------------------------------------------------------
// ComfyUI
// ---------------------------------------------------------------------------

/// [`RenderClient`] backed by ComfyUI workers.
pub struct ComfyRenderer {
    client: reqwest::Client,
    render_timeout: Duration,
    poll: PollConfig,
}

impl ComfyRenderer {
    pub fn new(render_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            render_timeout,
            poll: PollConfig::default(),
        }
    }

    fn api(&self, worker: &WorkerTarget) -> ComfyUIApi {
        ComfyUIApi::with_client(self.client.clone(), worker.base_url.clone())
            .with_api_key(worker.api_key.clone())
    }

    /// Poll history until the prompt finishes and return its first image.
    async fn wait_for_image(
        &self,
        api: &ComfyUIApi,
        prompt_id: &str,
    ) -> Result<ImageRef, RenderError> {
        let mut delay = self.poll.initial_delay;
        loop {
            tokio::time::sleep(delay).await;
            let history = api.get_history(prompt_id).await?;
            match prompt_state(&history, prompt_id) {
                PromptState::Pending => delay = next_delay(delay, &self.poll),
                PromptState::Completed(images) => {
                    return images.into_iter().next().ok_or_else(|| {
                        RenderError::Execution("no output image".to_string())
                    });
                }
                PromptState::Failed(reason) => return Err(RenderError::Execution(reason)),
            }
        }
    }
}

#[async_trait]
impl RenderClient for ComfyRenderer {
    async fn render(
        &self,
        worker: &WorkerTarget,
        document: &serde_json::Value,
        job: &RenderJob,
    ) -> Result<RenderOutput, RenderError> {
        let api = self.api(worker);
        let deadline = Instant::now() + self.render_timeout;
        let client_id = uuid::Uuid::new_v4().to_string();
        let mut thumbnails = Vec::with_capacity(job.seeds.len());

        for &seed in &job.seeds {
            let graph = workflow::inject(document, &job.combination, seed)?;
            let submitted = timeout_at(deadline, api.submit_workflow(&graph, &client_id))
                .await
                .map_err(|_| RenderError::Timeout(self.render_timeout))??;

            tracing::debug!(
                worker_id = worker.id,
                unit_id = job.unit_id,
                seed,
                prompt_id = %submitted.prompt_id,
                "Render submitted",
            );

            let image = match timeout_at(deadline, self.wait_for_image(&api, &submitted.prompt_id))
                .await
            {
                Ok(result) => result?,
                Err(_) => {
                    // Dequeue if still waiting, stop it if already running.
                    if let Err(e) = api.cancel_execution(&submitted.prompt_id).await {
                        tracing::debug!(
                            worker_id = worker.id,
                            error = %e,
                            "Failed to dequeue timed-out prompt",
                        );
                    }
                    if let Err(e) = api.interrupt().await {
                        tracing::debug!(
                            worker_id = worker.id,
                            error = %e,
                            "Failed to interrupt timed-out prompt",
                        );
                    }
                    return Err(RenderError::Timeout(self.render_timeout));
                }
            };

            thumbnails.push(api.view_url(&image.filename, &image.subfolder, &image.kind)?);
        }

        Ok(RenderOutput { thumbnails })
    }

    async fn probe(&self, worker: &WorkerTarget) -> Result<(), RenderError> {
        let api = self.api(worker);
        api.system_stats().await?;
        let queue = api.queue().await?;
        tracing::debug!(worker_id = worker.id, queue_depth = queue.depth(), "Probe ok");
        Ok(())
    }
}
