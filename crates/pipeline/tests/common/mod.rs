//! Shared fixtures: an in-memory store, a scripted render client and
//! helpers for seeding workflows, pools and workers.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use datalabel_core::types::DbId;
use datalabel_db::models::status::TaskStatus;
use datalabel_db::models::task::Task;
use datalabel_db::models::variable_pool::{CreateVariablePool, VariablePool};
use datalabel_db::models::worker::{CreateWorker, Worker};
use datalabel_db::models::workflow::{CreateWorkflow, Workflow};
use datalabel_db::store::{MemoryStore, Store};
use datalabel_pipeline::config::PipelineConfig;
use datalabel_pipeline::render::{RenderClient, RenderError, RenderJob, RenderOutput, WorkerTarget};
use datalabel_pipeline::Pipeline;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Semaphore;

// ---------------------------------------------------------------------------
// Fake render client
// ---------------------------------------------------------------------------

/// Render client whose behaviour is scripted per worker.
#[derive(Default)]
pub struct FakeRenderer {
    /// Workers whose renders fail.
    failing: Mutex<HashSet<DbId>>,
    /// Workers whose probes fail.
    unreachable: Mutex<HashSet<DbId>>,
    /// Random per-render delay, drawn from a seeded RNG.
    jitter: Option<(Mutex<StdRng>, u64)>,
    /// When set, renders wait for a permit before finishing.
    gate: Option<Arc<Semaphore>>,
    /// Worker of every render attempt, in call order.
    calls: Mutex<Vec<DbId>>,
}

impl FakeRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Renders sleep between 0 and `max_ms` milliseconds.
    pub fn with_jitter(seed: u64, max_ms: u64) -> Self {
        Self {
            jitter: Some((Mutex::new(StdRng::seed_from_u64(seed)), max_ms)),
            ..Self::default()
        }
    }

    /// Renders block until a permit is added to `gate`.
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn fail_renders_on(&self, worker_id: DbId) {
        self.failing.lock().unwrap().insert(worker_id);
    }

    pub fn fail_probes_on(&self, worker_id: DbId) {
        self.unreachable.lock().unwrap().insert(worker_id);
    }

    pub fn heal(&self, worker_id: DbId) {
        self.failing.lock().unwrap().remove(&worker_id);
        self.unreachable.lock().unwrap().remove(&worker_id);
    }

    pub fn calls(&self) -> Vec<DbId> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RenderClient for FakeRenderer {
    async fn render(
        &self,
        worker: &WorkerTarget,
        _document: &serde_json::Value,
        job: &RenderJob,
    ) -> Result<RenderOutput, RenderError> {
        self.calls.lock().unwrap().push(worker.id);

        if let Some((rng, max_ms)) = &self.jitter {
            let ms = rng.lock().unwrap().random_range(0..=*max_ms);
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }

        if self.failing.lock().unwrap().contains(&worker.id) {
            return Err(RenderError::Execution(format!("{} ran out of memory", worker.name)));
        }
        Ok(RenderOutput {
            thumbnails: job
                .seeds
                .iter()
                .map(|seed| format!("{}/view?filename={}_{seed}.png", worker.base_url, job.unit_id))
                .collect(),
        })
    }

    async fn probe(&self, worker: &WorkerTarget) -> Result<(), RenderError> {
        if self.unreachable.lock().unwrap().contains(&worker.id) {
            return Err(RenderError::Execution("connection refused".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        no_worker_backoff: Duration::from_millis(10),
        probe_timeout: Duration::from_secs(1),
        ..PipelineConfig::default()
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub renderer: Arc<FakeRenderer>,
    pub pipeline: Pipeline,
}

pub fn harness(renderer: FakeRenderer, config: PipelineConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let renderer = Arc::new(renderer);
    let pipeline = Pipeline::new(
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::clone(&renderer) as _,
        config,
    );
    Harness {
        store,
        renderer,
        pipeline,
    }
}

impl Harness {
    /// Register a worker without probing it (status UNKNOWN).
    pub async fn register(&self, name: &str) -> Worker {
        self.pipeline
            .workers
            .register(CreateWorker {
                name: name.into(),
                base_url: format!("http://{name}.local:8188"),
                api_key: None,
            })
            .await
            .unwrap()
    }

    /// Register a worker and probe it HEALTHY.
    pub async fn healthy_worker(&self, name: &str) -> Worker {
        let worker = self.register(name).await;
        assert!(self.pipeline.workers.test(worker.id).await.unwrap());
        worker
    }

    /// A workflow whose prompt node templates the given slots.
    pub async fn workflow(&self, template: &str, slots: &[&str]) -> Workflow {
        self.store
            .insert_workflow(&CreateWorkflow {
                name: "sdxl-base".into(),
                version: format!("v{}", slots.len()),
                max_batch_size: 4,
                document: serde_json::json!({
                    "3": {"class_type": "KSampler", "inputs": {"seed": 0, "steps": 20}},
                    "5": {"class_type": "EmptyLatentImage", "inputs": {"batch_size": 4}},
                    "6": {"class_type": "CLIPTextEncode", "inputs": {"text": template}},
                    "7": {"class_type": "CLIPTextEncode", "inputs": {"text": "blurry"}}
                }),
                slots: slots.iter().map(|s| s.to_string()).collect(),
            })
            .await
            .unwrap()
    }

    pub async fn pool(&self, name: &str, mode: &str, items: &[&str]) -> VariablePool {
        self.store
            .insert_pool(&CreateVariablePool {
                name: name.into(),
                mode: mode.into(),
                items: items.iter().map(|s| s.to_string()).collect(),
            })
            .await
            .unwrap()
    }

    /// Poll until the task reaches COMPLETE or FAILED.
    pub async fn wait_for_terminal(&self, task_id: DbId) -> Task {
        let poll = async {
            loop {
                let task = self.pipeline.tasks.get(task_id).await.unwrap();
                if matches!(task.status(), TaskStatus::Complete | TaskStatus::Failed) {
                    return task;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(10), poll)
            .await
            .expect("task did not finish in time")
    }
}
