//! Generation and annotation pipeline.
//!
//! [`worker_pool::WorkerPool`] tracks render worker health,
//! [`dispatcher::Dispatcher`] routes render units to workers with
//! failover, [`task_manager::TaskManager`] drives tasks from sampler to
//! batches and serves the annotation feed, and
//! [`annotation_store::AnnotationStore`] accepts annotator decisions.

use std::sync::Arc;

use datalabel_db::store::Store;

pub mod annotation_store;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod health_monitor;
pub mod render;
pub mod task_manager;
pub mod worker_pool;

use annotation_store::AnnotationStore;
use config::PipelineConfig;
use dispatcher::Dispatcher;
use render::RenderClient;
use task_manager::TaskManager;
use worker_pool::WorkerPool;

/// The wired-up pipeline components sharing one store and renderer.
#[derive(Clone)]
pub struct Pipeline {
    pub workers: Arc<WorkerPool>,
    pub tasks: Arc<TaskManager>,
    pub annotations: Arc<AnnotationStore>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn Store>,
        renderer: Arc<dyn RenderClient>,
        config: PipelineConfig,
    ) -> Self {
        let workers = Arc::new(WorkerPool::new(
            Arc::clone(&store),
            Arc::clone(&renderer),
            &config,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&workers),
            renderer,
            &config,
        ));
        let tasks = Arc::new(TaskManager::new(Arc::clone(&store), dispatcher, &config));
        let annotations = Arc::new(AnnotationStore::new(store));
        Self {
            workers,
            tasks,
            annotations,
        }
    }
}
