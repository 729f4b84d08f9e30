//! Registered render workers, their health, and worker selection.
//!
//! Each worker has a slot holding its health state (behind one lock, so a
//! status change and its failure timestamp move together) and an in-flight
//! counter updated by compare-and-set. [`WorkerPool::pick`] returns a
//! [`WorkerLease`] that holds one in-flight slot until dropped.
//!
//! Eligibility: the worker is enabled, has spare capacity, and is either
//! HEALTHY or UNHEALTHY with its cooldown elapsed. UNKNOWN workers wait for
//! their first probe.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use datalabel_core::error::CoreError;
use datalabel_core::types::DbId;
use datalabel_core::worker_pool::{cooldown_elapsed, normalize_base_url, validate_worker_name};
use datalabel_db::models::status::WorkerStatus;
use datalabel_db::models::worker::{CreateWorker, UpdateWorker, Worker};
use datalabel_db::store::Store;
use tokio::sync::{Notify, RwLock};
use tokio::time::Instant;

use crate::config::PipelineConfig;
use crate::error::PipelineResult;
use crate::render::{RenderClient, WorkerTarget};

#[derive(Debug, Clone, Copy)]
struct Health {
    status: WorkerStatus,
    failed_at: Option<Instant>,
}

#[derive(Debug)]
struct WorkerSlot {
    target: Mutex<WorkerTarget>,
    enabled: AtomicBool,
    health: Mutex<Health>,
    in_flight: AtomicUsize,
    last_used: AtomicU64,
}

impl WorkerSlot {
    fn from_worker(worker: &Worker) -> Self {
        let status = worker.status();
        Self {
            target: Mutex::new(target_of(worker)),
            enabled: AtomicBool::new(worker.is_enabled),
            health: Mutex::new(Health {
                status,
                failed_at: (status == WorkerStatus::Unhealthy).then(Instant::now),
            }),
            in_flight: AtomicUsize::new(0),
            last_used: AtomicU64::new(0),
        }
    }

    fn health(&self) -> Health {
        *self.health.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `to`, returning the previous status.
    fn set_status(&self, to: WorkerStatus) -> WorkerStatus {
        let mut health = self.health.lock().unwrap_or_else(PoisonError::into_inner);
        let from = health.status;
        health.status = to;
        health.failed_at = match to {
            WorkerStatus::Unhealthy => Some(Instant::now()),
            _ => None,
        };
        from
    }

    fn target(&self) -> WorkerTarget {
        self.target
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn is_selectable(&self, cooldown: Duration) -> bool {
        if !self.enabled.load(Ordering::Acquire) {
            return false;
        }
        let health = self.health();
        match health.status {
            WorkerStatus::Healthy => true,
            WorkerStatus::Unhealthy => health
                .failed_at
                .is_some_and(|at| cooldown_elapsed(at.elapsed(), cooldown)),
            WorkerStatus::Unknown => false,
        }
    }

    /// Claim one in-flight slot if below `max`.
    fn try_acquire(&self, max: usize) -> bool {
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .is_ok()
    }
}

fn target_of(worker: &Worker) -> WorkerTarget {
    WorkerTarget {
        id: worker.id,
        name: worker.name.clone(),
        base_url: worker.base_url.clone(),
        api_key: worker.api_key.clone(),
    }
}

/// An in-flight reservation on one worker. Released on drop.
#[derive(Debug)]
pub struct WorkerLease {
    slot: Arc<WorkerSlot>,
    target: WorkerTarget,
    released: Arc<Notify>,
}

impl WorkerLease {
    pub fn worker_id(&self) -> DbId {
        self.target.id
    }

    pub fn target(&self) -> &WorkerTarget {
        &self.target
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        self.slot.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.released.notify_waiters();
    }
}

/// Registry and scheduler of render workers.
pub struct WorkerPool {
    store: Arc<dyn Store>,
    renderer: Arc<dyn RenderClient>,
    slots: RwLock<BTreeMap<DbId, Arc<WorkerSlot>>>,
    clock: AtomicU64,
    changed: Arc<Notify>,
    cooldown: Duration,
    max_in_flight_per_worker: usize,
    probe_timeout: Duration,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn Store>,
        renderer: Arc<dyn RenderClient>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            renderer,
            slots: RwLock::new(BTreeMap::new()),
            clock: AtomicU64::new(0),
            changed: Arc::new(Notify::new()),
            cooldown: config.cooldown,
            max_in_flight_per_worker: config.max_in_flight_per_worker,
            probe_timeout: config.probe_timeout,
        }
    }

    /// Load every persisted worker into the pool.
    pub async fn load(&self) -> PipelineResult<usize> {
        let workers = self.store.list_workers().await?;
        let mut slots = self.slots.write().await;
        for worker in &workers {
            slots.insert(worker.id, Arc::new(WorkerSlot::from_worker(worker)));
        }
        tracing::info!(count = workers.len(), "Worker pool loaded");
        Ok(workers.len())
    }

    // -- registration ---------------------------------------------------------

    /// Register a new worker. It starts UNKNOWN and is not picked until a
    /// probe marks it HEALTHY.
    pub async fn register(&self, input: CreateWorker) -> PipelineResult<Worker> {
        validate_worker_name(&input.name)?;
        let input = CreateWorker {
            name: input.name.trim().to_string(),
            base_url: normalize_base_url(&input.base_url)?,
            api_key: input.api_key.filter(|k| !k.is_empty()),
        };

        let worker = self.store.insert_worker(&input).await?;
        self.slots
            .write()
            .await
            .insert(worker.id, Arc::new(WorkerSlot::from_worker(&worker)));

        tracing::info!(worker_id = worker.id, name = %worker.name, "Worker registered");
        Ok(worker)
    }

    /// Change a worker's URL, API key or enabled flag.
    pub async fn update(&self, id: DbId, input: UpdateWorker) -> PipelineResult<Worker> {
        let input = UpdateWorker {
            base_url: input
                .base_url
                .as_deref()
                .map(normalize_base_url)
                .transpose()?,
            ..input
        };

        let worker = self
            .store
            .update_worker(id, &input)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "worker",
                id,
            })?;

        let slot = self.slot_or_insert(&worker).await;
        *slot.target.lock().unwrap_or_else(PoisonError::into_inner) = target_of(&worker);
        slot.enabled.store(worker.is_enabled, Ordering::Release);
        self.changed.notify_waiters();

        tracing::info!(worker_id = id, enabled = worker.is_enabled, "Worker updated");
        Ok(worker)
    }

    pub async fn list(&self) -> PipelineResult<Vec<Worker>> {
        Ok(self.store.list_workers().await?)
    }

    pub async fn get(&self, id: DbId) -> PipelineResult<Worker> {
        Ok(self.store.find_worker(id).await?.ok_or(CoreError::NotFound {
            entity: "worker",
            id,
        })?)
    }

    // -- health ---------------------------------------------------------------

    /// Probe a worker now and record the outcome. Passing the probe makes
    /// the worker HEALTHY immediately, regardless of any cooldown.
    pub async fn test(&self, id: DbId) -> PipelineResult<bool> {
        let worker = self.get(id).await?;
        let slot = self.slot_or_insert(&worker).await;
        let target = slot.target();

        let outcome = match tokio::time::timeout(self.probe_timeout, self.renderer.probe(&target))
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("probe timed out after {:?}", self.probe_timeout)),
        };

        let healthy = outcome.is_ok();
        let status = if healthy {
            WorkerStatus::Healthy
        } else {
            WorkerStatus::Unhealthy
        };
        slot.set_status(status);
        self.store
            .record_worker_health(id, status, outcome.as_ref().err().map(String::as_str))
            .await?;
        self.changed.notify_waiters();

        match &outcome {
            Ok(()) => tracing::debug!(worker_id = id, "Worker probe passed"),
            Err(e) => tracing::warn!(worker_id = id, error = %e, "Worker probe failed"),
        }
        Ok(healthy)
    }

    /// Probe every enabled worker concurrently. Returns how many passed.
    pub async fn test_all(&self) -> usize {
        let ids: Vec<DbId> = self
            .slots
            .read()
            .await
            .iter()
            .filter(|(_, slot)| slot.enabled.load(Ordering::Acquire))
            .map(|(id, _)| *id)
            .collect();

        let results = futures::future::join_all(ids.iter().map(|id| self.test(*id))).await;
        let mut healthy = 0;
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(true) => healthy += 1,
                Ok(false) => {}
                Err(e) => tracing::error!(worker_id = id, error = %e, "Worker probe not recorded"),
            }
        }
        healthy
    }

    /// A dispatched job failed on this worker: take it out of rotation
    /// until it passes a test or its cooldown elapses.
    pub async fn mark_failed(&self, id: DbId, error: &str) {
        let Some(slot) = self.slot(id).await else {
            return;
        };
        let from = slot.set_status(WorkerStatus::Unhealthy);
        tracing::warn!(worker_id = id, from = from.label(), error, "Worker marked unhealthy");
        if let Err(e) = self
            .store
            .record_worker_health(id, WorkerStatus::Unhealthy, Some(error))
            .await
        {
            tracing::error!(worker_id = id, error = %e, "Failed to persist worker health");
        }
        self.changed.notify_waiters();
    }

    /// A dispatched job succeeded on this worker.
    pub async fn mark_succeeded(&self, id: DbId) {
        let Some(slot) = self.slot(id).await else {
            return;
        };
        let from = slot.set_status(WorkerStatus::Healthy);
        if from == WorkerStatus::Healthy {
            return;
        }
        tracing::info!(worker_id = id, from = from.label(), "Worker recovered");
        if let Err(e) = self
            .store
            .record_worker_health(id, WorkerStatus::Healthy, None)
            .await
        {
            tracing::error!(worker_id = id, error = %e, "Failed to persist worker health");
        }
        self.changed.notify_waiters();
    }

    // -- selection ------------------------------------------------------------

    /// Pick the least-recently-used eligible worker.
    pub async fn pick(&self) -> Result<WorkerLease, CoreError> {
        self.pick_excluding(&HashSet::new()).await
    }

    /// Pick the least-recently-used eligible worker not in `exclude`.
    ///
    /// Fails with [`CoreError::NoHealthyWorker`] when no worker qualifies
    /// (including when every qualifying worker is at capacity).
    pub async fn pick_excluding(&self, exclude: &HashSet<DbId>) -> Result<WorkerLease, CoreError> {
        let slots = self.slots.read().await;
        let mut candidates: Vec<&Arc<WorkerSlot>> = slots
            .iter()
            .filter(|(id, slot)| !exclude.contains(id) && slot.is_selectable(self.cooldown))
            .map(|(_, slot)| slot)
            .collect();
        candidates.sort_by_key(|slot| slot.last_used.load(Ordering::Acquire));

        for slot in candidates {
            if slot.try_acquire(self.max_in_flight_per_worker) {
                let tick = self.clock.fetch_add(1, Ordering::AcqRel) + 1;
                slot.last_used.store(tick, Ordering::Release);
                return Ok(WorkerLease {
                    slot: Arc::clone(slot),
                    target: slot.target(),
                    released: Arc::clone(&self.changed),
                });
            }
        }
        Err(CoreError::NoHealthyWorker)
    }

    /// Whether some worker outside `exclude` is eligible, ignoring capacity.
    pub async fn has_candidates(&self, exclude: &HashSet<DbId>) -> bool {
        self.slots
            .read()
            .await
            .iter()
            .any(|(id, slot)| !exclude.contains(id) && slot.is_selectable(self.cooldown))
    }

    /// Resolves when a worker's health changes or a lease is released.
    pub async fn changed(&self) {
        self.changed.notified().await;
    }

    // -- private helpers ------------------------------------------------------

    async fn slot(&self, id: DbId) -> Option<Arc<WorkerSlot>> {
        self.slots.read().await.get(&id).cloned()
    }

    async fn slot_or_insert(&self, worker: &Worker) -> Arc<WorkerSlot> {
        if let Some(slot) = self.slot(worker.id).await {
            return slot;
        }
        Arc::clone(
            self.slots
                .write()
                .await
                .entry(worker.id)
                .or_insert_with(|| Arc::new(WorkerSlot::from_worker(worker))),
        )
    }
}
