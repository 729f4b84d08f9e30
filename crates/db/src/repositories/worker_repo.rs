//! Repository for the `workers` table.

use datalabel_core::types::DbId;
use sqlx::PgPool;

use crate::models::status::WorkerStatus;
use crate::models::worker::{CreateWorker, UpdateWorker, Worker};

/// Column list for `workers` queries.
const COLUMNS: &str = "\
    id, name, base_url, api_key, is_enabled, status_id, \
    last_checked_at, last_error, created_at, updated_at";

/// Provides CRUD operations for render workers.
pub struct WorkerRepo;

impl WorkerRepo {
    /// Register a new worker with status UNKNOWN.
    pub async fn create(pool: &PgPool, input: &CreateWorker) -> Result<Worker, sqlx::Error> {
        let query = format!(
            "INSERT INTO workers (name, base_url, api_key, status_id)
             VALUES ($1, $2, $3, $4)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Worker>(&query)
            .bind(&input.name)
            .bind(&input.base_url)
            .bind(&input.api_key)
            .bind(WorkerStatus::Unknown.id())
            .fetch_one(pool)
            .await
    }

    /// Find a worker by its internal ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Worker>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM workers WHERE id = $1");
        sqlx::query_as::<_, Worker>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List all workers in registration order.
    pub async fn list(pool: &PgPool) -> Result<Vec<Worker>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM workers ORDER BY id ASC");
        sqlx::query_as::<_, Worker>(&query).fetch_all(pool).await
    }

    /// Update a worker. Only non-`None` fields in `input` are applied.
    pub async fn update(
        pool: &PgPool,
        id: DbId,
        input: &UpdateWorker,
    ) -> Result<Option<Worker>, sqlx::Error> {
        let query = format!(
            "UPDATE workers SET
                base_url = COALESCE($2, base_url),
                api_key = COALESCE($3, api_key),
                is_enabled = COALESCE($4, is_enabled),
                updated_at = NOW()
             WHERE id = $1
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Worker>(&query)
            .bind(id)
            .bind(&input.base_url)
            .bind(&input.api_key)
            .bind(input.is_enabled)
            .fetch_optional(pool)
            .await
    }

    /// Record the outcome of a health probe or dispatched job.
    pub async fn record_health(
        pool: &PgPool,
        id: DbId,
        status: WorkerStatus,
        error: Option<&str>,
    ) -> Result<Option<Worker>, sqlx::Error> {
        let query = format!(
            "UPDATE workers SET
                status_id = $2,
                last_error = $3,
                last_checked_at = NOW(),
                updated_at = NOW()
             WHERE id = $1
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Worker>(&query)
            .bind(id)
            .bind(status.id())
            .bind(error)
            .fetch_optional(pool)
            .await
    }
}
