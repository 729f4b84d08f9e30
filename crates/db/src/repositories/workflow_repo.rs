//! Repository for the `workflows` table.

use datalabel_core::types::DbId;
use sqlx::PgPool;

use crate::models::workflow::{CreateWorkflow, Workflow};

/// Column list for `workflows` queries.
const COLUMNS: &str = "id, name, version, max_batch_size, document, slots, created_at";

/// Provides insert and lookup for workflows. Workflows are immutable.
pub struct WorkflowRepo;

impl WorkflowRepo {
    pub async fn create(pool: &PgPool, input: &CreateWorkflow) -> Result<Workflow, sqlx::Error> {
        let query = format!(
            "INSERT INTO workflows (name, version, max_batch_size, document, slots)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Workflow>(&query)
            .bind(&input.name)
            .bind(&input.version)
            .bind(input.max_batch_size)
            .bind(&input.document)
            .bind(&input.slots)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Workflow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM workflows WHERE id = $1");
        sqlx::query_as::<_, Workflow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List workflows, newest first.
    pub async fn list(pool: &PgPool) -> Result<Vec<Workflow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM workflows ORDER BY created_at DESC, id DESC");
        sqlx::query_as::<_, Workflow>(&query).fetch_all(pool).await
    }
}
