//! Repository for the `variable_pools` table.

use datalabel_core::types::DbId;
use sqlx::PgPool;

use crate::models::variable_pool::VariablePool;

/// Column list for `variable_pools` queries.
const COLUMNS: &str = "id, name, mode, items, created_at";

/// Provides insert and lookup for variable pools. Pools are immutable.
pub struct VariablePoolRepo;

impl VariablePoolRepo {
    /// Insert a pool. `mode` must already be a valid sampling mode string.
    pub async fn create(
        pool: &PgPool,
        name: &str,
        mode: &str,
        items: &[String],
    ) -> Result<VariablePool, sqlx::Error> {
        let query = format!(
            "INSERT INTO variable_pools (name, mode, items)
             VALUES ($1, $2, $3)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, VariablePool>(&query)
            .bind(name)
            .bind(mode)
            .bind(items)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<VariablePool>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM variable_pools WHERE id = $1");
        sqlx::query_as::<_, VariablePool>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Fetch every pool whose ID is in `ids`. Order is unspecified and
    /// missing IDs are simply absent from the result.
    pub async fn find_many(pool: &PgPool, ids: &[DbId]) -> Result<Vec<VariablePool>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM variable_pools WHERE id = ANY($1)");
        sqlx::query_as::<_, VariablePool>(&query)
            .bind(ids)
            .fetch_all(pool)
            .await
    }

    pub async fn list(pool: &PgPool) -> Result<Vec<VariablePool>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM variable_pools ORDER BY name ASC");
        sqlx::query_as::<_, VariablePool>(&query).fetch_all(pool).await
    }
}
