//! SQL for worker-produced generation results, keyed by task id.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::store::models::GenerationResult;

pub(crate) struct GenerationResultDao;

impl GenerationResultDao {
    pub(crate) async fn get_by_task_id(
        pool: &PgPool,
        task_id: Uuid,
    ) -> Result<Option<GenerationResult>> {
        let row = sqlx::query(
            "SELECT task_id, generated_text, error FROM generation_results WHERE task_id = $1",
        )
        .bind(task_id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch generation result")?;

        row.map(|row| {
            Ok(GenerationResult {
                task_id: row.try_get("task_id")?,
                generated_text: row.try_get("generated_text")?,
                error: row.try_get("error")?,
            })
        })
        .transpose()
    }
}
