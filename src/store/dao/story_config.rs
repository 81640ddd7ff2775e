//! SQL for user-authored draft configs.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::store::models::StoryConfig;

pub(crate) struct StoryConfigDao;

const CONFIG_COLUMNS: &str = r"
    id, user_id, status, title, description, config, error_details, created_at, updated_at
";

impl StoryConfigDao {
    pub(crate) async fn get(pool: &PgPool, id: Uuid) -> Result<Option<StoryConfig>> {
        let row = sqlx::query(&format!(
            "SELECT {CONFIG_COLUMNS} FROM story_configs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch story config")?;

        row.as_ref().map(config_from_row).transpose()
    }

    /// Promotion is guarded on the `generating` status; zero affected rows
    /// means the notification raced an earlier promotion or failure.
    pub(crate) async fn promote_to_draft(
        pool: &PgPool,
        id: Uuid,
        title: &str,
        description: &str,
        config: &Value,
    ) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE story_configs
            SET status = 'draft', title = $2, description = $3, config = $4, updated_at = NOW()
            WHERE id = $1 AND status = 'generating'
            ",
        )
        .bind(id)
        .bind(title)
        .bind(description)
        .bind(config)
        .execute(pool)
        .await
        .context("failed to promote story config to draft")?;

        Ok(result.rows_affected() > 0)
    }

    pub(crate) async fn mark_error(pool: &PgPool, id: Uuid, details: &str) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE story_configs
            SET status = 'error', error_details = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'generating'
            ",
        )
        .bind(id)
        .bind(details)
        .execute(pool)
        .await
        .context("failed to mark story config as failed")?;

        Ok(result.rows_affected() > 0)
    }
}

pub(crate) fn config_from_row(row: &PgRow) -> Result<StoryConfig> {
    let status: String = row.try_get("status").context("missing status column")?;

    Ok(StoryConfig {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        status: status.parse().context("unreadable config status")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        config: row.try_get("config")?,
        error_details: row.try_get("error_details")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
