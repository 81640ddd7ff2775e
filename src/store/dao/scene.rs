//! SQL for story scenes. `(published_story_id, state_hash)` is unique; all
//! writes funnel through the upsert so retried notifications stay benign.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::store::models::StoryScene;

pub(crate) struct SceneDao;

const SCENE_COLUMNS: &str = r"
    id, published_story_id, state_hash, content, created_at, updated_at
";

impl SceneDao {
    pub(crate) async fn upsert(
        conn: &mut PgConnection,
        published_story_id: Uuid,
        state_hash: &str,
        content: &Value,
    ) -> Result<StoryScene> {
        let row = sqlx::query(&format!(
            r"
            INSERT INTO story_scenes (id, published_story_id, state_hash, content, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            ON CONFLICT (published_story_id, state_hash)
            DO UPDATE SET content = EXCLUDED.content, updated_at = NOW()
            RETURNING {SCENE_COLUMNS}
            ",
        ))
        .bind(Uuid::new_v4())
        .bind(published_story_id)
        .bind(state_hash)
        .bind(content)
        .fetch_one(conn)
        .await
        .context("failed to upsert story scene")?;

        scene_from_row(&row)
    }

    pub(crate) async fn find(
        pool: &PgPool,
        published_story_id: Uuid,
        state_hash: &str,
    ) -> Result<Option<StoryScene>> {
        let row = sqlx::query(&format!(
            "SELECT {SCENE_COLUMNS} FROM story_scenes WHERE published_story_id = $1 AND state_hash = $2"
        ))
        .bind(published_story_id)
        .bind(state_hash)
        .fetch_optional(pool)
        .await
        .context("failed to fetch story scene")?;

        row.as_ref().map(scene_from_row).transpose()
    }

    pub(crate) async fn find_in_tx(
        conn: &mut PgConnection,
        published_story_id: Uuid,
        state_hash: &str,
    ) -> Result<Option<StoryScene>> {
        let row = sqlx::query(&format!(
            "SELECT {SCENE_COLUMNS} FROM story_scenes WHERE published_story_id = $1 AND state_hash = $2"
        ))
        .bind(published_story_id)
        .bind(state_hash)
        .fetch_optional(conn)
        .await
        .context("failed to fetch story scene")?;

        row.as_ref().map(scene_from_row).transpose()
    }

    pub(crate) async fn update_content(
        conn: &mut PgConnection,
        id: Uuid,
        content: &Value,
    ) -> Result<StoryScene> {
        let row = sqlx::query(&format!(
            r"
            UPDATE story_scenes
            SET content = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {SCENE_COLUMNS}
            ",
        ))
        .bind(id)
        .bind(content)
        .fetch_one(conn)
        .await
        .context("failed to update scene content")?;

        scene_from_row(&row)
    }
}

pub(crate) fn scene_from_row(row: &PgRow) -> Result<StoryScene> {
    Ok(StoryScene {
        id: row.try_get("id")?,
        published_story_id: row.try_get("published_story_id")?,
        state_hash: row.try_get("state_hash")?,
        content: row.try_get("content")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
