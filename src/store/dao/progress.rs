//! SQL for player progress memos, keyed by
//! `(player_id, published_story_id, current_state_hash)`.

use anyhow::{Context, Result};
use sqlx::{PgConnection, Row};
use uuid::Uuid;

use crate::store::models::PlayerProgress;

pub(crate) struct ProgressDao;

impl ProgressDao {
    /// Upsert the memo for a state hash. An absent summary never clobbers an
    /// existing one.
    pub(crate) async fn upsert_by_hash(
        conn: &mut PgConnection,
        player_id: Uuid,
        published_story_id: Uuid,
        state_hash: &str,
        scene_summary: Option<&str>,
    ) -> Result<PlayerProgress> {
        let row = sqlx::query(
            r"
            INSERT INTO player_progress
                (id, player_id, published_story_id, current_state_hash, current_scene_summary, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (player_id, published_story_id, current_state_hash)
            DO UPDATE SET
                current_scene_summary = COALESCE(EXCLUDED.current_scene_summary, player_progress.current_scene_summary),
                updated_at = NOW()
            RETURNING id, player_id, published_story_id, current_state_hash, current_scene_summary, updated_at
            ",
        )
        .bind(Uuid::new_v4())
        .bind(player_id)
        .bind(published_story_id)
        .bind(state_hash)
        .bind(scene_summary)
        .fetch_one(conn)
        .await
        .context("failed to upsert player progress")?;

        Ok(PlayerProgress {
            id: row.try_get("id")?,
            player_id: row.try_get("player_id")?,
            published_story_id: row.try_get("published_story_id")?,
            current_state_hash: row.try_get("current_state_hash")?,
            current_scene_summary: row.try_get("current_scene_summary")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}
