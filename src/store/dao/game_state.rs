//! SQL for player sessions.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::store::models::{PlayerGameState, PlayerStatus};

pub(crate) struct GameStateDao;

const GAME_STATE_COLUMNS: &str = r"
    id, player_id, published_story_id, current_scene_id, player_status,
    ending_text, completed_at, error_details, last_activity_at
";

impl GameStateDao {
    pub(crate) async fn get(pool: &PgPool, id: Uuid) -> Result<Option<PlayerGameState>> {
        let row = sqlx::query(&format!(
            "SELECT {GAME_STATE_COLUMNS} FROM player_game_states WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch player game state")?;

        row.as_ref().map(game_state_from_row).transpose()
    }

    pub(crate) async fn lock(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<PlayerGameState>> {
        let row = sqlx::query(&format!(
            "SELECT {GAME_STATE_COLUMNS} FROM player_game_states WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await
        .context("failed to lock player game state")?;

        row.as_ref().map(game_state_from_row).transpose()
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn save_resolution(
        conn: &mut PgConnection,
        id: Uuid,
        status: PlayerStatus,
        current_scene_id: Option<Uuid>,
        ending_text: Option<&str>,
        completed_at: Option<DateTime<Utc>>,
        error_details: Option<&str>,
    ) -> Result<Option<PlayerGameState>> {
        let row = sqlx::query(&format!(
            r"
            UPDATE player_game_states
            SET player_status = $2,
                current_scene_id = COALESCE($3, current_scene_id),
                ending_text = COALESCE($4, ending_text),
                completed_at = COALESCE($5, completed_at),
                error_details = $6,
                last_activity_at = NOW()
            WHERE id = $1
            RETURNING {GAME_STATE_COLUMNS}
            ",
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(current_scene_id)
        .bind(ending_text)
        .bind(completed_at)
        .bind(error_details)
        .fetch_optional(conn)
        .await
        .context("failed to update player game state")?;

        row.as_ref().map(game_state_from_row).transpose()
    }
}

pub(crate) fn game_state_from_row(row: &PgRow) -> Result<PlayerGameState> {
    let status: String = row
        .try_get("player_status")
        .context("missing player_status column")?;

    Ok(PlayerGameState {
        id: row.try_get("id")?,
        player_id: row.try_get("player_id")?,
        published_story_id: row.try_get("published_story_id")?,
        current_scene_id: row.try_get("current_scene_id")?,
        player_status: status.parse().context("unreadable player status")?,
        ending_text: row.try_get("ending_text")?,
        completed_at: row.try_get("completed_at")?,
        error_details: row.try_get("error_details")?,
        last_activity_at: row.try_get("last_activity_at")?,
    })
}
