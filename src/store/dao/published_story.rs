//! SQL for the published-story row.
//!
//! Mutations run against a caller-supplied transaction connection; the row is
//! locked first via [`PublishedStoryDao::lock`] so step transitions serialize
//! per story regardless of message arrival order.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::step::{GenerationStep, PendingCounters, StoryStatus};
use crate::store::models::PublishedStory;

pub(crate) struct PublishedStoryDao;

const STORY_COLUMNS: &str = r"
    id, user_id, config, setup, status, generation_step,
    is_first_scene_pending, are_images_pending,
    pending_char_gen_tasks, pending_card_img_tasks, pending_char_img_tasks,
    is_adult_content, language, error_details, created_at, updated_at
";

impl PublishedStoryDao {
    pub(crate) async fn get(pool: &PgPool, id: Uuid) -> Result<Option<PublishedStory>> {
        let row = sqlx::query(&format!(
            "SELECT {STORY_COLUMNS} FROM published_stories WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch published story")?;

        row.as_ref().map(story_from_row).transpose()
    }

    /// Row-level lock; held until the surrounding transaction ends.
    pub(crate) async fn lock(conn: &mut PgConnection, id: Uuid) -> Result<Option<PublishedStory>> {
        let row = sqlx::query(&format!(
            "SELECT {STORY_COLUMNS} FROM published_stories WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await
        .context("failed to lock published story")?;

        row.as_ref().map(story_from_row).transpose()
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn update_status_flags_and_details(
        conn: &mut PgConnection,
        id: Uuid,
        status: StoryStatus,
        is_first_scene_pending: bool,
        are_images_pending: bool,
        counters: PendingCounters,
        error_details: Option<&str>,
        step: Option<GenerationStep>,
    ) -> Result<PublishedStory> {
        let row = sqlx::query(&format!(
            r"
            UPDATE published_stories
            SET status = $2,
                is_first_scene_pending = $3,
                are_images_pending = $4,
                pending_char_gen_tasks = $5,
                pending_card_img_tasks = $6,
                pending_char_img_tasks = $7,
                error_details = $8,
                generation_step = $9,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {STORY_COLUMNS}
            ",
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(is_first_scene_pending)
        .bind(are_images_pending)
        .bind(counters.char_gen)
        .bind(counters.card_img)
        .bind(counters.char_img)
        .bind(error_details)
        .bind(step.map(GenerationStep::as_str))
        .fetch_one(conn)
        .await
        .context("failed to update story status, flags and details")?;

        story_from_row(&row)
    }

    pub(crate) async fn update_status_and_error(
        conn: &mut PgConnection,
        id: Uuid,
        status: StoryStatus,
        error_details: Option<&str>,
    ) -> Result<Option<PublishedStory>> {
        let row = sqlx::query(&format!(
            r"
            UPDATE published_stories
            SET status = $2, error_details = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING {STORY_COLUMNS}
            ",
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(error_details)
        .fetch_optional(conn)
        .await
        .context("failed to update story status and error")?;

        row.as_ref().map(story_from_row).transpose()
    }

    pub(crate) async fn update_after_moderation(
        conn: &mut PgConnection,
        id: Uuid,
        status: StoryStatus,
        is_adult: bool,
        step: Option<GenerationStep>,
    ) -> Result<PublishedStory> {
        let row = sqlx::query(&format!(
            r"
            UPDATE published_stories
            SET status = $2, is_adult_content = $3, error_details = NULL,
                generation_step = $4, updated_at = NOW()
            WHERE id = $1
            RETURNING {STORY_COLUMNS}
            ",
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(is_adult)
        .bind(step.map(GenerationStep::as_str))
        .fetch_one(conn)
        .await
        .context("failed to update story after moderation")?;

        story_from_row(&row)
    }

    pub(crate) async fn update_status_flags_and_setup(
        conn: &mut PgConnection,
        id: Uuid,
        status: StoryStatus,
        setup: &Value,
        is_first_scene_pending: bool,
        are_images_pending: bool,
        step: Option<GenerationStep>,
    ) -> Result<PublishedStory> {
        let row = sqlx::query(&format!(
            r"
            UPDATE published_stories
            SET status = $2, setup = $3, is_first_scene_pending = $4,
                are_images_pending = $5, generation_step = $6, updated_at = NOW()
            WHERE id = $1
            RETURNING {STORY_COLUMNS}
            ",
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(setup)
        .bind(is_first_scene_pending)
        .bind(are_images_pending)
        .bind(step.map(GenerationStep::as_str))
        .fetch_one(conn)
        .await
        .context("failed to update story setup")?;

        story_from_row(&row)
    }
}

pub(crate) fn story_from_row(row: &PgRow) -> Result<PublishedStory> {
    let status: String = row.try_get("status").context("missing status column")?;
    let step: Option<String> = row
        .try_get("generation_step")
        .context("missing generation_step column")?;

    Ok(PublishedStory {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        config: row.try_get("config")?,
        setup: row.try_get("setup")?,
        status: status.parse().context("unreadable story status")?,
        generation_step: step
            .map(|value| value.parse())
            .transpose()
            .context("unreadable generation step")?,
        is_first_scene_pending: row.try_get("is_first_scene_pending")?,
        are_images_pending: row.try_get("are_images_pending")?,
        pending_char_gen_tasks: row.try_get("pending_char_gen_tasks")?,
        pending_card_img_tasks: row.try_get("pending_card_img_tasks")?,
        pending_char_img_tasks: row.try_get("pending_char_img_tasks")?,
        is_adult_content: row.try_get("is_adult_content")?,
        language: row.try_get("language")?,
        error_details: row.try_get("error_details")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
