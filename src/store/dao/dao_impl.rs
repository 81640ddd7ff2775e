//! Postgres implementation of [`OrchestratorDao`].
//!
//! Every composite method follows the same shape: begin a transaction, lock
//! the story or session row, re-verify the expected pipeline position, write,
//! commit. Step and counter recomputation goes through `crate::step`; this
//! module never invents transition rules of its own.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use super::game_state::GameStateDao;
use super::generation_result::GenerationResultDao;
use super::image_reference::ImageReferenceDao;
use super::progress::ProgressDao;
use super::published_story::PublishedStoryDao;
use super::scene::SceneDao;
use super::story_config::StoryConfigDao;
use super::{OrchestratorDao, SceneOutcome};
use crate::bus::types::HISTORY_PREVIEW_REF_PREFIX;
use crate::step::{
    GenerationStep, InvariantViolation, PendingCounters, StaleNotification, StoryStatus,
    TransitionError, determine_next_step, status_from_step, validate_transition,
};
use crate::store::models::{
    GenerationResult, INITIAL_STATE_HASH, PlayerGameState, PlayerStatus, PublishedStory,
    StoryConfig, StoryScene, merge_setup, scene_with_characters, scene_with_focus,
    setup_marked_done, setup_with_preview,
};

#[derive(Debug, Clone)]
pub(crate) struct PgDao {
    pool: PgPool,
}

impl PgDao {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Lock the story row and fail with a stale error unless it sits at the
    /// expected step.
    async fn lock_story_at(
        conn: &mut sqlx::PgConnection,
        id: Uuid,
        expected: GenerationStep,
    ) -> Result<PublishedStory> {
        let story = PublishedStoryDao::lock(conn, id)
            .await?
            .ok_or_else(|| anyhow!("published story {id} not found"))?;

        if story.generation_step != Some(expected) {
            return Err(TransitionError::Stale {
                expected: Some(expected),
                actual: story.generation_step,
            }
            .into());
        }
        Ok(story)
    }
}

#[async_trait]
impl OrchestratorDao for PgDao {
    async fn get_story_config(&self, id: Uuid) -> Result<Option<StoryConfig>> {
        StoryConfigDao::get(&self.pool, id).await
    }

    async fn promote_config_to_draft(
        &self,
        id: Uuid,
        title: &str,
        description: &str,
        config: &Value,
    ) -> Result<bool> {
        StoryConfigDao::promote_to_draft(&self.pool, id, title, description, config).await
    }

    async fn mark_config_error(&self, id: Uuid, details: &str) -> Result<bool> {
        StoryConfigDao::mark_error(&self.pool, id, details).await
    }

    async fn get_published_story(&self, id: Uuid) -> Result<Option<PublishedStory>> {
        PublishedStoryDao::get(&self.pool, id).await
    }

    async fn update_after_moderation(&self, id: Uuid, is_adult: bool) -> Result<PublishedStory> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        let story = Self::lock_story_at(&mut tx, id, GenerationStep::Moderation).await?;

        let to = GenerationStep::ProtagonistGoal;
        validate_transition(story.generation_step, to)?;
        let updated = PublishedStoryDao::update_after_moderation(
            &mut tx,
            id,
            status_from_step(to),
            is_adult,
            Some(to),
        )
        .await?;

        tx.commit().await.context("failed to commit transaction")?;
        Ok(updated)
    }

    async fn merge_setup_and_advance(
        &self,
        id: Uuid,
        expected: GenerationStep,
        setup_patch: &Value,
        to: GenerationStep,
    ) -> Result<PublishedStory> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        let story = Self::lock_story_at(&mut tx, id, expected).await?;

        validate_transition(story.generation_step, to)?;
        let setup = merge_setup(&story.setup, setup_patch);
        let updated = PublishedStoryDao::update_status_flags_and_setup(
            &mut tx,
            id,
            status_from_step(to),
            &setup,
            story.is_first_scene_pending,
            story.are_images_pending,
            Some(to),
        )
        .await?;

        tx.commit().await.context("failed to commit transaction")?;
        Ok(updated)
    }

    async fn commit_scene_plan(
        &self,
        id: Uuid,
        scene_content: &Value,
        pending_char_gen: i32,
        pending_card_img: i32,
    ) -> Result<PublishedStory> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        let story = Self::lock_story_at(&mut tx, id, GenerationStep::ScenePlanner).await?;

        SceneDao::upsert(&mut tx, id, INITIAL_STATE_HASH, scene_content).await?;

        let counters = PendingCounters::new(pending_char_gen, pending_card_img, 0);
        let to = determine_next_step(counters);
        validate_transition(story.generation_step, to)?;
        let updated = PublishedStoryDao::update_status_flags_and_details(
            &mut tx,
            id,
            status_from_step(to),
            story.is_first_scene_pending,
            counters.images_pending(),
            counters,
            None,
            Some(to),
        )
        .await?;

        tx.commit().await.context("failed to commit transaction")?;
        Ok(updated)
    }

    async fn commit_character_batch(
        &self,
        id: Uuid,
        characters: &Value,
        char_image_count: i32,
    ) -> Result<PublishedStory> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        let story = Self::lock_story_at(&mut tx, id, GenerationStep::CharacterGeneration).await?;

        let scene = SceneDao::find_in_tx(&mut tx, id, INITIAL_STATE_HASH)
            .await?
            .ok_or_else(|| InvariantViolation {
                id,
                detail: "initial scene is missing while merging the character batch".to_string(),
            })?;

        let content = scene_with_characters(&scene.content, characters);
        SceneDao::update_content(&mut tx, scene.id, &content).await?;

        let counters = PendingCounters::new(
            0,
            story.pending_card_img_tasks,
            story.pending_char_img_tasks + char_image_count,
        );
        let to = determine_next_step(counters);
        validate_transition(story.generation_step, to)?;
        let updated = PublishedStoryDao::update_status_flags_and_details(
            &mut tx,
            id,
            status_from_step(to),
            story.is_first_scene_pending,
            counters.images_pending(),
            counters,
            None,
            Some(to),
        )
        .await?;

        tx.commit().await.context("failed to commit transaction")?;
        Ok(updated)
    }

    async fn decrement_image_counters(
        &self,
        id: Uuid,
        dec_card_img: i32,
        dec_char_img: i32,
    ) -> Result<PublishedStory> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        let story = PublishedStoryDao::lock(&mut tx, id)
            .await?
            .ok_or_else(|| anyhow!("published story {id} not found"))?;

        let counters = story.counters().decremented(dec_card_img, dec_char_img);

        let in_sub_task_phase = matches!(
            story.generation_step,
            Some(
                GenerationStep::CharacterGeneration
                    | GenerationStep::CardImageGeneration
                    | GenerationStep::CharacterImageGeneration
            )
        );

        let (step, images_pending) = if in_sub_task_phase {
            if counters.all_clear() {
                if setup_marked_done(&story.setup) {
                    // The setup result already arrived while images were
                    // draining; skip the setup step entirely.
                    let reference = format!("{HISTORY_PREVIEW_REF_PREFIX}{id}");
                    let cover_needed = story
                        .setup
                        .get(crate::store::models::SETUP_PREVIEW_KEY)
                        .is_some()
                        && ImageReferenceDao::url_by_reference_in_tx(&mut tx, &reference)
                            .await?
                            .is_none();
                    let to = if cover_needed {
                        GenerationStep::CoverImageGeneration
                    } else {
                        GenerationStep::InitialSceneJson
                    };
                    validate_transition(story.generation_step, to)?;
                    (Some(to), cover_needed)
                } else {
                    let to = GenerationStep::SetupGeneration;
                    validate_transition(story.generation_step, to)?;
                    (Some(to), false)
                }
            } else {
                let to = determine_next_step(counters);
                if Some(to) != story.generation_step {
                    validate_transition(story.generation_step, to)?;
                }
                (Some(to), counters.images_pending())
            }
        } else {
            // Late or duplicate completion: adjust counters, leave the step.
            (story.generation_step, counters.images_pending())
        };

        let status = match step {
            Some(step) if in_sub_task_phase => status_from_step(step),
            _ => story.status,
        };

        let updated = PublishedStoryDao::update_status_flags_and_details(
            &mut tx,
            id,
            status,
            story.is_first_scene_pending,
            images_pending,
            counters,
            story.error_details.as_deref(),
            step,
        )
        .await?;

        tx.commit().await.context("failed to commit transaction")?;
        Ok(updated)
    }

    async fn complete_cover_image(&self, id: Uuid) -> Result<PublishedStory> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        let story = Self::lock_story_at(&mut tx, id, GenerationStep::CoverImageGeneration).await?;

        let to = GenerationStep::InitialSceneJson;
        validate_transition(story.generation_step, to)?;
        let updated = PublishedStoryDao::update_status_flags_and_details(
            &mut tx,
            id,
            status_from_step(to),
            story.is_first_scene_pending,
            false,
            story.counters(),
            story.error_details.as_deref(),
            Some(to),
        )
        .await?;

        tx.commit().await.context("failed to commit transaction")?;
        Ok(updated)
    }

    async fn commit_setup(
        &self,
        id: Uuid,
        preview_prompt: Option<&str>,
        scene_focus: &str,
    ) -> Result<(PublishedStory, StoryScene)> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        let story = PublishedStoryDao::lock(&mut tx, id)
            .await?
            .ok_or_else(|| anyhow!("published story {id} not found"))?;

        let at_setup_step = story.generation_step == Some(GenerationStep::SetupGeneration);
        let images_draining = matches!(
            story.generation_step,
            Some(GenerationStep::CardImageGeneration | GenerationStep::CharacterImageGeneration)
        );
        if !at_setup_step && !images_draining {
            return Err(TransitionError::Stale {
                expected: Some(GenerationStep::SetupGeneration),
                actual: story.generation_step,
            }
            .into());
        }

        let existing = SceneDao::find_in_tx(&mut tx, id, INITIAL_STATE_HASH).await?;
        let content = scene_with_focus(existing.as_ref().map(|scene| &scene.content), scene_focus);
        let scene = SceneDao::upsert(&mut tx, id, INITIAL_STATE_HASH, &content).await?;

        let setup = setup_with_preview(&story.setup, preview_prompt);

        let updated = if at_setup_step {
            let reference = format!("{HISTORY_PREVIEW_REF_PREFIX}{id}");
            let cover_needed = preview_prompt.is_some()
                && ImageReferenceDao::url_by_reference_in_tx(&mut tx, &reference)
                    .await?
                    .is_none();
            let to = if cover_needed {
                GenerationStep::CoverImageGeneration
            } else {
                GenerationStep::InitialSceneJson
            };
            validate_transition(story.generation_step, to)?;
            PublishedStoryDao::update_status_flags_and_setup(
                &mut tx,
                id,
                status_from_step(to),
                &setup,
                story.is_first_scene_pending,
                cover_needed,
                Some(to),
            )
            .await?
        } else {
            // Images are still draining; record the merge and let the final
            // image completion advance the step.
            PublishedStoryDao::update_status_flags_and_setup(
                &mut tx,
                id,
                story.status,
                &setup,
                story.is_first_scene_pending,
                story.are_images_pending,
                story.generation_step,
            )
            .await?
        };

        tx.commit().await.context("failed to commit transaction")?;
        Ok((updated, scene))
    }

    async fn commit_initial_scene(
        &self,
        id: Uuid,
        content: &Value,
    ) -> Result<(PublishedStory, StoryScene)> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        let story = Self::lock_story_at(&mut tx, id, GenerationStep::InitialSceneJson).await?;

        let scene = SceneDao::upsert(&mut tx, id, INITIAL_STATE_HASH, content).await?;

        let to = GenerationStep::Complete;
        validate_transition(story.generation_step, to)?;
        let updated = PublishedStoryDao::update_status_flags_and_details(
            &mut tx,
            id,
            StoryStatus::Ready,
            false,
            false,
            PendingCounters::default(),
            None,
            Some(to),
        )
        .await?;

        let summary = crate::schema::scene::scene_summary(content);
        ProgressDao::upsert_by_hash(
            &mut tx,
            story.user_id,
            id,
            INITIAL_STATE_HASH,
            summary.as_deref(),
        )
        .await?;

        tx.commit().await.context("failed to commit transaction")?;
        Ok((updated, scene))
    }

    async fn mark_story_error(&self, id: Uuid, details: &str) -> Result<Option<PublishedStory>> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        // The step is preserved for diagnosis; only status and details move.
        let updated =
            PublishedStoryDao::update_status_and_error(&mut tx, id, StoryStatus::Error, Some(details))
                .await?;

        tx.commit().await.context("failed to commit transaction")?;
        Ok(updated)
    }

    async fn find_scene(&self, story_id: Uuid, state_hash: &str) -> Result<Option<StoryScene>> {
        SceneDao::find(&self.pool, story_id, state_hash).await
    }

    async fn get_game_state(&self, id: Uuid) -> Result<Option<PlayerGameState>> {
        GameStateDao::get(&self.pool, id).await
    }

    async fn commit_player_scene(
        &self,
        game_state_id: Uuid,
        state_hash: &str,
        content: &Value,
        outcome: SceneOutcome,
        scene_summary: Option<&str>,
    ) -> Result<(PlayerGameState, StoryScene)> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        let state = GameStateDao::lock(&mut tx, game_state_id)
            .await?
            .ok_or_else(|| anyhow!("player game state {game_state_id} not found"))?;

        if state.player_status != PlayerStatus::GeneratingScene {
            return Err(StaleNotification {
                entity: "player game state",
                id: game_state_id,
                detail: format!(
                    "expected generating_scene, session is {}",
                    state.player_status.as_str()
                ),
            }
            .into());
        }

        let scene =
            SceneDao::upsert(&mut tx, state.published_story_id, state_hash, content).await?;

        let updated = match &outcome {
            SceneOutcome::Playing => {
                GameStateDao::save_resolution(
                    &mut tx,
                    game_state_id,
                    PlayerStatus::Playing,
                    Some(scene.id),
                    None,
                    None,
                    None,
                )
                .await?
            }
            SceneOutcome::GameOver { ending_text } => {
                GameStateDao::save_resolution(
                    &mut tx,
                    game_state_id,
                    PlayerStatus::Completed,
                    Some(scene.id),
                    Some(ending_text.as_str()),
                    Some(Utc::now()),
                    None,
                )
                .await?
            }
        }
        .ok_or_else(|| anyhow!("player game state {game_state_id} vanished mid-transaction"))?;

        ProgressDao::upsert_by_hash(
            &mut tx,
            state.player_id,
            state.published_story_id,
            state_hash,
            scene_summary,
        )
        .await?;

        tx.commit().await.context("failed to commit transaction")?;
        Ok((updated, scene))
    }

    async fn mark_game_state_error(
        &self,
        id: Uuid,
        details: &str,
    ) -> Result<Option<PlayerGameState>> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        let Some(state) = GameStateDao::lock(&mut tx, id).await? else {
            tx.rollback().await.context("failed to roll back transaction")?;
            return Ok(None);
        };

        let updated = GameStateDao::save_resolution(
            &mut tx,
            id,
            PlayerStatus::Error,
            state.current_scene_id,
            state.ending_text.as_deref(),
            state.completed_at,
            Some(details),
        )
        .await?;

        tx.commit().await.context("failed to commit transaction")?;
        Ok(updated)
    }

    async fn get_generation_result(&self, task_id: Uuid) -> Result<Option<GenerationResult>> {
        GenerationResultDao::get_by_task_id(&self.pool, task_id).await
    }

    async fn image_url_by_reference(&self, reference: &str) -> Result<Option<String>> {
        ImageReferenceDao::url_by_reference(&self.pool, reference).await
    }
}
