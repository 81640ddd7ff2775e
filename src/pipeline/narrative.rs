//! Scene and game-over narrative results (pre-JSON).
//!
//! The narrative text itself is not persisted; it becomes the input of the
//! structured JSON-generation task for the same state hash. Per contract, a
//! dispatch failure here is an entity error rather than a logged gap: a
//! session stuck in generating_scene with no JSON task in flight would never
//! recover.

use anyhow::{Context, Result};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    HandlerContext, WorkerText, fail_game_state, fail_story, prompts, resolve_worker_text,
    skip_stale,
};
use crate::bus::types::{GenerationTaskPayload, PromptType, TaskNotification};
use crate::schema::ResultEnvelope;
use crate::step::StoryStatus;
use crate::store::models::{INITIAL_STATE_HASH, PlayerStatus};
use crate::util::json::{decode_strict, extract_json_content};

pub(crate) async fn handle(ctx: &HandlerContext, envelope: &TaskNotification) -> Result<()> {
    let story_id = envelope
        .published_story_id
        .context("narrative notification without publishedStoryId")?;

    // Verify the target before doing any work; which entity fails on error
    // depends on whether a session is attached.
    if let Some(game_state_id) = envelope.game_state_id {
        let Some(game_state) = ctx.dao.get_game_state(game_state_id).await? else {
            warn!(%game_state_id, "player game state not found, acknowledging");
            return Ok(());
        };
        if game_state.player_status != PlayerStatus::GeneratingScene {
            skip_stale(
                ctx,
                "player game state",
                game_state_id,
                &format!(
                    "expected generating_scene, found {}",
                    game_state.player_status.as_str()
                ),
            );
            return Ok(());
        }
    } else {
        let Some(story) = ctx.dao.get_published_story(story_id).await? else {
            warn!(%story_id, "published story not found, acknowledging");
            return Ok(());
        };
        if story.status != StoryStatus::JsonGenerationPending {
            skip_stale(
                ctx,
                "published story",
                story_id,
                &format!(
                    "expected json_generation_pending, found {}",
                    story.status.as_str()
                ),
            );
            return Ok(());
        }
    }

    let text = match resolve_worker_text(ctx, envelope).await? {
        WorkerText::Ok(text) => text,
        WorkerText::Failed(details) => return fail_target(ctx, envelope, &details).await,
    };

    let narrative = match decode_strict::<ResultEnvelope>(&extract_json_content(&text)) {
        Ok(result) => result.result.trim().to_string(),
        Err(error) => {
            return fail_target(
                ctx,
                envelope,
                &format!("narrative output is malformed: {error:#}"),
            )
            .await;
        }
    };
    if narrative.is_empty() {
        return fail_target(ctx, envelope, "narrative output is empty").await;
    }

    let state_hash = envelope
        .state_hash
        .clone()
        .filter(|hash| !hash.is_empty())
        .unwrap_or_else(|| INITIAL_STATE_HASH.to_string());

    let task = GenerationTaskPayload {
        task_id: Uuid::new_v4(),
        user_id: envelope.user_id,
        prompt_type: PromptType::JsonGeneration,
        user_input: prompts::scene_json_input(&narrative),
        published_story_id: Some(story_id),
        story_config_id: None,
        state_hash: Some(state_hash),
        game_state_id: envelope.game_state_id,
        language: ctx.language_for(envelope),
    };

    if let Err(error) = ctx.tasks.publish_generation_task(&task).await {
        ctx.metrics.record_publish_failure();
        return fail_target(
            ctx,
            envelope,
            &format!("failed to dispatch json-generation task: {error:#}"),
        )
        .await;
    }

    debug!(
        %story_id,
        game_state_id = ?envelope.game_state_id,
        prompt_type = ?envelope.prompt_type,
        "narrative forwarded to json generation"
    );
    Ok(())
}

/// Prefer the player session when one is attached, otherwise the story.
async fn fail_target(
    ctx: &HandlerContext,
    envelope: &TaskNotification,
    details: &str,
) -> Result<()> {
    if let Some(game_state_id) = envelope.game_state_id {
        return fail_game_state(
            ctx,
            game_state_id,
            envelope.user_id,
            envelope.state_hash.as_deref(),
            details,
        )
        .await;
    }

    let story_id = envelope
        .published_story_id
        .context("narrative notification without publishedStoryId")?;
    fail_story(ctx, story_id, envelope.user_id, details, true).await
}
