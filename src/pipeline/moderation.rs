//! Content-moderation results: record the adult flag and hand the story to
//! the protagonist-goal stage.

use anyhow::{Context, Result};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    CommitOutcome, HandlerContext, WorkerText, classify_commit, dispatch_task_logged,
    emit_client_update, fail_story, prompts, resolve_worker_text, skip_stale, story_update,
};
use crate::bus::types::{GenerationTaskPayload, PromptType, TaskNotification};
use crate::schema::moderation::ModerationVerdict;
use crate::step::StoryStatus;
use crate::util::json::{decode_strict, extract_json_content};

pub(crate) async fn handle(ctx: &HandlerContext, envelope: &TaskNotification) -> Result<()> {
    let story_id = envelope
        .published_story_id
        .context("moderation notification without publishedStoryId")?;

    let Some(story) = ctx.dao.get_published_story(story_id).await? else {
        warn!(%story_id, "published story not found, acknowledging");
        return Ok(());
    };
    if story.status != StoryStatus::ModerationPending {
        skip_stale(
            ctx,
            "published story",
            story_id,
            &format!("expected moderation_pending, found {}", story.status.as_str()),
        );
        return Ok(());
    }

    let text = match resolve_worker_text(ctx, envelope).await? {
        WorkerText::Ok(text) => text,
        WorkerText::Failed(details) => {
            return fail_story(ctx, story_id, story.user_id, &details, true).await;
        }
    };

    let verdict: ModerationVerdict = match decode_strict(&extract_json_content(&text)) {
        Ok(verdict) => verdict,
        Err(error) => {
            return fail_story(
                ctx,
                story_id,
                story.user_id,
                &format!("moderation output is malformed: {error:#}"),
                true,
            )
            .await;
        }
    };

    if let Some(reasons) = &verdict.reasons {
        debug!(%story_id, ?reasons, "moderation verdict carries reasons");
    }

    let updated = match classify_commit(
        ctx.dao
            .update_after_moderation(story_id, verdict.is_adult())
            .await,
    )? {
        CommitOutcome::Done(updated) => updated,
        CommitOutcome::Stale(detail) => {
            skip_stale(ctx, "published story", story_id, &detail);
            return Ok(());
        }
        CommitOutcome::Broken(detail) => {
            return fail_story(ctx, story_id, story.user_id, &detail, true).await;
        }
    };

    dispatch_task_logged(
        ctx,
        &GenerationTaskPayload {
            task_id: Uuid::new_v4(),
            user_id: updated.user_id,
            prompt_type: PromptType::ProtagonistGoal,
            user_input: prompts::protagonist_goal_input(&updated.config, updated.is_adult_content),
            published_story_id: Some(story_id),
            story_config_id: None,
            state_hash: None,
            game_state_id: None,
            language: updated.language.clone(),
        },
    )
    .await;

    emit_client_update(ctx, &story_update(story_id, updated.user_id, updated.status)).await;
    Ok(())
}
