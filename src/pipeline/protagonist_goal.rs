//! Protagonist-goal results: merge the goal into the setup blob and kick off
//! scene planning.

use anyhow::{Context, Result};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use super::{
    CommitOutcome, HandlerContext, WorkerText, classify_commit, dispatch_task_logged,
    emit_client_update, fail_story, prompts, resolve_worker_text, skip_stale, story_update,
};
use crate::bus::types::{GenerationTaskPayload, PromptType, TaskNotification};
use crate::schema::ResultEnvelope;
use crate::step::{GenerationStep, StoryStatus};
use crate::util::json::{decode_strict, extract_json_content};

pub(crate) async fn handle(ctx: &HandlerContext, envelope: &TaskNotification) -> Result<()> {
    let story_id = envelope
        .published_story_id
        .context("protagonist-goal notification without publishedStoryId")?;

    let Some(story) = ctx.dao.get_published_story(story_id).await? else {
        warn!(%story_id, "published story not found, acknowledging");
        return Ok(());
    };
    if story.status != StoryStatus::ProtagonistGoalPending {
        skip_stale(
            ctx,
            "published story",
            story_id,
            &format!(
                "expected protagonist_goal_pending, found {}",
                story.status.as_str()
            ),
        );
        return Ok(());
    }

    let text = match resolve_worker_text(ctx, envelope).await? {
        WorkerText::Ok(text) => text,
        WorkerText::Failed(details) => {
            return fail_story(ctx, story_id, story.user_id, &details, true).await;
        }
    };

    let goal = match decode_strict::<ResultEnvelope>(&extract_json_content(&text)) {
        Ok(envelope) => envelope.result.trim().to_string(),
        Err(error) => {
            return fail_story(
                ctx,
                story_id,
                story.user_id,
                &format!("protagonist-goal output is malformed: {error:#}"),
                true,
            )
            .await;
        }
    };
    if goal.is_empty() {
        return fail_story(
            ctx,
            story_id,
            story.user_id,
            "protagonist-goal output is empty",
            true,
        )
        .await;
    }

    let updated = match classify_commit(
        ctx.dao
            .merge_setup_and_advance(
                story_id,
                GenerationStep::ProtagonistGoal,
                &json!({"protagonist_goal": goal}),
                GenerationStep::ScenePlanner,
            )
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
            prompt_type: PromptType::ScenePlanner,
            user_input: prompts::scene_planner_input(
                &updated.config,
                updated.is_adult_content,
                &goal,
            ),
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
