//! Setup results: merge the preview prompt, pin the first-scene narrative,
//! and decide between cover generation and initial-scene JSON.
//!
//! The setup task runs in parallel with the image sub-tasks, so its result
//! may arrive while images are still draining; in that case the merge is
//! recorded and the final image completion performs the advance.

use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::{
    CommitOutcome, HandlerContext, WorkerText, classify_commit, dispatch_first_scene_narrative,
    dispatch_image_task_logged, emit_client_update, emit_push, fail_story,
    image_completion::cover_task, resolve_worker_text, skip_stale, story_update,
};
use crate::bus::types::{PushNotification, TaskNotification};
use crate::schema::setup::SetupOutcome;
use crate::step::{GenerationStep, StoryStatus};
use crate::util::json::{decode_strict, extract_json_content};

pub(crate) async fn handle(ctx: &HandlerContext, envelope: &TaskNotification) -> Result<()> {
    let story_id = envelope
        .published_story_id
        .context("setup notification without publishedStoryId")?;

    let Some(story) = ctx.dao.get_published_story(story_id).await? else {
        warn!(%story_id, "published story not found, acknowledging");
        return Ok(());
    };
    // The setup task goes out together with (or after) the character batch,
    // so its result can only land at the setup step itself or while card or
    // character images are still draining.
    let acceptable = matches!(
        story.status,
        StoryStatus::SetupPending | StoryStatus::ImageGenerationPending
    ) && story.generation_step != Some(GenerationStep::CoverImageGeneration);
    if !acceptable {
        skip_stale(
            ctx,
            "published story",
            story_id,
            &format!("setup result cannot apply at {}", story.status.as_str()),
        );
        return Ok(());
    }

    let text = match resolve_worker_text(ctx, envelope).await? {
        WorkerText::Ok(text) => text,
        WorkerText::Failed(details) => {
            return fail_story(ctx, story_id, story.user_id, &details, true).await;
        }
    };

    let outcome: SetupOutcome = match decode_strict(&extract_json_content(&text)) {
        Ok(outcome) => outcome,
        Err(error) => {
            return fail_story(
                ctx,
                story_id,
                story.user_id,
                &format!("setup output is malformed: {error:#}"),
                true,
            )
            .await;
        }
    };
    if let Err(error) = outcome.validate() {
        return fail_story(
            ctx,
            story_id,
            story.user_id,
            &format!("setup output is incomplete: {error}"),
            true,
        )
        .await;
    }

    let (updated, _scene) = match classify_commit(
        ctx.dao
            .commit_setup(story_id, outcome.preview_prompt(), &outcome.res)
            .await,
    )? {
        CommitOutcome::Done(committed) => committed,
        CommitOutcome::Stale(detail) => {
            skip_stale(ctx, "published story", story_id, &detail);
            return Ok(());
        }
        CommitOutcome::Broken(detail) => {
            return fail_story(ctx, story_id, story.user_id, &detail, true).await;
        }
    };

    debug!(
        %story_id,
        step = ?updated.generation_step,
        "setup result committed"
    );

    match updated.generation_step {
        Some(GenerationStep::CoverImageGeneration) => {
            if let Some(task) = cover_task(&updated) {
                dispatch_image_task_logged(ctx, &task).await;
            } else {
                warn!(%story_id, "cover step reached without a preview prompt");
            }
        }
        Some(GenerationStep::InitialSceneJson) => {
            dispatch_first_scene_narrative(ctx, &updated).await?;
        }
        // Images still draining: the final image completion advances.
        _ => {}
    }

    emit_client_update(ctx, &story_update(story_id, updated.user_id, updated.status)).await;
    emit_push(
        ctx,
        &PushNotification::setup_pending(updated.user_id, story_id),
    )
    .await;

    Ok(())
}
