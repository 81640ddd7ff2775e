//! Image-worker completions: counter decrements for card and character art,
//! step advance for cover art, and the reconciliation that carries a story
//! past the setup step once everything has drained.

use anyhow::{Context, Result, bail};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    CommitOutcome, HandlerContext, classify_commit, dispatch_first_scene_narrative,
    dispatch_image_task_logged, emit_client_update, fail_story, skip_stale, story_update,
};
use crate::bus::types::{
    CARD_REF_PREFIX, CHARACTER_REF_PREFIX, COVER_REF_PREFIX, HISTORY_PREVIEW_REF_PREFIX,
    ImageTaskPayload, RATIO_LANDSCAPE, TaskNotification,
};
use crate::step::GenerationStep;
use crate::store::models::{PublishedStory, SETUP_PREVIEW_KEY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageKind {
    Card,
    Character,
    Cover,
}

fn classify_reference(reference: &str) -> Option<ImageKind> {
    if reference.starts_with(CARD_REF_PREFIX) {
        Some(ImageKind::Card)
    } else if reference.starts_with(CHARACTER_REF_PREFIX) {
        Some(ImageKind::Character)
    } else if reference.starts_with(COVER_REF_PREFIX)
        || reference.starts_with(HISTORY_PREVIEW_REF_PREFIX)
    {
        Some(ImageKind::Cover)
    } else {
        None
    }
}

pub(crate) async fn handle(ctx: &HandlerContext, envelope: &TaskNotification) -> Result<()> {
    let story_id = envelope
        .published_story_id
        .context("image completion without publishedStoryId")?;

    let Some(story) = ctx.dao.get_published_story(story_id).await? else {
        warn!(%story_id, "published story not found, acknowledging");
        return Ok(());
    };

    if envelope.is_worker_error() {
        return fail_story(
            ctx,
            story_id,
            story.user_id,
            &envelope.worker_error_details(),
            true,
        )
        .await;
    }

    let Some(reference) = envelope.image_reference.as_deref() else {
        bail!("image completion for story {story_id} carries no imageReference");
    };
    let Some(kind) = classify_reference(reference) else {
        bail!("image completion for story {story_id} has unroutable reference {reference:?}");
    };

    let was_sub_task_phase = matches!(
        story.generation_step,
        Some(
            GenerationStep::CharacterGeneration
                | GenerationStep::CardImageGeneration
                | GenerationStep::CharacterImageGeneration
        )
    );

    let commit = match kind {
        ImageKind::Card => ctx.dao.decrement_image_counters(story_id, 1, 0).await,
        ImageKind::Character => ctx.dao.decrement_image_counters(story_id, 0, 1).await,
        ImageKind::Cover => ctx.dao.complete_cover_image(story_id).await,
    };
    let updated = match classify_commit(commit)? {
        CommitOutcome::Done(updated) => updated,
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
        reference,
        step = ?updated.generation_step,
        card_pending = updated.pending_card_img_tasks,
        char_pending = updated.pending_char_img_tasks,
        "image completion committed"
    );

    // Clients observe every decrement.
    emit_client_update(ctx, &story_update(story_id, updated.user_id, updated.status)).await;

    let advanced_now =
        (was_sub_task_phase || kind == ImageKind::Cover) && updated.generation_step != story.generation_step;
    if !advanced_now {
        return Ok(());
    }

    match updated.generation_step {
        Some(GenerationStep::CoverImageGeneration) => {
            // Counters drained with setup already merged and no preview image
            // on file.
            if let Some(task) = cover_task(&updated) {
                dispatch_image_task_logged(ctx, &task).await;
            } else {
                warn!(%story_id, "cover step reached without a preview prompt");
            }
        }
        Some(GenerationStep::InitialSceneJson) => {
            dispatch_first_scene_narrative(ctx, &updated).await?;
        }
        // SetupGeneration: the setup task is already in flight; its result
        // advances the story from here.
        _ => {}
    }

    Ok(())
}

/// Cover/preview task for a story whose setup carries a preview prompt.
pub(crate) fn cover_task(story: &PublishedStory) -> Option<ImageTaskPayload> {
    let prompt = story
        .setup
        .get(SETUP_PREVIEW_KEY)
        .and_then(|value| value.as_str())?;

    Some(ImageTaskPayload {
        task_id: Uuid::new_v4(),
        published_story_id: story.id,
        user_id: story.user_id,
        character_id: None,
        character_name: "cover".to_string(),
        image_reference: format!("{HISTORY_PREVIEW_REF_PREFIX}{}", story.id),
        prompt: prompt.to_string(),
        negative_prompt: String::new(),
        ratio: RATIO_LANDSCAPE,
    })
}
