//! Character-generation results: merge the cast into the initial scene and
//! fan out the per-character image tasks.

use anyhow::{Context, Result};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    CommitOutcome, HandlerContext, WorkerText, classify_commit, dispatch_image_batch_logged,
    dispatch_task_logged, emit_client_update, fail_story, prompts, resolve_worker_text,
    skip_stale, story_update,
};
use crate::bus::types::{
    CHARACTER_REF_PREFIX, GenerationTaskPayload, ImageTaskBatchPayload, ImageTaskPayload,
    PromptType, RATIO_PORTRAIT, TaskNotification,
};
use crate::schema::characters::{GeneratedCharacter, validate_batch};
use crate::step::{GenerationStep, StoryStatus};
use crate::util::json::{decode_strict, extract_json_content};

pub(crate) async fn handle(ctx: &HandlerContext, envelope: &TaskNotification) -> Result<()> {
    let story_id = envelope
        .published_story_id
        .context("character-generation notification without publishedStoryId")?;

    let Some(story) = ctx.dao.get_published_story(story_id).await? else {
        warn!(%story_id, "published story not found, acknowledging");
        return Ok(());
    };
    if story.status != StoryStatus::SubTasksPending
        || story.generation_step != Some(GenerationStep::CharacterGeneration)
    {
        skip_stale(
            ctx,
            "published story",
            story_id,
            &format!(
                "expected sub_tasks_pending/character_generation, found {}/{:?}",
                story.status.as_str(),
                story.generation_step
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

    let batch: Vec<GeneratedCharacter> = match decode_strict(&extract_json_content(&text)) {
        Ok(batch) => batch,
        Err(error) => {
            return fail_story(
                ctx,
                story_id,
                story.user_id,
                &format!("character batch is malformed: {error:#}"),
                true,
            )
            .await;
        }
    };
    if let Err(error) = validate_batch(&batch) {
        return fail_story(
            ctx,
            story_id,
            story.user_id,
            &format!("character batch is incomplete: {error}"),
            true,
        )
        .await;
    }

    let characters =
        serde_json::to_value(&batch).context("failed to re-encode the character batch")?;

    let updated = match classify_commit(
        ctx.dao
            .commit_character_batch(story_id, &characters, batch.len() as i32)
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

    debug!(
        %story_id,
        characters = batch.len(),
        next_step = ?updated.generation_step,
        "character batch committed"
    );

    let tasks: Vec<ImageTaskPayload> = batch
        .iter()
        .map(|character| ImageTaskPayload {
            task_id: Uuid::new_v4(),
            published_story_id: story_id,
            user_id: updated.user_id,
            character_id: Some(character.id.clone()),
            character_name: character.name.clone(),
            image_reference: character_reference(&character.image_reference_name),
            prompt: character.image_prompt_descriptor.clone(),
            negative_prompt: String::new(),
            ratio: RATIO_PORTRAIT,
        })
        .collect();

    dispatch_image_batch_logged(
        ctx,
        &ImageTaskBatchPayload {
            batch_id: Uuid::new_v4(),
            published_story_id: story_id,
            user_id: updated.user_id,
            tasks,
        },
    )
    .await;

    if updated.is_first_scene_pending {
        // First-scene cycle: setup runs in parallel with the character
        // images and is reconciled by the image-completion handler.
        dispatch_task_logged(
            ctx,
            &GenerationTaskPayload {
                task_id: Uuid::new_v4(),
                user_id: updated.user_id,
                prompt_type: PromptType::StorySetup,
                user_input: prompts::setup_input(&updated.config, &characters),
                published_story_id: Some(story_id),
                story_config_id: None,
                state_hash: None,
                game_state_id: None,
                language: updated.language.clone(),
            },
        )
        .await;
    }

    emit_client_update(ctx, &story_update(story_id, updated.user_id, updated.status)).await;
    Ok(())
}

fn character_reference(name: &str) -> String {
    if name.starts_with(CHARACTER_REF_PREFIX) {
        name.to_string()
    } else {
        format!("{CHARACTER_REF_PREFIX}{name}")
    }
}
