//! Scene-planner results: seed the initial scene and fan out the parallel
//! sub-tasks (batched character generation plus one image task per card).

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    CommitOutcome, HandlerContext, WorkerText, classify_commit, dispatch_image_task_logged,
    dispatch_task_logged, emit_client_update, fail_story, prompts, resolve_worker_text,
    skip_stale, story_update,
};
use crate::bus::types::{
    CARD_REF_PREFIX, GenerationTaskPayload, ImageTaskPayload, PromptType, RATIO_PORTRAIT,
    TaskNotification,
};
use crate::schema::planner::PlannerOutcome;
use crate::step::StoryStatus;
use crate::store::models::{SCENE_CHARACTERS_KEY, SCENE_FOCUS_KEY};
use crate::util::json::{decode_strict, extract_json_content};

pub(crate) async fn handle(ctx: &HandlerContext, envelope: &TaskNotification) -> Result<()> {
    let story_id = envelope
        .published_story_id
        .context("scene-planner notification without publishedStoryId")?;

    let Some(story) = ctx.dao.get_published_story(story_id).await? else {
        warn!(%story_id, "published story not found, acknowledging");
        return Ok(());
    };
    if story.status != StoryStatus::ScenePlannerPending {
        skip_stale(
            ctx,
            "published story",
            story_id,
            &format!(
                "expected scene_planner_pending, found {}",
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

    let outcome: PlannerOutcome = match decode_strict(&extract_json_content(&text)) {
        Ok(outcome) => outcome,
        Err(error) => {
            return fail_story(
                ctx,
                story_id,
                story.user_id,
                &format!("scene-planner output is malformed: {error:#}"),
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
            &format!("scene-planner output is incomplete: {error}"),
            true,
        )
        .await;
    }

    let scene_content = json!({
        SCENE_FOCUS_KEY: outcome.scene_focus,
        "cards": outcome.new_card_suggestions,
        SCENE_CHARACTERS_KEY: [],
    });
    let pending_char_gen = i32::from(!outcome.new_character_suggestions.is_empty());
    let pending_card_img = outcome.new_card_suggestions.len() as i32;

    let updated = match classify_commit(
        ctx.dao
            .commit_scene_plan(story_id, &scene_content, pending_char_gen, pending_card_img)
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
        characters = outcome.new_character_suggestions.len(),
        cards = outcome.new_card_suggestions.len(),
        next_step = ?updated.generation_step,
        "scene plan committed"
    );

    if outcome.new_character_suggestions.is_empty() {
        // No cast to generate: the setup task goes out now, with an empty
        // character list.
        dispatch_task_logged(
            ctx,
            &GenerationTaskPayload {
                task_id: Uuid::new_v4(),
                user_id: updated.user_id,
                prompt_type: PromptType::StorySetup,
                user_input: prompts::setup_input(&updated.config, &json!([])),
                published_story_id: Some(story_id),
                story_config_id: None,
                state_hash: None,
                game_state_id: None,
                language: updated.language.clone(),
            },
        )
        .await;
    } else {
        dispatch_task_logged(
            ctx,
            &GenerationTaskPayload {
                task_id: Uuid::new_v4(),
                user_id: updated.user_id,
                prompt_type: PromptType::CharacterGeneration,
                user_input: prompts::character_generation_input(
                    &updated.config,
                    &outcome.new_character_suggestions,
                ),
                published_story_id: Some(story_id),
                story_config_id: None,
                state_hash: None,
                game_state_id: None,
                language: updated.language.clone(),
            },
        )
        .await;
    }

    for card in &outcome.new_card_suggestions {
        dispatch_image_task_logged(
            ctx,
            &ImageTaskPayload {
                task_id: Uuid::new_v4(),
                published_story_id: story_id,
                user_id: updated.user_id,
                character_id: None,
                character_name: card.title.clone(),
                image_reference: card_reference(&card.image_reference_name),
                prompt: card.image_prompt_descriptor.clone(),
                negative_prompt: String::new(),
                ratio: RATIO_PORTRAIT,
            },
        )
        .await;
    }

    emit_client_update(ctx, &story_update(story_id, updated.user_id, updated.status)).await;
    Ok(())
}

fn card_reference(name: &str) -> String {
    if name.starts_with(CARD_REF_PREFIX) {
        name.to_string()
    } else {
        format!("{CARD_REF_PREFIX}{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_reference_is_prefixed_exactly_once() {
        assert_eq!(card_reference("card_harbor_pass"), "card_harbor_pass");
        assert_eq!(card_reference("harbor_pass"), "card_harbor_pass");
    }
}
