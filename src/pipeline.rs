//! Per-step notification handlers and the dispatch router.
//!
//! Every handler follows the same six-phase skeleton: check preconditions,
//! fetch the worker result, extract and validate, commit the state change
//! through a single DAO call, dispatch follow-on tasks, and notify clients.
//! Post-commit publishes never roll anything back; failures are logged loudly
//! and counted for the operator.

pub(crate) mod character_generation;
pub(crate) mod image_completion;
pub(crate) mod json_generation;
pub(crate) mod moderation;
pub(crate) mod narrative;
pub(crate) mod narrator;
pub(crate) mod prompts;
pub(crate) mod protagonist_goal;
pub(crate) mod router;
pub(crate) mod scene_planner;
pub(crate) mod setup;


use std::sync::Arc;

use anyhow::Result;
use tracing::{error, warn};
use uuid::Uuid;

use crate::bus::publisher::{TaskPublisher, UpdatePublisher};
use crate::bus::types::{
    ClientUpdate, ClientUpdateType, GenerationTaskPayload, PushNotification, TaskNotification,
};
use crate::clients::AuthorLookup;
use crate::observability::metrics::Metrics;
use crate::step::StoryStatus;
use crate::store::dao::OrchestratorDao;

/// Shared dependencies for every handler.
pub(crate) struct HandlerContext {
    pub(crate) dao: Arc<dyn OrchestratorDao>,
    pub(crate) tasks: Arc<dyn TaskPublisher>,
    pub(crate) updates: Arc<dyn UpdatePublisher>,
    pub(crate) auth: Arc<dyn AuthorLookup>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) default_language: String,
}

impl HandlerContext {
    pub(crate) fn language_for(&self, envelope: &TaskNotification) -> String {
        envelope
            .language
            .clone()
            .filter(|language| !language.is_empty())
            .unwrap_or_else(|| self.default_language.clone())
    }
}

/// Worker output after fetching and error inspection.
pub(crate) enum WorkerText {
    Ok(String),
    Failed(String),
}

/// Resolve the generated text for a notification: inline when the envelope
/// carries it, otherwise from the persisted generation result. Worker-side
/// errors become `Failed`.
pub(crate) async fn resolve_worker_text(
    ctx: &HandlerContext,
    envelope: &TaskNotification,
) -> Result<WorkerText> {
    if envelope.is_worker_error() {
        return Ok(WorkerText::Failed(envelope.worker_error_details()));
    }

    if let Some(text) = &envelope.generated_text {
        if !text.is_empty() {
            return Ok(WorkerText::Ok(text.clone()));
        }
    }

    let Some(result) = ctx.dao.get_generation_result(envelope.task_id).await? else {
        return Ok(WorkerText::Failed(format!(
            "generation result for task {} is missing",
            envelope.task_id
        )));
    };

    if let Some(details) = result.worker_error() {
        return Ok(WorkerText::Failed(details.to_string()));
    }
    if result.generated_text.is_empty() {
        return Ok(WorkerText::Failed(format!(
            "generation result for task {} is empty",
            envelope.task_id
        )));
    }
    Ok(WorkerText::Ok(result.generated_text))
}

/// Move a published story to its error state and notify the owner.
pub(crate) async fn fail_story(
    ctx: &HandlerContext,
    story_id: Uuid,
    user_id: Uuid,
    details: &str,
    push: bool,
) -> Result<()> {
    error!(%story_id, details, "moving published story to error state");

    let updated = ctx.dao.mark_story_error(story_id, details).await?;
    if updated.is_none() {
        warn!(%story_id, "story to fail no longer exists");
        return Ok(());
    }
    ctx.metrics.record_error_transition();

    let update = ClientUpdate {
        id: story_id,
        user_id,
        update_type: ClientUpdateType::StoryUpdate,
        status: StoryStatus::Error.as_str().to_string(),
        title: None,
        description: None,
        scene_id: None,
        state_hash: None,
        ending_text: None,
        error_details: Some(details.to_string()),
    };
    emit_client_update(ctx, &update).await;

    if push {
        emit_push(ctx, &PushNotification::story_error(user_id, story_id)).await;
    }
    Ok(())
}

/// Move a player session to its error state and notify the player.
pub(crate) async fn fail_game_state(
    ctx: &HandlerContext,
    game_state_id: Uuid,
    user_id: Uuid,
    state_hash: Option<&str>,
    details: &str,
) -> Result<()> {
    error!(%game_state_id, details, "moving player game state to error state");

    let updated = ctx.dao.mark_game_state_error(game_state_id, details).await?;
    if updated.is_none() {
        warn!(%game_state_id, "game state to fail no longer exists");
        return Ok(());
    }
    ctx.metrics.record_error_transition();

    let update = ClientUpdate {
        id: game_state_id,
        user_id,
        update_type: ClientUpdateType::GameStateUpdate,
        status: crate::store::models::PlayerStatus::Error.as_str().to_string(),
        title: None,
        description: None,
        scene_id: None,
        state_hash: state_hash.map(ToString::to_string),
        ending_text: None,
        error_details: Some(details.to_string()),
    };
    emit_client_update(ctx, &update).await;
    Ok(())
}

/// Post-commit client update; publish failure is logged, never propagated.
pub(crate) async fn emit_client_update(ctx: &HandlerContext, update: &ClientUpdate) {
    if let Err(error) = ctx.updates.publish_client_update(update).await {
        ctx.metrics.record_publish_failure();
        error!(
            id = %update.id,
            update_type = ?update.update_type,
            error = %error,
            "failed to publish client update"
        );
    }
}

/// Post-commit push notification; publish failure is logged, never
/// propagated.
pub(crate) async fn emit_push(ctx: &HandlerContext, push: &PushNotification) {
    if let Err(error) = ctx.updates.publish_push_notification(push).await {
        ctx.metrics.record_publish_failure();
        error!(
            user_id = %push.user_id,
            loc_key = %push.loc_key,
            error = %error,
            "failed to publish push notification"
        );
    }
}

/// Post-commit task dispatch; a failure here leaves the story committed but
/// without its next task, which only an operator can repair. Log accordingly.
pub(crate) async fn dispatch_task_logged(ctx: &HandlerContext, task: &GenerationTaskPayload) {
    if let Err(error) = ctx.tasks.publish_generation_task(task).await {
        ctx.metrics.record_publish_failure();
        error!(
            task_id = %task.task_id,
            prompt_type = ?task.prompt_type,
            published_story_id = ?task.published_story_id,
            error = %error,
            "failed to dispatch follow-on generation task; pipeline requires operator requeue"
        );
    }
}

/// Post-commit single image task; same logging policy as
/// [`dispatch_task_logged`].
pub(crate) async fn dispatch_image_task_logged(
    ctx: &HandlerContext,
    task: &crate::bus::types::ImageTaskPayload,
) {
    if let Err(error) = ctx.tasks.publish_image_task(task).await {
        ctx.metrics.record_publish_failure();
        error!(
            task_id = %task.task_id,
            image_reference = %task.image_reference,
            error = %error,
            "failed to dispatch image task; pipeline requires operator requeue"
        );
    }
}

/// Post-commit image batch; same logging policy as [`dispatch_task_logged`].
pub(crate) async fn dispatch_image_batch_logged(
    ctx: &HandlerContext,
    batch: &crate::bus::types::ImageTaskBatchPayload,
) {
    if let Err(error) = ctx.tasks.publish_image_task_batch(batch).await {
        ctx.metrics.record_publish_failure();
        error!(
            batch_id = %batch.batch_id,
            tasks = batch.tasks.len(),
            error = %error,
            "failed to dispatch image task batch; pipeline requires operator requeue"
        );
    }
}

/// Dispatch the first-scene narrative task for a story that just reached the
/// initial-scene JSON step. The narrative output feeds JSON generation.
pub(crate) async fn dispatch_first_scene_narrative(
    ctx: &HandlerContext,
    story: &crate::store::models::PublishedStory,
) -> Result<()> {
    let focus = ctx
        .dao
        .find_scene(story.id, crate::store::models::INITIAL_STATE_HASH)
        .await?
        .and_then(|scene| {
            scene
                .content
                .get(crate::store::models::SCENE_FOCUS_KEY)
                .and_then(|value| value.as_str().map(ToString::to_string))
        })
        .unwrap_or_default();

    dispatch_task_logged(
        ctx,
        &GenerationTaskPayload {
            task_id: Uuid::new_v4(),
            user_id: story.user_id,
            prompt_type: crate::bus::types::PromptType::NovelFirstSceneCreator,
            user_input: prompts::first_scene_input(&story.config, &story.setup, &focus),
            published_story_id: Some(story.id),
            story_config_id: None,
            state_hash: Some(crate::store::models::INITIAL_STATE_HASH.to_string()),
            game_state_id: None,
            language: story.language.clone(),
        },
    )
    .await;
    Ok(())
}

/// Outcome of a DAO commit after error classification.
pub(crate) enum CommitOutcome<T> {
    Done(T),
    /// Precondition raced: acknowledge without side effects.
    Stale(String),
    /// Invariant breach: the caller fails the target entity.
    Broken(String),
}

/// Split DAO errors into stale skips, invariant breaches, and genuine
/// infrastructure failures (which propagate and NACK the message).
pub(crate) fn classify_commit<T>(result: Result<T>) -> Result<CommitOutcome<T>> {
    match result {
        Ok(value) => Ok(CommitOutcome::Done(value)),
        Err(error) if crate::util::error::is_stale(&error) => {
            Ok(CommitOutcome::Stale(format!("{error:#}")))
        }
        Err(error) if crate::util::error::is_invariant_violation(&error) => {
            Ok(CommitOutcome::Broken(format!("{error:#}")))
        }
        Err(error) => Err(error),
    }
}

/// Record and log a stale skip.
pub(crate) fn skip_stale(ctx: &HandlerContext, entity: &'static str, id: Uuid, detail: &str) {
    ctx.metrics.record_stale_skip();
    warn!(entity, %id, detail, "stale notification, acknowledging");
}

/// Shorthand for a story-status client update.
pub(crate) fn story_update(story_id: Uuid, user_id: Uuid, status: StoryStatus) -> ClientUpdate {
    ClientUpdate {
        id: story_id,
        user_id,
        update_type: ClientUpdateType::StoryUpdate,
        status: status.as_str().to_string(),
        title: None,
        description: None,
        scene_id: None,
        state_hash: None,
        ending_text: None,
        error_details: None,
    }
}
