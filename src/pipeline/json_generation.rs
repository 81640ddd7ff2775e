//! Structured-scene JSON results.
//!
//! Two modes share this handler: the initial scene, which crowns the story
//! Ready in the same transaction as the scene upsert, and in-play scenes,
//! which resolve a player session (back to playing, or completed on game
//! over).

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, warn};

use super::{
    CommitOutcome, HandlerContext, WorkerText, classify_commit, emit_client_update, emit_push,
    fail_game_state, fail_story, resolve_worker_text, skip_stale,
};
use crate::bus::types::{
    ClientUpdate, ClientUpdateType, PushNotification, TaskNotification,
};
use crate::clients::auth::FALLBACK_AUTHOR_NAME;
use crate::schema::scene::{ending_text, is_game_over, scene_summary, validate_scene};
use crate::step::StoryStatus;
use crate::store::dao::SceneOutcome;
use crate::store::models::{INITIAL_STATE_HASH, PlayerStatus};
use crate::util::json::{extract_json_content, parse_value};

pub(crate) async fn handle(ctx: &HandlerContext, envelope: &TaskNotification) -> Result<()> {
    if envelope.game_state_id.is_some() {
        handle_in_play(ctx, envelope).await
    } else {
        handle_initial(ctx, envelope).await
    }
}

async fn handle_initial(ctx: &HandlerContext, envelope: &TaskNotification) -> Result<()> {
    let story_id = envelope
        .published_story_id
        .context("json-generation notification without publishedStoryId")?;

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

    let text = match resolve_worker_text(ctx, envelope).await? {
        WorkerText::Ok(text) => text,
        WorkerText::Failed(details) => {
            return fail_story(ctx, story_id, story.user_id, &details, true).await;
        }
    };

    let content = match decode_scene(&text) {
        Ok(content) => content,
        Err(details) => return fail_story(ctx, story_id, story.user_id, &details, true).await,
    };

    let (updated, scene) = match classify_commit(
        ctx.dao.commit_initial_scene(story_id, &content).await,
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

    debug!(%story_id, scene_id = %scene.id, "story is ready");

    emit_client_update(
        ctx,
        &ClientUpdate {
            id: story_id,
            user_id: updated.user_id,
            update_type: ClientUpdateType::StoryUpdate,
            status: StoryStatus::Ready.as_str().to_string(),
            title: story_title(&updated.config),
            description: None,
            scene_id: Some(scene.id),
            state_hash: Some(INITIAL_STATE_HASH.to_string()),
            ending_text: None,
            error_details: None,
        },
    )
    .await;

    let author = match ctx.auth.display_name(updated.user_id).await {
        Ok(name) => name,
        Err(error) => {
            warn!(user_id = %updated.user_id, error = %error, "author lookup failed, using fallback");
            FALLBACK_AUTHOR_NAME.to_string()
        }
    };
    let title = story_title(&updated.config).unwrap_or_else(|| "Your story".to_string());
    emit_push(
        ctx,
        &PushNotification::story_ready(updated.user_id, &title, &author),
    )
    .await;

    Ok(())
}

async fn handle_in_play(ctx: &HandlerContext, envelope: &TaskNotification) -> Result<()> {
    let game_state_id = envelope
        .game_state_id
        .context("in-play json-generation notification without gameStateId")?;

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

    let Some(state_hash) = envelope.state_hash.clone().filter(|hash| !hash.is_empty()) else {
        return fail_game_state(
            ctx,
            game_state_id,
            game_state.player_id,
            None,
            "in-play json-generation notification carries no stateHash",
        )
        .await;
    };

    let text = match resolve_worker_text(ctx, envelope).await? {
        WorkerText::Ok(text) => text,
        WorkerText::Failed(details) => {
            return fail_game_state(
                ctx,
                game_state_id,
                game_state.player_id,
                Some(&state_hash),
                &details,
            )
            .await;
        }
    };

    let content = match decode_scene(&text) {
        Ok(content) => content,
        Err(details) => {
            return fail_game_state(
                ctx,
                game_state_id,
                game_state.player_id,
                Some(&state_hash),
                &details,
            )
            .await;
        }
    };

    let game_over = is_game_over(&content);
    let outcome = if game_over {
        SceneOutcome::GameOver {
            // Presence was just checked.
            ending_text: ending_text(&content).unwrap_or_default(),
        }
    } else {
        SceneOutcome::Playing
    };
    let summary = scene_summary(&content);

    let (updated, scene) = match classify_commit(
        ctx.dao
            .commit_player_scene(
                game_state_id,
                &state_hash,
                &content,
                outcome,
                summary.as_deref(),
            )
            .await,
    )? {
        CommitOutcome::Done(committed) => committed,
        CommitOutcome::Stale(detail) => {
            skip_stale(ctx, "player game state", game_state_id, &detail);
            return Ok(());
        }
        CommitOutcome::Broken(detail) => {
            return fail_game_state(
                ctx,
                game_state_id,
                game_state.player_id,
                Some(&state_hash),
                &detail,
            )
            .await;
        }
    };

    debug!(
        %game_state_id,
        scene_id = %scene.id,
        status = updated.player_status.as_str(),
        "player scene committed"
    );

    emit_client_update(
        ctx,
        &ClientUpdate {
            id: game_state_id,
            user_id: updated.player_id,
            update_type: ClientUpdateType::GameStateUpdate,
            status: updated.player_status.as_str().to_string(),
            title: None,
            description: None,
            scene_id: Some(scene.id),
            state_hash: Some(state_hash),
            ending_text: updated.ending_text.clone(),
            error_details: None,
        },
    )
    .await;

    if game_over {
        let ending = updated.ending_text.clone().unwrap_or_default();
        emit_push(ctx, &PushNotification::game_over(updated.player_id, &ending)).await;
    }

    Ok(())
}

fn decode_scene(text: &str) -> Result<Value, String> {
    let cleaned = extract_json_content(text);
    let content = parse_value(&cleaned)
        .map_err(|error| format!("scene output is not valid JSON: {error:#}"))?;
    validate_scene(&content).map_err(|error| format!("scene output is invalid: {error}"))?;
    Ok(content)
}

fn story_title(config: &Value) -> Option<String> {
    config
        .get("t")
        .and_then(Value::as_str)
        .map(ToString::to_string)
}
