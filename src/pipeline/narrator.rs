//! Narrator results: promote a generating draft config to `draft`.

use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::{HandlerContext, WorkerText, resolve_worker_text, skip_stale};
use crate::bus::types::{
    ClientUpdate, ClientUpdateType, PushNotification, TaskNotification,
};
use crate::schema::narrator::{NarratorDraft, merge_into_config};
use crate::store::models::{ConfigStatus, StoryConfig};
use crate::util::json::{extract_json_content, parse_value};
use crate::util::text::string_short;

pub(crate) async fn handle(ctx: &HandlerContext, envelope: &TaskNotification) -> Result<()> {
    let config_id = envelope
        .story_config_id
        .context("narrator notification without storyConfigId")?;

    let Some(config) = ctx.dao.get_story_config(config_id).await? else {
        warn!(%config_id, "story config not found, acknowledging");
        return Ok(());
    };
    if config.status != ConfigStatus::Generating {
        skip_stale(
            ctx,
            "story config",
            config_id,
            &format!("expected generating, found {}", config.status.as_str()),
        );
        return Ok(());
    }

    let text = match resolve_worker_text(ctx, envelope).await? {
        WorkerText::Ok(text) => text,
        WorkerText::Failed(details) => return fail_config(ctx, &config, &details).await,
    };

    let cleaned = extract_json_content(&text);
    let draft_value = match parse_value(&cleaned) {
        Ok(value) => value,
        Err(error) => {
            debug!(payload = %string_short(&cleaned, 200), "narrator output failed to parse");
            return fail_config(ctx, &config, &format!("narrator output is not valid JSON: {error:#}"))
                .await;
        }
    };
    let draft: NarratorDraft = match serde_json::from_value(draft_value.clone()) {
        Ok(draft) => draft,
        Err(error) => {
            return fail_config(
                ctx,
                &config,
                &format!("narrator output does not match the draft shape: {error}"),
            )
            .await;
        }
    };
    if let Err(error) = draft.validate() {
        return fail_config(ctx, &config, &format!("narrator output is incomplete: {error}")).await;
    }

    let merged = merge_into_config(&config.config, &draft_value);
    let promoted = ctx
        .dao
        .promote_config_to_draft(config_id, &draft.t, &draft.sd, &merged)
        .await?;
    if !promoted {
        skip_stale(ctx, "story config", config_id, "promotion raced another update");
        return Ok(());
    }

    debug!(%config_id, title = %draft.t, "draft config promoted");

    super::emit_client_update(
        ctx,
        &ClientUpdate {
            id: config_id,
            user_id: config.user_id,
            update_type: ClientUpdateType::DraftUpdate,
            status: ConfigStatus::Draft.as_str().to_string(),
            title: Some(draft.t.clone()),
            description: Some(draft.sd.clone()),
            scene_id: None,
            state_hash: None,
            ending_text: None,
            error_details: None,
        },
    )
    .await;
    super::emit_push(ctx, &PushNotification::draft_ready(config.user_id, &draft.t)).await;

    Ok(())
}

/// Draft failures notify over the realtime channel only; no push.
async fn fail_config(ctx: &HandlerContext, config: &StoryConfig, details: &str) -> Result<()> {
    let marked = ctx.dao.mark_config_error(config.id, details).await?;
    if !marked {
        skip_stale(ctx, "story config", config.id, "error transition raced another update");
        return Ok(());
    }
    ctx.metrics.record_error_transition();

    super::emit_client_update(
        ctx,
        &ClientUpdate {
            id: config.id,
            user_id: config.user_id,
            update_type: ClientUpdateType::DraftUpdate,
            status: ConfigStatus::Error.as_str().to_string(),
            title: config.title.clone(),
            description: None,
            scene_id: None,
            state_hash: None,
            ending_text: None,
            error_details: Some(details.to_string()),
        },
    )
    .await;
    Ok(())
}
