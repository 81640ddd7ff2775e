//! Single entry point for inbound notifications.
//!
//! Decodes the envelope, enforces the target-id contract, and routes on the
//! closed prompt-type enum. A non-error return acknowledges the message; an
//! error dead-letters it.

use anyhow::{Context, Result, bail};
use tracing::{debug, warn};

use super::{
    HandlerContext, character_generation, image_completion, json_generation, moderation,
    narrative, narrator, protagonist_goal, scene_planner, setup,
};
use crate::bus::types::{PromptType, TaskNotification};

pub(crate) struct Router {
    ctx: HandlerContext,
}

impl Router {
    pub(crate) fn new(ctx: HandlerContext) -> Self {
        Self { ctx }
    }

    pub(crate) async fn process(&self, body: &[u8]) -> Result<()> {
        let envelope: TaskNotification =
            serde_json::from_slice(body).context("undecodable notification envelope")?;

        validate_targets(&envelope)?;

        debug!(
            task_id = %envelope.task_id,
            prompt_type = ?envelope.prompt_type,
            status = ?envelope.status,
            "routing notification"
        );

        match envelope.prompt_type {
            PromptType::Narrator => narrator::handle(&self.ctx, &envelope).await,
            PromptType::ContentModeration => moderation::handle(&self.ctx, &envelope).await,
            PromptType::ProtagonistGoal => protagonist_goal::handle(&self.ctx, &envelope).await,
            PromptType::ScenePlanner => scene_planner::handle(&self.ctx, &envelope).await,
            PromptType::CharacterGeneration => {
                character_generation::handle(&self.ctx, &envelope).await
            }
            PromptType::StorySetup => setup::handle(&self.ctx, &envelope).await,
            PromptType::JsonGeneration => json_generation::handle(&self.ctx, &envelope).await,
            PromptType::NovelFirstSceneCreator
            | PromptType::NovelCreator
            | PromptType::NovelGameOverCreator => narrative::handle(&self.ctx, &envelope).await,
            PromptType::ImageGeneration => image_completion::handle(&self.ctx, &envelope).await,
            PromptType::Unknown => {
                warn!(task_id = %envelope.task_id, "unknown prompt type, acknowledging");
                Ok(())
            }
        }
    }
}

/// The envelope must target exactly the entities its prompt type works on;
/// anything else is permanently rejected.
fn validate_targets(envelope: &TaskNotification) -> Result<()> {
    match envelope.prompt_type {
        PromptType::Narrator => {
            if envelope.story_config_id.is_none() {
                bail!("narrator notification requires storyConfigId");
            }
            if envelope.published_story_id.is_some() {
                bail!("narrator notification must not carry publishedStoryId");
            }
        }
        PromptType::NovelCreator | PromptType::NovelGameOverCreator => {
            require_story_only(envelope)?;
            if envelope.game_state_id.is_none() {
                bail!("in-play notification requires gameStateId");
            }
        }
        PromptType::ContentModeration
        | PromptType::ProtagonistGoal
        | PromptType::ScenePlanner
        | PromptType::CharacterGeneration
        | PromptType::StorySetup
        | PromptType::JsonGeneration
        | PromptType::NovelFirstSceneCreator
        | PromptType::ImageGeneration => require_story_only(envelope)?,
        PromptType::Unknown => {}
    }
    Ok(())
}

fn require_story_only(envelope: &TaskNotification) -> Result<()> {
    if envelope.published_story_id.is_none() {
        bail!(
            "{:?} notification requires publishedStoryId",
            envelope.prompt_type
        );
    }
    if envelope.story_config_id.is_some() {
        bail!(
            "{:?} notification must not carry storyConfigId",
            envelope.prompt_type
        );
    }
    Ok(())
}
