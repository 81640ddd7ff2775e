//! Data-access abstraction for the orchestrator.
//!
//! Every multi-row commit a handler performs is a single method here: the
//! implementation begins a transaction, takes a row lock on the story or
//! session, re-verifies the expected pipeline position, applies all writes,
//! and commits. A failed precondition surfaces as a typed stale error so the
//! caller can acknowledge the notification instead of dead-lettering it.
//! Handlers therefore never hold a transaction across a publisher call.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::step::GenerationStep;
use crate::store::models::{
    GenerationResult, PlayerGameState, PublishedStory, StoryConfig, StoryScene,
};

/// How an in-play scene commit resolves the player session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SceneOutcome {
    Playing,
    GameOver { ending_text: String },
}

#[async_trait]
pub(crate) trait OrchestratorDao: Send + Sync {
    // Draft configs
    async fn get_story_config(&self, id: Uuid) -> Result<Option<StoryConfig>>;

    /// Guarded promotion from `generating` to `draft`. Returns `false` when
    /// the config was not in `generating` (stale notification).
    async fn promote_config_to_draft(
        &self,
        id: Uuid,
        title: &str,
        description: &str,
        config: &Value,
    ) -> Result<bool>;

    /// Guarded error transition; `false` when the config already left
    /// `generating`.
    async fn mark_config_error(&self, id: Uuid, details: &str) -> Result<bool>;

    // Published stories
    async fn get_published_story(&self, id: Uuid) -> Result<Option<PublishedStory>>;

    /// Moderation verdict: set the adult flag and advance to the
    /// protagonist-goal step.
    async fn update_after_moderation(&self, id: Uuid, is_adult: bool) -> Result<PublishedStory>;

    /// Merge a patch into the setup blob and advance `expected -> to`.
    async fn merge_setup_and_advance(
        &self,
        id: Uuid,
        expected: GenerationStep,
        setup_patch: &Value,
        to: GenerationStep,
    ) -> Result<PublishedStory>;

    /// Planner outcome: seed the initial scene and the sub-task counters in
    /// one transaction under the locked story row.
    async fn commit_scene_plan(
        &self,
        id: Uuid,
        scene_content: &Value,
        pending_char_gen: i32,
        pending_card_img: i32,
    ) -> Result<PublishedStory>;

    /// Character batch: merge the cast into the initial scene, zero the
    /// char-gen counter, add the per-character image tasks.
    async fn commit_character_batch(
        &self,
        id: Uuid,
        characters: &Value,
        char_image_count: i32,
    ) -> Result<PublishedStory>;

    /// Image completion: clamped decrement plus step/flag recomputation.
    async fn decrement_image_counters(
        &self,
        id: Uuid,
        dec_card_img: i32,
        dec_char_img: i32,
    ) -> Result<PublishedStory>;

    /// Cover/preview image completion: advance to initial-scene JSON.
    async fn complete_cover_image(&self, id: Uuid) -> Result<PublishedStory>;

    /// Setup outcome: merge the preview prompt, set the first-scene focus,
    /// and either advance (cover image or JSON generation) or, when images
    /// are still draining, record the merge and keep the current step.
    async fn commit_setup(
        &self,
        id: Uuid,
        preview_prompt: Option<&str>,
        scene_focus: &str,
    ) -> Result<(PublishedStory, StoryScene)>;

    /// Initial structured scene: upsert the scene and crown the story Ready
    /// in the same transaction; the owner's progress row is upserted too.
    async fn commit_initial_scene(
        &self,
        id: Uuid,
        content: &Value,
    ) -> Result<(PublishedStory, StoryScene)>;

    async fn mark_story_error(&self, id: Uuid, details: &str) -> Result<Option<PublishedStory>>;

    // Scenes
    async fn find_scene(&self, story_id: Uuid, state_hash: &str) -> Result<Option<StoryScene>>;

    // Player sessions
    async fn get_game_state(&self, id: Uuid) -> Result<Option<PlayerGameState>>;

    /// In-play structured scene: upsert the scene, resolve the session
    /// (playing or completed), and update the player's progress memo.
    async fn commit_player_scene(
        &self,
        game_state_id: Uuid,
        state_hash: &str,
        content: &Value,
        outcome: SceneOutcome,
        scene_summary: Option<&str>,
    ) -> Result<(PlayerGameState, StoryScene)>;

    async fn mark_game_state_error(
        &self,
        id: Uuid,
        details: &str,
    ) -> Result<Option<PlayerGameState>>;

    // Worker artifacts
    async fn get_generation_result(&self, task_id: Uuid) -> Result<Option<GenerationResult>>;

    #[allow(dead_code)]
    async fn image_url_by_reference(&self, reference: &str) -> Result<Option<String>>;
}
