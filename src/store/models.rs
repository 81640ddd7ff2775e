use chrono::{DateTime, Utc};
use serde_json::Value;
use std::str::FromStr;
use uuid::Uuid;

use crate::step::{GenerationStep, PendingCounters, StoryStatus, UnknownVariant};

/// Content-addressed key of the very first scene of every story. Shared
/// sentinel with the worker fleet and the client API; must never change.
pub(crate) const INITIAL_STATE_HASH: &str = "initial";

/// Setup-blob key for the preview-image prompt.
pub(crate) const SETUP_PREVIEW_KEY: &str = "spi";

/// Setup-blob marker recording that the setup result has been merged. Image
/// completions consult it to decide whether the story still needs to wait in
/// the setup step once the counters drain.
pub(crate) const SETUP_DONE_KEY: &str = "setup_done";

/// Scene-content key holding the narrative focus.
pub(crate) const SCENE_FOCUS_KEY: &str = "sceneFocus";

/// Scene-content key holding the generated cast.
pub(crate) const SCENE_CHARACTERS_KEY: &str = "characters";

/// Shallow-merge a patch object into a setup blob.
pub(crate) fn merge_setup(setup: &Value, patch: &Value) -> Value {
    let mut merged = setup.as_object().cloned().unwrap_or_default();
    if let Some(fields) = patch.as_object() {
        for (key, value) in fields {
            merged.insert(key.clone(), value.clone());
        }
    }
    Value::Object(merged)
}

/// Apply the setup outcome to a setup blob: store or remove the preview
/// prompt and mark the merge done.
pub(crate) fn setup_with_preview(setup: &Value, preview_prompt: Option<&str>) -> Value {
    let mut merged = setup.as_object().cloned().unwrap_or_default();
    match preview_prompt {
        Some(prompt) => {
            merged.insert(SETUP_PREVIEW_KEY.to_string(), Value::String(prompt.to_string()));
        }
        None => {
            merged.remove(SETUP_PREVIEW_KEY);
        }
    }
    merged.insert(SETUP_DONE_KEY.to_string(), Value::Bool(true));
    Value::Object(merged)
}

pub(crate) fn setup_marked_done(setup: &Value) -> bool {
    setup
        .get(SETUP_DONE_KEY)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Set the narrative focus on a scene content blob, creating the skeleton
/// when no scene content exists yet.
pub(crate) fn scene_with_focus(content: Option<&Value>, focus: &str) -> Value {
    let mut object = content
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    object.insert(SCENE_FOCUS_KEY.to_string(), Value::String(focus.to_string()));
    object
        .entry("cards".to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    object
        .entry(SCENE_CHARACTERS_KEY.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    Value::Object(object)
}

/// Replace the cast on a scene content blob.
pub(crate) fn scene_with_characters(content: &Value, characters: &Value) -> Value {
    let mut object = content.as_object().cloned().unwrap_or_default();
    object.insert(SCENE_CHARACTERS_KEY.to_string(), characters.clone());
    Value::Object(object)
}

/// A user-authored draft under narrator generation.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub(crate) struct StoryConfig {
    pub(crate) id: Uuid,
    pub(crate) user_id: Uuid,
    pub(crate) status: ConfigStatus,
    pub(crate) title: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) config: Value,
    pub(crate) error_details: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConfigStatus {
    Generating,
    Draft,
    Error,
}

impl ConfigStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Generating => "generating",
            Self::Draft => "draft",
            Self::Error => "error",
        }
    }
}

impl FromStr for ConfigStatus {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "generating" => Ok(Self::Generating),
            "draft" => Ok(Self::Draft),
            "error" => Ok(Self::Error),
            other => Err(UnknownVariant {
                kind: "config status",
                value: other.to_string(),
            }),
        }
    }
}

/// A draft promoted to a playable story under pipeline generation.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub(crate) struct PublishedStory {
    pub(crate) id: Uuid,
    pub(crate) user_id: Uuid,
    pub(crate) config: Value,
    /// Growing JSON blob; successive stages merge their outputs here.
    pub(crate) setup: Value,
    pub(crate) status: StoryStatus,
    pub(crate) generation_step: Option<GenerationStep>,
    pub(crate) is_first_scene_pending: bool,
    pub(crate) are_images_pending: bool,
    pub(crate) pending_char_gen_tasks: i32,
    pub(crate) pending_card_img_tasks: i32,
    pub(crate) pending_char_img_tasks: i32,
    pub(crate) is_adult_content: bool,
    pub(crate) language: String,
    pub(crate) error_details: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl PublishedStory {
    pub(crate) fn counters(&self) -> PendingCounters {
        PendingCounters::new(
            self.pending_char_gen_tasks,
            self.pending_card_img_tasks,
            self.pending_char_img_tasks,
        )
    }
}

/// A generated scene for a specific story state. `(published_story_id,
/// state_hash)` is unique; content evolves via upsert as stages enrich it.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub(crate) struct StoryScene {
    pub(crate) id: Uuid,
    pub(crate) published_story_id: Uuid,
    pub(crate) state_hash: String,
    pub(crate) content: Value,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

/// A single player's session on a published story.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub(crate) struct PlayerGameState {
    pub(crate) id: Uuid,
    pub(crate) player_id: Uuid,
    pub(crate) published_story_id: Uuid,
    pub(crate) current_scene_id: Option<Uuid>,
    pub(crate) player_status: PlayerStatus,
    pub(crate) ending_text: Option<String>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
    pub(crate) error_details: Option<String>,
    pub(crate) last_activity_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PlayerStatus {
    Playing,
    GeneratingScene,
    Completed,
    Error,
}

impl PlayerStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Playing => "playing",
            Self::GeneratingScene => "generating_scene",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl FromStr for PlayerStatus {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "playing" => Ok(Self::Playing),
            "generating_scene" => Ok(Self::GeneratingScene),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(UnknownVariant {
                kind: "player status",
                value: other.to_string(),
            }),
        }
    }
}

/// Content-addressed memoization of a player's arrival at a state hash.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub(crate) struct PlayerProgress {
    pub(crate) id: Uuid,
    pub(crate) player_id: Uuid,
    pub(crate) published_story_id: Uuid,
    pub(crate) current_state_hash: String,
    pub(crate) current_scene_summary: Option<String>,
    pub(crate) updated_at: DateTime<Utc>,
}

/// Raw output persisted by an AI worker, keyed by its task id.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub(crate) struct GenerationResult {
    pub(crate) task_id: Uuid,
    pub(crate) generated_text: String,
    /// Worker-side failure description; empty/absent means success.
    pub(crate) error: Option<String>,
}

impl GenerationResult {
    pub(crate) fn worker_error(&self) -> Option<&str> {
        self.error.as_deref().filter(|detail| !detail.is_empty())
    }
}
