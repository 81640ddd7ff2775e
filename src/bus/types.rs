//! Wire contracts shared with the AI workers, the client gateway, and the
//! push service. Field names are bit-exact; change nothing casually.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Aspect ratio for character and card art.
pub const RATIO_PORTRAIT: &str = "2:3";
/// Aspect ratio for cover/preview art.
pub const RATIO_LANDSCAPE: &str = "3:2";

/// Image reference prefixes. The image worker keys its artifact store on
/// these names.
pub const CHARACTER_REF_PREFIX: &str = "ch_";
pub const CARD_REF_PREFIX: &str = "card_";
pub const COVER_REF_PREFIX: &str = "cover_";
pub const HISTORY_PREVIEW_REF_PREFIX: &str = "history_preview_";

/// Stage tag on every generation task; identifies which pipeline step the
/// worker is servicing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PromptType {
    Narrator,
    ContentModeration,
    ProtagonistGoal,
    ScenePlanner,
    CharacterGeneration,
    StorySetup,
    JsonGeneration,
    NovelFirstSceneCreator,
    NovelCreator,
    NovelGameOverCreator,
    ImageGeneration,
    /// Forward compatibility: an unrecognized tag is logged and acknowledged,
    /// never dead-lettered.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Success,
    Error,
}

/// Inbound notification envelope from a generation worker.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskNotification {
    pub task_id: Uuid,
    pub prompt_type: PromptType,
    pub status: NotificationStatus,
    #[serde(default)]
    pub story_config_id: Option<Uuid>,
    #[serde(default)]
    pub published_story_id: Option<Uuid>,
    #[serde(default)]
    pub game_state_id: Option<Uuid>,
    pub user_id: Uuid,
    #[serde(default)]
    pub state_hash: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub generated_text: Option<String>,
    #[serde(default)]
    pub error_details: Option<String>,
    /// Set by image workers; carries the completed reference name.
    #[serde(default)]
    pub image_reference: Option<String>,
}

impl TaskNotification {
    pub fn is_worker_error(&self) -> bool {
        self.status == NotificationStatus::Error
    }

    pub fn worker_error_details(&self) -> String {
        self.error_details
            .clone()
            .filter(|details| !details.is_empty())
            .unwrap_or_else(|| "worker reported an error without details".to_string())
    }
}

/// Outbound task for a text-generation worker.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationTaskPayload {
    pub task_id: Uuid,
    pub user_id: Uuid,
    pub prompt_type: PromptType,
    pub user_input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_story_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub story_config_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_state_id: Option<Uuid>,
    pub language: String,
}

/// Outbound task for the image worker.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageTaskPayload {
    pub task_id: Uuid,
    pub published_story_id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character_id: Option<String>,
    pub character_name: String,
    pub image_reference: String,
    pub prompt: String,
    pub negative_prompt: String,
    pub ratio: &'static str,
}

/// A batch of image tasks published as one message.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageTaskBatchPayload {
    pub batch_id: Uuid,
    pub published_story_id: Uuid,
    pub user_id: Uuid,
    pub tasks: Vec<ImageTaskPayload>,
}

/// Real-time update for the client gateway.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientUpdate {
    /// Id of the entity the update describes.
    pub id: Uuid,
    pub user_id: Uuid,
    pub update_type: ClientUpdateType,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ending_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientUpdateType {
    DraftUpdate,
    StoryUpdate,
    GameStateUpdate,
}

/// Localized push envelope: a localization key with arguments plus fallback
/// title/body for clients without the key.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushNotification {
    pub user_id: Uuid,
    pub loc_key: String,
    pub loc_args: Vec<String>,
    pub title: String,
    pub body: String,
}

impl PushNotification {
    pub fn draft_ready(user_id: Uuid, title: &str) -> Self {
        Self {
            user_id,
            loc_key: "push.draft_ready".to_string(),
            loc_args: vec![title.to_string()],
            title: "Your draft is ready".to_string(),
            body: format!("\"{title}\" is ready to review and publish."),
        }
    }

    pub fn story_ready(user_id: Uuid, title: &str, author: &str) -> Self {
        Self {
            user_id,
            loc_key: "push.story_ready".to_string(),
            loc_args: vec![title.to_string(), author.to_string()],
            title: "Your story is live".to_string(),
            body: format!("\"{title}\" by {author} is ready to play."),
        }
    }

    pub fn setup_pending(user_id: Uuid, story_id: Uuid) -> Self {
        Self {
            user_id,
            loc_key: "push.setup_pending".to_string(),
            loc_args: vec![story_id.to_string()],
            title: "Almost there".to_string(),
            body: "The opening of your story is being written.".to_string(),
        }
    }

    pub fn game_over(user_id: Uuid, ending_text: &str) -> Self {
        Self {
            user_id,
            loc_key: "push.game_over".to_string(),
            loc_args: vec![ending_text.to_string()],
            title: "The story has ended".to_string(),
            body: ending_text.to_string(),
        }
    }

    pub fn story_error(user_id: Uuid, story_id: Uuid) -> Self {
        Self {
            user_id,
            loc_key: "push.story_error".to_string(),
            loc_args: vec![story_id.to_string()],
            title: "Story generation failed".to_string(),
            body: "Something went wrong while generating your story.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_decodes_camel_case() {
        let body = json!({
            "taskId": "6e4f0d9e-7c72-4ad1-9a0e-3e1d9a6b1f5a",
            "promptType": "contentModeration",
            "status": "success",
            "publishedStoryId": "0b7c1f1e-54f3-4b2b-8f6e-1a2b3c4d5e6f",
            "userId": "4c7e3f2a-91b4-4b7e-9e1d-7f6a5b4c3d2e",
            "language": "en",
            "generatedText": "{\"ac\": 0}"
        })
        .to_string();

        let envelope: TaskNotification = serde_json::from_str(&body).unwrap();
        assert_eq!(envelope.prompt_type, PromptType::ContentModeration);
        assert_eq!(envelope.status, NotificationStatus::Success);
        assert!(envelope.published_story_id.is_some());
        assert!(envelope.story_config_id.is_none());
        assert!(!envelope.is_worker_error());
    }

    #[test]
    fn unknown_prompt_type_is_tolerated() {
        let body = json!({
            "taskId": "6e4f0d9e-7c72-4ad1-9a0e-3e1d9a6b1f5a",
            "promptType": "someFutureStage",
            "status": "success",
            "userId": "4c7e3f2a-91b4-4b7e-9e1d-7f6a5b4c3d2e"
        })
        .to_string();

        let envelope: TaskNotification = serde_json::from_str(&body).unwrap();
        assert_eq!(envelope.prompt_type, PromptType::Unknown);
    }

    #[test]
    fn worker_error_details_fall_back_to_a_message() {
        let body = json!({
            "taskId": "6e4f0d9e-7c72-4ad1-9a0e-3e1d9a6b1f5a",
            "promptType": "narrator",
            "status": "error",
            "storyConfigId": "0b7c1f1e-54f3-4b2b-8f6e-1a2b3c4d5e6f",
            "userId": "4c7e3f2a-91b4-4b7e-9e1d-7f6a5b4c3d2e"
        })
        .to_string();

        let envelope: TaskNotification = serde_json::from_str(&body).unwrap();
        assert!(envelope.is_worker_error());
        assert!(!envelope.worker_error_details().is_empty());
    }

    #[test]
    fn generation_task_serializes_camel_case_and_skips_absent_ids() {
        let task = GenerationTaskPayload {
            task_id: Uuid::nil(),
            user_id: Uuid::nil(),
            prompt_type: PromptType::ProtagonistGoal,
            user_input: "input".to_string(),
            published_story_id: Some(Uuid::nil()),
            story_config_id: None,
            state_hash: None,
            game_state_id: None,
            language: "en".to_string(),
        };

        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["promptType"], "protagonistGoal");
        assert!(value.get("storyConfigId").is_none());
        assert!(value.get("publishedStoryId").is_some());
        assert_eq!(value["language"], "en");
    }

    #[test]
    fn image_task_carries_exact_ratio_strings() {
        let task = ImageTaskPayload {
            task_id: Uuid::nil(),
            published_story_id: Uuid::nil(),
            user_id: Uuid::nil(),
            character_id: None,
            character_name: "Maren".to_string(),
            image_reference: "ch_maren".to_string(),
            prompt: "a weathered harbormaster".to_string(),
            negative_prompt: String::new(),
            ratio: RATIO_PORTRAIT,
        };

        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["ratio"], "2:3");
        assert_eq!(value["imageReference"], "ch_maren");
        assert!(value.get("characterId").is_none());
    }

    #[test]
    fn client_update_type_uses_camel_case_tags() {
        let update = ClientUpdate {
            id: Uuid::nil(),
            user_id: Uuid::nil(),
            update_type: ClientUpdateType::GameStateUpdate,
            status: "playing".to_string(),
            title: None,
            description: None,
            scene_id: None,
            state_hash: Some("abc".to_string()),
            ending_text: None,
            error_details: None,
        };

        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["updateType"], "gameStateUpdate");
        assert!(value.get("title").is_none());
    }
}
