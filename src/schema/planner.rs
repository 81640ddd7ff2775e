//! Scene-planner outcome: the initial scene focus plus card and character
//! suggestions that seed the parallel sub-task fan-out.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::SchemaError;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannerOutcome {
    pub scene_focus: String,
    #[serde(default)]
    pub new_card_suggestions: Vec<CardSuggestion>,
    /// Character seeds are passed through verbatim to the character-generation
    /// prompt; the planner's seed shape is not contractual beyond being JSON.
    #[serde(default)]
    pub new_character_suggestions: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardSuggestion {
    pub title: String,
    pub image_prompt_descriptor: String,
    pub image_reference_name: String,
}

impl PlannerOutcome {
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.scene_focus.trim().is_empty() {
            return Err(SchemaError::EmptyField("sceneFocus"));
        }
        for card in &self.new_card_suggestions {
            if card.title.trim().is_empty() {
                return Err(SchemaError::EmptyField("newCardSuggestions.title"));
            }
            if card.image_prompt_descriptor.trim().is_empty() {
                return Err(SchemaError::EmptyField(
                    "newCardSuggestions.imagePromptDescriptor",
                ));
            }
            if card.image_reference_name.trim().is_empty() {
                return Err(SchemaError::EmptyField(
                    "newCardSuggestions.imageReferenceName",
                ));
            }
        }
        Ok(())
    }
}
