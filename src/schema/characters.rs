//! Character-generation output: the full cast batch.
//!
//! A single malformed character fails the whole batch; partial casts would
//! leave scenes referencing characters that were never persisted.

use serde::{Deserialize, Serialize};

use super::SchemaError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedCharacter {
    pub id: String,
    pub name: String,
    pub role: String,
    pub traits: Vec<String>,
    pub relationship: Relationship,
    pub memories: Vec<String>,
    pub plot_hook: String,
    pub image_prompt_descriptor: String,
    pub image_reference_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub protagonist: String,
}

pub fn validate_batch(characters: &[GeneratedCharacter]) -> Result<(), SchemaError> {
    if characters.is_empty() {
        return Err(SchemaError::EmptyBatch);
    }
    for character in characters {
        character.validate()?;
    }
    Ok(())
}

impl GeneratedCharacter {
    fn validate(&self) -> Result<(), SchemaError> {
        if self.id.trim().is_empty() {
            return Err(SchemaError::EmptyField("id"));
        }
        if self.name.trim().is_empty() {
            return Err(SchemaError::EmptyField("name"));
        }
        if self.role.trim().is_empty() {
            return Err(SchemaError::EmptyField("role"));
        }
        if self.traits.is_empty() || self.traits.iter().any(|t| t.trim().is_empty()) {
            return Err(SchemaError::EmptyField("traits"));
        }
        if self.relationship.protagonist.trim().is_empty() {
            return Err(SchemaError::EmptyField("relationship.protagonist"));
        }
        if self.memories.is_empty() || self.memories.iter().any(|m| m.trim().is_empty()) {
            return Err(SchemaError::EmptyField("memories"));
        }
        if self.plot_hook.trim().is_empty() {
            return Err(SchemaError::EmptyField("plotHook"));
        }
        if self.image_prompt_descriptor.trim().is_empty() {
            return Err(SchemaError::EmptyField("imagePromptDescriptor"));
        }
        if self.image_reference_name.trim().is_empty() {
            return Err(SchemaError::EmptyField("imageReferenceName"));
        }
        Ok(())
    }
}
