//! Setup-generation output.

use serde::Deserialize;

use super::SchemaError;

#[derive(Debug, Clone, Deserialize)]
pub struct SetupOutcome {
    /// First-scene narrative.
    pub res: String,
    /// Preview-image prompt; empty means no preview image is wanted.
    #[serde(default)]
    pub prv: String,
}

impl SetupOutcome {
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.res.trim().is_empty() {
            return Err(SchemaError::EmptyField("res"));
        }
        Ok(())
    }

    pub fn preview_prompt(&self) -> Option<&str> {
        let trimmed = self.prv.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }
}
