//! Structured-scene JSON checks.
//!
//! The final scene document stays a generic JSON value in storage; only the
//! fields the orchestrator itself acts on are inspected here.

use serde_json::Value;

use super::SchemaError;

/// A scene ends the session when it carries an ending text (`et`).
pub fn is_game_over(scene: &Value) -> bool {
    ending_text(scene).is_some()
}

/// Non-game-over scenes must offer the player at least one choice.
pub fn validate_scene(scene: &Value) -> Result<(), SchemaError> {
    if !scene.is_object() {
        return Err(SchemaError::EmptyField("scene"));
    }
    if is_game_over(scene) {
        return Ok(());
    }
    match scene.get("ch").and_then(Value::as_array) {
        Some(choices) if !choices.is_empty() => Ok(()),
        _ => Err(SchemaError::MissingChoices),
    }
}

/// Ending text of a game-over scene.
pub fn ending_text(scene: &Value) -> Option<String> {
    scene
        .get("et")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(ToString::to_string)
}

/// Short scene summary used to annotate player progress.
pub fn scene_summary(scene: &Value) -> Option<String> {
    scene
        .get("sssf")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(ToString::to_string)
}
