//! Deterministic task-input builders for follow-on generation tasks.
//!
//! Each formatter composes the story config blob, the adult-content flag, and
//! the outputs of earlier stages into the compact JSON document the worker
//! prompts expect.

use serde_json::{Value, json};

pub(crate) fn protagonist_goal_input(config: &Value, is_adult: bool) -> String {
    json!({
        "cfg": config,
        "ac": is_adult,
    })
    .to_string()
}

pub(crate) fn scene_planner_input(config: &Value, is_adult: bool, protagonist_goal: &str) -> String {
    json!({
        "cfg": config,
        "ac": is_adult,
        "goal": protagonist_goal,
    })
    .to_string()
}

pub(crate) fn character_generation_input(config: &Value, seeds: &[Value]) -> String {
    json!({
        "cfg": config,
        "seeds": seeds,
    })
    .to_string()
}

pub(crate) fn setup_input(config: &Value, characters: &Value) -> String {
    json!({
        "cfg": config,
        "chars": characters,
    })
    .to_string()
}

pub(crate) fn first_scene_input(config: &Value, setup: &Value, scene_focus: &str) -> String {
    json!({
        "cfg": config,
        "setup": setup,
        "focus": scene_focus,
    })
    .to_string()
}

pub(crate) fn scene_json_input(narrative: &str) -> String {
    json!({
        "narrative": narrative,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn formatters_are_deterministic() {
        let config = json!({"genre": "mystery"});
        let first = scene_planner_input(&config, true, "escape the harbor");
        let second = scene_planner_input(&config, true, "escape the harbor");
        assert_eq!(first, second);
    }

    #[test]
    fn goal_input_carries_config_and_flag() {
        let config = json!({"genre": "mystery"});
        let input: Value = serde_json::from_str(&protagonist_goal_input(&config, true)).unwrap();
        assert_eq!(input["cfg"]["genre"], "mystery");
        assert_eq!(input["ac"], true);
    }

    #[test]
    fn setup_input_includes_cast() {
        let characters = json!([{"name": "Maren"}]);
        let input: Value =
            serde_json::from_str(&setup_input(&json!({}), &characters)).unwrap();
        assert_eq!(input["chars"][0]["name"], "Maren");
    }

    #[test]
    fn scene_json_input_wraps_narrative() {
        let input: Value = serde_json::from_str(&scene_json_input("The storm broke.")).unwrap();
        assert_eq!(input["narrative"], "The storm broke.");
    }
}
