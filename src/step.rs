//! Pipeline step machine for published stories.
//!
//! The `(status, step, counters, areImagesPending)` tuple on a story row must
//! be internally consistent after every commit. The rules that keep it so live
//! here and are the only place they are defined: the Postgres DAO and the
//! in-memory test store both call into this module.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Fine-grained position of a published story inside the generation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStep {
    Moderation,
    ProtagonistGoal,
    ScenePlanner,
    CharacterGeneration,
    CardImageGeneration,
    CharacterImageGeneration,
    SetupGeneration,
    CoverImageGeneration,
    InitialSceneJson,
    Complete,
}

impl GenerationStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Moderation => "moderation",
            Self::ProtagonistGoal => "protagonist_goal",
            Self::ScenePlanner => "scene_planner",
            Self::CharacterGeneration => "character_generation",
            Self::CardImageGeneration => "card_image_generation",
            Self::CharacterImageGeneration => "character_image_generation",
            Self::SetupGeneration => "setup_generation",
            Self::CoverImageGeneration => "cover_image_generation",
            Self::InitialSceneJson => "initial_scene_json",
            Self::Complete => "complete",
        }
    }
}

impl FromStr for GenerationStep {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "moderation" => Ok(Self::Moderation),
            "protagonist_goal" => Ok(Self::ProtagonistGoal),
            "scene_planner" => Ok(Self::ScenePlanner),
            "character_generation" => Ok(Self::CharacterGeneration),
            "card_image_generation" => Ok(Self::CardImageGeneration),
            "character_image_generation" => Ok(Self::CharacterImageGeneration),
            "setup_generation" => Ok(Self::SetupGeneration),
            "cover_image_generation" => Ok(Self::CoverImageGeneration),
            "initial_scene_json" => Ok(Self::InitialSceneJson),
            "complete" => Ok(Self::Complete),
            other => Err(UnknownVariant {
                kind: "generation step",
                value: other.to_string(),
            }),
        }
    }
}

/// Client-visible status of a published story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    ModerationPending,
    ProtagonistGoalPending,
    ScenePlannerPending,
    SubTasksPending,
    ImageGenerationPending,
    SetupPending,
    JsonGenerationPending,
    Ready,
    Error,
}

impl StoryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ModerationPending => "moderation_pending",
            Self::ProtagonistGoalPending => "protagonist_goal_pending",
            Self::ScenePlannerPending => "scene_planner_pending",
            Self::SubTasksPending => "sub_tasks_pending",
            Self::ImageGenerationPending => "image_generation_pending",
            Self::SetupPending => "setup_pending",
            Self::JsonGenerationPending => "json_generation_pending",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }
}

impl FromStr for StoryStatus {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "moderation_pending" => Ok(Self::ModerationPending),
            "protagonist_goal_pending" => Ok(Self::ProtagonistGoalPending),
            "scene_planner_pending" => Ok(Self::ScenePlannerPending),
            "sub_tasks_pending" => Ok(Self::SubTasksPending),
            "image_generation_pending" => Ok(Self::ImageGenerationPending),
            "setup_pending" => Ok(Self::SetupPending),
            "json_generation_pending" => Ok(Self::JsonGenerationPending),
            "ready" => Ok(Self::Ready),
            "error" => Ok(Self::Error),
            other => Err(UnknownVariant {
                kind: "story status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Canonical image of a pipeline step in the client-visible status column.
pub fn status_from_step(step: GenerationStep) -> StoryStatus {
    match step {
        GenerationStep::Moderation => StoryStatus::ModerationPending,
        GenerationStep::ProtagonistGoal => StoryStatus::ProtagonistGoalPending,
        GenerationStep::ScenePlanner => StoryStatus::ScenePlannerPending,
        GenerationStep::CharacterGeneration => StoryStatus::SubTasksPending,
        GenerationStep::CardImageGeneration
        | GenerationStep::CharacterImageGeneration
        | GenerationStep::CoverImageGeneration => StoryStatus::ImageGenerationPending,
        GenerationStep::SetupGeneration => StoryStatus::SetupPending,
        GenerationStep::InitialSceneJson => StoryStatus::JsonGenerationPending,
        GenerationStep::Complete => StoryStatus::Ready,
    }
}

/// Outstanding sub-task counters on a story row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounters {
    pub char_gen: i32,
    pub card_img: i32,
    pub char_img: i32,
}

impl PendingCounters {
    pub fn new(char_gen: i32, card_img: i32, char_img: i32) -> Self {
        Self {
            char_gen,
            card_img,
            char_img,
        }
    }

    /// The `areImagesPending` flag is derived, never stored independently.
    pub fn images_pending(self) -> bool {
        self.card_img > 0 || self.char_img > 0
    }

    pub fn all_clear(self) -> bool {
        self.char_gen == 0 && self.card_img == 0 && self.char_img == 0
    }

    /// Subtract with a floor of zero. Duplicate completion deliveries land
    /// here after the counter is exhausted and must stay benign.
    pub fn decremented(self, card_img: i32, char_img: i32) -> Self {
        Self {
            char_gen: self.char_gen,
            card_img: (self.card_img - card_img).max(0),
            char_img: (self.char_img - char_img).max(0),
        }
    }
}

/// Next step for a story whose sub-tasks are draining, in priority order:
/// character generation, then card images, then character images, then setup.
pub fn determine_next_step(counters: PendingCounters) -> GenerationStep {
    if counters.char_gen > 0 {
        GenerationStep::CharacterGeneration
    } else if counters.card_img > 0 {
        GenerationStep::CardImageGeneration
    } else if counters.char_img > 0 {
        GenerationStep::CharacterImageGeneration
    } else {
        GenerationStep::SetupGeneration
    }
}

/// Permitted step adjacency.
///
/// The image steps may jump past `SetupGeneration` when the setup result was
/// merged while images were still draining. Any step may close out to
/// `Complete`.
pub fn validate_transition(
    from: Option<GenerationStep>,
    to: GenerationStep,
) -> Result<(), TransitionError> {
    use GenerationStep::{
        CardImageGeneration, CharacterGeneration, CharacterImageGeneration, Complete,
        CoverImageGeneration, InitialSceneJson, Moderation, ProtagonistGoal, ScenePlanner,
        SetupGeneration,
    };

    let allowed = match (from, to) {
        (_, Complete) => true,
        (Some(Moderation), ProtagonistGoal) | (Some(ProtagonistGoal), ScenePlanner) => true,
        (
            Some(ScenePlanner),
            CharacterGeneration | CardImageGeneration | SetupGeneration,
        ) => true,
        (
            Some(CharacterGeneration),
            CardImageGeneration | CharacterImageGeneration | SetupGeneration,
        ) => true,
        (
            Some(CardImageGeneration),
            CharacterImageGeneration | SetupGeneration | CoverImageGeneration | InitialSceneJson,
        ) => true,
        (
            Some(CharacterImageGeneration),
            SetupGeneration | CoverImageGeneration | InitialSceneJson,
        ) => true,
        (Some(SetupGeneration), CoverImageGeneration | InitialSceneJson) => true,
        (Some(CoverImageGeneration), InitialSceneJson) => true,
        _ => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(TransitionError::Invalid { from, to })
    }
}

/// Typed failure of a locked step update.
///
/// `Stale` means a duplicate or out-of-order notification raced the row and
/// must be acknowledged silently; `Invalid` means the pipeline itself is in a
/// state the adjacency rules forbid and the story should be failed.
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("stale notification: expected step {expected:?}, story is at {actual:?}")]
    Stale {
        expected: Option<GenerationStep>,
        actual: Option<GenerationStep>,
    },
    #[error("invalid step transition {from:?} -> {to:?}")]
    Invalid {
        from: Option<GenerationStep>,
        to: GenerationStep,
    },
}

/// Stale precondition on an entity that carries no step column (draft
/// configs, player sessions).
#[derive(Debug, Error)]
#[error("stale notification for {entity} {id}: {detail}")]
pub struct StaleNotification {
    pub entity: &'static str,
    pub id: Uuid,
    pub detail: String,
}

/// A persisted-state assumption did not hold (e.g. the initial scene row is
/// missing while characters are being merged). The affected entity is moved
/// to its error state and the message acknowledged; the operator decides
/// whether to force-advance.
#[derive(Debug, Error)]
#[error("pipeline invariant violated for {id}: {detail}")]
pub struct InvariantViolation {
    pub id: Uuid,
    pub detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(GenerationStep::Moderation, StoryStatus::ModerationPending)]
    #[case(GenerationStep::ProtagonistGoal, StoryStatus::ProtagonistGoalPending)]
    #[case(GenerationStep::ScenePlanner, StoryStatus::ScenePlannerPending)]
    #[case(GenerationStep::CharacterGeneration, StoryStatus::SubTasksPending)]
    #[case(GenerationStep::CardImageGeneration, StoryStatus::ImageGenerationPending)]
    #[case(GenerationStep::CharacterImageGeneration, StoryStatus::ImageGenerationPending)]
    #[case(GenerationStep::CoverImageGeneration, StoryStatus::ImageGenerationPending)]
    #[case(GenerationStep::SetupGeneration, StoryStatus::SetupPending)]
    #[case(GenerationStep::InitialSceneJson, StoryStatus::JsonGenerationPending)]
    #[case(GenerationStep::Complete, StoryStatus::Ready)]
    fn status_mirrors_step(#[case] step: GenerationStep, #[case] expected: StoryStatus) {
        assert_eq!(status_from_step(step), expected);
    }

    #[test]
    fn next_step_prefers_character_generation() {
        let counters = PendingCounters::new(1, 3, 2);
        assert_eq!(
            determine_next_step(counters),
            GenerationStep::CharacterGeneration
        );
    }

    #[test]
    fn next_step_prefers_card_images_over_character_images() {
        let counters = PendingCounters::new(0, 3, 2);
        assert_eq!(
            determine_next_step(counters),
            GenerationStep::CardImageGeneration
        );
    }

    #[test]
    fn next_step_falls_back_to_setup() {
        let counters = PendingCounters::new(0, 0, 0);
        assert_eq!(
            determine_next_step(counters),
            GenerationStep::SetupGeneration
        );
    }

    #[test]
    fn decrement_clamps_at_zero() {
        let counters = PendingCounters::new(0, 1, 0).decremented(1, 1);
        assert_eq!(counters, PendingCounters::new(0, 0, 0));

        let again = counters.decremented(1, 0);
        assert_eq!(again, PendingCounters::new(0, 0, 0));
    }

    #[test]
    fn images_pending_tracks_either_counter() {
        assert!(PendingCounters::new(0, 1, 0).images_pending());
        assert!(PendingCounters::new(0, 0, 1).images_pending());
        assert!(!PendingCounters::new(3, 0, 0).images_pending());
    }

    #[rstest]
    #[case(Some(GenerationStep::Moderation), GenerationStep::ProtagonistGoal)]
    #[case(Some(GenerationStep::ProtagonistGoal), GenerationStep::ScenePlanner)]
    #[case(Some(GenerationStep::ScenePlanner), GenerationStep::CharacterGeneration)]
    #[case(Some(GenerationStep::ScenePlanner), GenerationStep::SetupGeneration)]
    #[case(Some(GenerationStep::CharacterGeneration), GenerationStep::CharacterImageGeneration)]
    #[case(Some(GenerationStep::CardImageGeneration), GenerationStep::CharacterImageGeneration)]
    #[case(Some(GenerationStep::CharacterImageGeneration), GenerationStep::SetupGeneration)]
    #[case(Some(GenerationStep::CharacterImageGeneration), GenerationStep::InitialSceneJson)]
    #[case(Some(GenerationStep::SetupGeneration), GenerationStep::CoverImageGeneration)]
    #[case(Some(GenerationStep::SetupGeneration), GenerationStep::InitialSceneJson)]
    #[case(Some(GenerationStep::CoverImageGeneration), GenerationStep::InitialSceneJson)]
    #[case(Some(GenerationStep::InitialSceneJson), GenerationStep::Complete)]
    #[case(Some(GenerationStep::Moderation), GenerationStep::Complete)]
    #[case(None, GenerationStep::Complete)]
    fn permitted_transitions_pass(
        #[case] from: Option<GenerationStep>,
        #[case] to: GenerationStep,
    ) {
        assert!(validate_transition(from, to).is_ok());
    }

    #[rstest]
    #[case(Some(GenerationStep::Moderation), GenerationStep::ScenePlanner)]
    #[case(Some(GenerationStep::ScenePlanner), GenerationStep::ProtagonistGoal)]
    #[case(Some(GenerationStep::SetupGeneration), GenerationStep::CharacterGeneration)]
    #[case(Some(GenerationStep::InitialSceneJson), GenerationStep::SetupGeneration)]
    #[case(Some(GenerationStep::Complete), GenerationStep::Moderation)]
    #[case(None, GenerationStep::ScenePlanner)]
    fn forbidden_transitions_fail(
        #[case] from: Option<GenerationStep>,
        #[case] to: GenerationStep,
    ) {
        assert!(matches!(
            validate_transition(from, to),
            Err(TransitionError::Invalid { .. })
        ));
    }

    #[test]
    fn step_strings_roundtrip() {
        let steps = [
            GenerationStep::Moderation,
            GenerationStep::ProtagonistGoal,
            GenerationStep::ScenePlanner,
            GenerationStep::CharacterGeneration,
            GenerationStep::CardImageGeneration,
            GenerationStep::CharacterImageGeneration,
            GenerationStep::SetupGeneration,
            GenerationStep::CoverImageGeneration,
            GenerationStep::InitialSceneJson,
            GenerationStep::Complete,
        ];
        for step in steps {
            assert_eq!(step.as_str().parse::<GenerationStep>().unwrap(), step);
        }
    }

    #[test]
    fn status_strings_roundtrip() {
        let statuses = [
            StoryStatus::ModerationPending,
            StoryStatus::ProtagonistGoalPending,
            StoryStatus::ScenePlannerPending,
            StoryStatus::SubTasksPending,
            StoryStatus::ImageGenerationPending,
            StoryStatus::SetupPending,
            StoryStatus::JsonGenerationPending,
            StoryStatus::Ready,
            StoryStatus::Error,
        ];
        for status in statuses {
            assert_eq!(status.as_str().parse::<StoryStatus>().unwrap(), status);
        }
    }
}
