//! In-memory [`OrchestratorDao`] for handler and pipeline tests.
//!
//! Mirrors the Postgres implementation's semantics exactly, including stale
//! detection and step/counter recomputation, so end-to-end scenarios can run
//! without a database. State mutations go through the same `crate::step`
//! rules as the production DAO.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use uuid::Uuid;

use super::{OrchestratorDao, SceneOutcome};
use crate::bus::types::HISTORY_PREVIEW_REF_PREFIX;
use crate::step::{
    GenerationStep, InvariantViolation, PendingCounters, StaleNotification, StoryStatus,
    TransitionError, determine_next_step, status_from_step, validate_transition,
};
use crate::store::models::{
    ConfigStatus, GenerationResult, INITIAL_STATE_HASH, PlayerGameState, PlayerProgress,
    PlayerStatus, PublishedStory, SETUP_PREVIEW_KEY, StoryConfig, StoryScene,
    merge_setup, scene_with_characters, scene_with_focus, setup_marked_done, setup_with_preview,
};

#[derive(Default)]
struct MockState {
    configs: HashMap<Uuid, StoryConfig>,
    stories: HashMap<Uuid, PublishedStory>,
    scenes: HashMap<(Uuid, String), StoryScene>,
    game_states: HashMap<Uuid, PlayerGameState>,
    progress: HashMap<(Uuid, Uuid, String), PlayerProgress>,
    results: HashMap<Uuid, GenerationResult>,
    image_urls: HashMap<String, String>,
}

#[derive(Default)]
pub(crate) struct MockDao {
    state: Mutex<MockState>,
}

impl MockDao {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    // Seeding helpers

    pub(crate) fn seed_config(&self, config: StoryConfig) {
        self.state.lock().unwrap().configs.insert(config.id, config);
    }

    pub(crate) fn seed_story(&self, story: PublishedStory) {
        self.state.lock().unwrap().stories.insert(story.id, story);
    }

    pub(crate) fn seed_game_state(&self, game_state: PlayerGameState) {
        self.state
            .lock()
            .unwrap()
            .game_states
            .insert(game_state.id, game_state);
    }

    pub(crate) fn seed_result(&self, result: GenerationResult) {
        self.state
            .lock()
            .unwrap()
            .results
            .insert(result.task_id, result);
    }

    pub(crate) fn seed_image_url(&self, reference: &str, url: &str) {
        self.state
            .lock()
            .unwrap()
            .image_urls
            .insert(reference.to_string(), url.to_string());
    }

    // Inspection helpers

    pub(crate) fn config(&self, id: Uuid) -> Option<StoryConfig> {
        self.state.lock().unwrap().configs.get(&id).cloned()
    }

    pub(crate) fn story(&self, id: Uuid) -> Option<PublishedStory> {
        self.state.lock().unwrap().stories.get(&id).cloned()
    }

    pub(crate) fn scene(&self, story_id: Uuid, state_hash: &str) -> Option<StoryScene> {
        self.state
            .lock()
            .unwrap()
            .scenes
            .get(&(story_id, state_hash.to_string()))
            .cloned()
    }

    pub(crate) fn scene_count(&self, story_id: Uuid) -> usize {
        self.state
            .lock()
            .unwrap()
            .scenes
            .keys()
            .filter(|(id, _)| *id == story_id)
            .count()
    }

    pub(crate) fn game_state(&self, id: Uuid) -> Option<PlayerGameState> {
        self.state.lock().unwrap().game_states.get(&id).cloned()
    }

    pub(crate) fn progress(
        &self,
        player_id: Uuid,
        story_id: Uuid,
        state_hash: &str,
    ) -> Option<PlayerProgress> {
        self.state
            .lock()
            .unwrap()
            .progress
            .get(&(player_id, story_id, state_hash.to_string()))
            .cloned()
    }

    /// The consistency every story row must exhibit at rest.
    pub(crate) fn assert_story_invariants(&self) {
        let state = self.state.lock().unwrap();
        for story in state.stories.values() {
            if story.status == StoryStatus::Error {
                assert!(story.error_details.is_some(), "error status without details");
                continue;
            }
            if let Some(step) = story.generation_step {
                assert_eq!(
                    story.status,
                    status_from_step(step),
                    "status does not mirror step for story {}",
                    story.id
                );
            }
            if story.generation_step == Some(GenerationStep::CoverImageGeneration) {
                assert!(story.are_images_pending, "cover step without pending flag");
            } else {
                assert_eq!(
                    story.are_images_pending,
                    story.counters().images_pending(),
                    "stale areImagesPending for story {}",
                    story.id
                );
            }
            if story.status == StoryStatus::Ready {
                assert!(story.counters().all_clear(), "ready with pending tasks");
                assert_eq!(story.generation_step, Some(GenerationStep::Complete));
            }
        }
    }

    fn upsert_scene(
        scenes: &mut HashMap<(Uuid, String), StoryScene>,
        story_id: Uuid,
        state_hash: &str,
        content: &Value,
    ) -> StoryScene {
        let now = Utc::now();
        let scene = scenes
            .entry((story_id, state_hash.to_string()))
            .and_modify(|scene| {
                scene.content = content.clone();
                scene.updated_at = now;
            })
            .or_insert_with(|| StoryScene {
                id: Uuid::new_v4(),
                published_story_id: story_id,
                state_hash: state_hash.to_string(),
                content: content.clone(),
                created_at: now,
                updated_at: now,
            });
        scene.clone()
    }

    fn upsert_progress(
        progress: &mut HashMap<(Uuid, Uuid, String), PlayerProgress>,
        player_id: Uuid,
        story_id: Uuid,
        state_hash: &str,
        summary: Option<&str>,
    ) {
        let now = Utc::now();
        progress
            .entry((player_id, story_id, state_hash.to_string()))
            .and_modify(|memo| {
                if let Some(summary) = summary {
                    memo.current_scene_summary = Some(summary.to_string());
                }
                memo.updated_at = now;
            })
            .or_insert_with(|| PlayerProgress {
                id: Uuid::new_v4(),
                player_id,
                published_story_id: story_id,
                current_state_hash: state_hash.to_string(),
                current_scene_summary: summary.map(ToString::to_string),
                updated_at: now,
            });
    }

    fn story_at(
        stories: &HashMap<Uuid, PublishedStory>,
        id: Uuid,
        expected: GenerationStep,
    ) -> Result<PublishedStory> {
        let story = stories
            .get(&id)
            .cloned()
            .ok_or_else(|| anyhow!("published story {id} not found"))?;
        if story.generation_step != Some(expected) {
            return Err(TransitionError::Stale {
                expected: Some(expected),
                actual: story.generation_step,
            }
            .into());
        }
        Ok(story)
    }

    fn apply_counters(story: &mut PublishedStory, counters: PendingCounters) {
        story.pending_char_gen_tasks = counters.char_gen;
        story.pending_card_img_tasks = counters.card_img;
        story.pending_char_img_tasks = counters.char_img;
    }
}

#[async_trait]
impl OrchestratorDao for MockDao {
    async fn get_story_config(&self, id: Uuid) -> Result<Option<StoryConfig>> {
        Ok(self.config(id))
    }

    async fn promote_config_to_draft(
        &self,
        id: Uuid,
        title: &str,
        description: &str,
        config: &Value,
    ) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let Some(existing) = state.configs.get_mut(&id) else {
            return Ok(false);
        };
        if existing.status != ConfigStatus::Generating {
            return Ok(false);
        }
        existing.status = ConfigStatus::Draft;
        existing.title = Some(title.to_string());
        existing.description = Some(description.to_string());
        existing.config = config.clone();
        existing.updated_at = Utc::now();
        Ok(true)
    }

    async fn mark_config_error(&self, id: Uuid, details: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let Some(existing) = state.configs.get_mut(&id) else {
            return Ok(false);
        };
        if existing.status != ConfigStatus::Generating {
            return Ok(false);
        }
        existing.status = ConfigStatus::Error;
        existing.error_details = Some(details.to_string());
        existing.updated_at = Utc::now();
        Ok(true)
    }

    async fn get_published_story(&self, id: Uuid) -> Result<Option<PublishedStory>> {
        Ok(self.story(id))
    }

    async fn update_after_moderation(&self, id: Uuid, is_adult: bool) -> Result<PublishedStory> {
        let mut state = self.state.lock().unwrap();
        let story = Self::story_at(&state.stories, id, GenerationStep::Moderation)?;

        let to = GenerationStep::ProtagonistGoal;
        validate_transition(story.generation_step, to)?;

        let entry = state.stories.get_mut(&id).unwrap();
        entry.is_adult_content = is_adult;
        entry.generation_step = Some(to);
        entry.status = status_from_step(to);
        entry.error_details = None;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn merge_setup_and_advance(
        &self,
        id: Uuid,
        expected: GenerationStep,
        setup_patch: &Value,
        to: GenerationStep,
    ) -> Result<PublishedStory> {
        let mut state = self.state.lock().unwrap();
        let story = Self::story_at(&state.stories, id, expected)?;
        validate_transition(story.generation_step, to)?;

        let entry = state.stories.get_mut(&id).unwrap();
        entry.setup = merge_setup(&entry.setup, setup_patch);
        entry.generation_step = Some(to);
        entry.status = status_from_step(to);
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn commit_scene_plan(
        &self,
        id: Uuid,
        scene_content: &Value,
        pending_char_gen: i32,
        pending_card_img: i32,
    ) -> Result<PublishedStory> {
        let mut state = self.state.lock().unwrap();
        let story = Self::story_at(&state.stories, id, GenerationStep::ScenePlanner)?;

        let counters = PendingCounters::new(pending_char_gen, pending_card_img, 0);
        let to = determine_next_step(counters);
        validate_transition(story.generation_step, to)?;

        Self::upsert_scene(&mut state.scenes, id, INITIAL_STATE_HASH, scene_content);

        let entry = state.stories.get_mut(&id).unwrap();
        Self::apply_counters(entry, counters);
        entry.are_images_pending = counters.images_pending();
        entry.generation_step = Some(to);
        entry.status = status_from_step(to);
        entry.error_details = None;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn commit_character_batch(
        &self,
        id: Uuid,
        characters: &Value,
        char_image_count: i32,
    ) -> Result<PublishedStory> {
        let mut state = self.state.lock().unwrap();
        let story = Self::story_at(&state.stories, id, GenerationStep::CharacterGeneration)?;

        let scene = state
            .scenes
            .get(&(id, INITIAL_STATE_HASH.to_string()))
            .cloned()
            .ok_or_else(|| InvariantViolation {
                id,
                detail: "initial scene is missing while merging the character batch".to_string(),
            })?;

        let content = scene_with_characters(&scene.content, characters);
        Self::upsert_scene(&mut state.scenes, id, INITIAL_STATE_HASH, &content);

        let counters = PendingCounters::new(
            0,
            story.pending_card_img_tasks,
            story.pending_char_img_tasks + char_image_count,
        );
        let to = determine_next_step(counters);
        validate_transition(story.generation_step, to)?;

        let entry = state.stories.get_mut(&id).unwrap();
        Self::apply_counters(entry, counters);
        entry.are_images_pending = counters.images_pending();
        entry.generation_step = Some(to);
        entry.status = status_from_step(to);
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn decrement_image_counters(
        &self,
        id: Uuid,
        dec_card_img: i32,
        dec_char_img: i32,
    ) -> Result<PublishedStory> {
        let mut state = self.state.lock().unwrap();
        let story = state
            .stories
            .get(&id)
            .cloned()
            .ok_or_else(|| anyhow!("published story {id} not found"))?;

        let counters = story.counters().decremented(dec_card_img, dec_char_img);

        let in_sub_task_phase = matches!(
            story.generation_step,
            Some(
                GenerationStep::CharacterGeneration
                    | GenerationStep::CardImageGeneration
                    | GenerationStep::CharacterImageGeneration
            )
        );

        let (step, status, images_pending) = if in_sub_task_phase {
            if counters.all_clear() {
                if setup_marked_done(&story.setup) {
                    let reference = format!("{HISTORY_PREVIEW_REF_PREFIX}{id}");
                    let cover_needed = story.setup.get(SETUP_PREVIEW_KEY).is_some()
                        && !state.image_urls.contains_key(&reference);
                    let to = if cover_needed {
                        GenerationStep::CoverImageGeneration
                    } else {
                        GenerationStep::InitialSceneJson
                    };
                    validate_transition(story.generation_step, to)?;
                    (Some(to), status_from_step(to), cover_needed)
                } else {
                    let to = GenerationStep::SetupGeneration;
                    validate_transition(story.generation_step, to)?;
                    (Some(to), status_from_step(to), false)
                }
            } else {
                let to = determine_next_step(counters);
                if Some(to) != story.generation_step {
                    validate_transition(story.generation_step, to)?;
                }
                (Some(to), status_from_step(to), counters.images_pending())
            }
        } else {
            (story.generation_step, story.status, counters.images_pending())
        };

        let entry = state.stories.get_mut(&id).unwrap();
        Self::apply_counters(entry, counters);
        entry.are_images_pending = images_pending;
        entry.generation_step = step;
        entry.status = status;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn complete_cover_image(&self, id: Uuid) -> Result<PublishedStory> {
        let mut state = self.state.lock().unwrap();
        let story = Self::story_at(&state.stories, id, GenerationStep::CoverImageGeneration)?;

        let to = GenerationStep::InitialSceneJson;
        validate_transition(story.generation_step, to)?;

        let entry = state.stories.get_mut(&id).unwrap();
        entry.are_images_pending = false;
        entry.generation_step = Some(to);
        entry.status = status_from_step(to);
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn commit_setup(
        &self,
        id: Uuid,
        preview_prompt: Option<&str>,
        scene_focus: &str,
    ) -> Result<(PublishedStory, StoryScene)> {
        let mut state = self.state.lock().unwrap();
        let story = state
            .stories
            .get(&id)
            .cloned()
            .ok_or_else(|| anyhow!("published story {id} not found"))?;

        let at_setup_step = story.generation_step == Some(GenerationStep::SetupGeneration);
        let images_draining = matches!(
            story.generation_step,
            Some(GenerationStep::CardImageGeneration | GenerationStep::CharacterImageGeneration)
        );
        if !at_setup_step && !images_draining {
            return Err(TransitionError::Stale {
                expected: Some(GenerationStep::SetupGeneration),
                actual: story.generation_step,
            }
            .into());
        }

        let existing = state
            .scenes
            .get(&(id, INITIAL_STATE_HASH.to_string()))
            .map(|scene| scene.content.clone());
        let content = scene_with_focus(existing.as_ref(), scene_focus);
        let scene = Self::upsert_scene(&mut state.scenes, id, INITIAL_STATE_HASH, &content);

        let setup = setup_with_preview(&story.setup, preview_prompt);

        let advance = if at_setup_step {
            let reference = format!("{HISTORY_PREVIEW_REF_PREFIX}{id}");
            let cover_needed =
                preview_prompt.is_some() && !state.image_urls.contains_key(&reference);
            let to = if cover_needed {
                GenerationStep::CoverImageGeneration
            } else {
                GenerationStep::InitialSceneJson
            };
            validate_transition(Some(GenerationStep::SetupGeneration), to)?;
            Some((to, cover_needed))
        } else {
            None
        };

        let entry = state.stories.get_mut(&id).unwrap();
        entry.setup = setup;
        if let Some((to, cover_needed)) = advance {
            entry.are_images_pending = cover_needed;
            entry.generation_step = Some(to);
            entry.status = status_from_step(to);
        }
        entry.updated_at = Utc::now();
        Ok((entry.clone(), scene))
    }

    async fn commit_initial_scene(
        &self,
        id: Uuid,
        content: &Value,
    ) -> Result<(PublishedStory, StoryScene)> {
        let mut state = self.state.lock().unwrap();
        let story = Self::story_at(&state.stories, id, GenerationStep::InitialSceneJson)?;

        let scene = Self::upsert_scene(&mut state.scenes, id, INITIAL_STATE_HASH, content);

        let to = GenerationStep::Complete;
        validate_transition(story.generation_step, to)?;

        let summary = crate::schema::scene::scene_summary(content);
        Self::upsert_progress(
            &mut state.progress,
            story.user_id,
            id,
            INITIAL_STATE_HASH,
            summary.as_deref(),
        );

        let entry = state.stories.get_mut(&id).unwrap();
        Self::apply_counters(entry, PendingCounters::default());
        entry.are_images_pending = false;
        entry.is_first_scene_pending = false;
        entry.generation_step = Some(to);
        entry.status = StoryStatus::Ready;
        entry.error_details = None;
        entry.updated_at = Utc::now();
        Ok((entry.clone(), scene))
    }

    async fn mark_story_error(&self, id: Uuid, details: &str) -> Result<Option<PublishedStory>> {
        let mut state = self.state.lock().unwrap();
        let Some(entry) = state.stories.get_mut(&id) else {
            return Ok(None);
        };
        entry.status = StoryStatus::Error;
        entry.error_details = Some(details.to_string());
        entry.updated_at = Utc::now();
        Ok(Some(entry.clone()))
    }

    async fn find_scene(&self, story_id: Uuid, state_hash: &str) -> Result<Option<StoryScene>> {
        Ok(self.scene(story_id, state_hash))
    }

    async fn get_game_state(&self, id: Uuid) -> Result<Option<PlayerGameState>> {
        Ok(self.game_state(id))
    }

    async fn commit_player_scene(
        &self,
        game_state_id: Uuid,
        state_hash: &str,
        content: &Value,
        outcome: SceneOutcome,
        scene_summary: Option<&str>,
    ) -> Result<(PlayerGameState, StoryScene)> {
        let mut state = self.state.lock().unwrap();
        let game_state = state
            .game_states
            .get(&game_state_id)
            .cloned()
            .ok_or_else(|| anyhow!("player game state {game_state_id} not found"))?;

        if game_state.player_status != PlayerStatus::GeneratingScene {
            return Err(StaleNotification {
                entity: "player game state",
                id: game_state_id,
                detail: format!(
                    "expected generating_scene, session is {}",
                    game_state.player_status.as_str()
                ),
            }
            .into());
        }

        let scene = Self::upsert_scene(
            &mut state.scenes,
            game_state.published_story_id,
            state_hash,
            content,
        );

        Self::upsert_progress(
            &mut state.progress,
            game_state.player_id,
            game_state.published_story_id,
            state_hash,
            scene_summary,
        );

        let entry = state.game_states.get_mut(&game_state_id).unwrap();
        entry.current_scene_id = Some(scene.id);
        entry.last_activity_at = Utc::now();
        match outcome {
            SceneOutcome::Playing => {
                entry.player_status = PlayerStatus::Playing;
            }
            SceneOutcome::GameOver { ending_text } => {
                entry.player_status = PlayerStatus::Completed;
                entry.ending_text = Some(ending_text);
                entry.completed_at = Some(Utc::now());
            }
        }
        Ok((entry.clone(), scene))
    }

    async fn mark_game_state_error(
        &self,
        id: Uuid,
        details: &str,
    ) -> Result<Option<PlayerGameState>> {
        let mut state = self.state.lock().unwrap();
        let Some(entry) = state.game_states.get_mut(&id) else {
            return Ok(None);
        };
        entry.player_status = PlayerStatus::Error;
        entry.error_details = Some(details.to_string());
        entry.last_activity_at = Utc::now();
        Ok(Some(entry.clone()))
    }

    async fn get_generation_result(&self, task_id: Uuid) -> Result<Option<GenerationResult>> {
        Ok(self.state.lock().unwrap().results.get(&task_id).cloned())
    }

    async fn image_url_by_reference(&self, reference: &str) -> Result<Option<String>> {
        Ok(self.state.lock().unwrap().image_urls.get(reference).cloned())
    }
}

/// Builders for the common test fixtures.
pub(crate) fn story_fixture(step: GenerationStep) -> PublishedStory {
    let now = Utc::now();
    PublishedStory {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        config: json!({"genre": "mystery", "premise": "a harbor town with a secret"}),
        setup: json!({}),
        status: status_from_step(step),
        generation_step: Some(step),
        is_first_scene_pending: true,
        are_images_pending: false,
        pending_char_gen_tasks: 0,
        pending_card_img_tasks: 0,
        pending_char_img_tasks: 0,
        is_adult_content: false,
        language: "en".to_string(),
        error_details: None,
        created_at: now,
        updated_at: now,
    }
}

pub(crate) fn game_state_fixture(story_id: Uuid, status: PlayerStatus) -> PlayerGameState {
    PlayerGameState {
        id: Uuid::new_v4(),
        player_id: Uuid::new_v4(),
        published_story_id: story_id,
        current_scene_id: None,
        player_status: status,
        ending_text: None,
        completed_at: None,
        error_details: None,
        last_activity_at: Utc::now(),
    }
}
