pub(crate) mod dao_impl;
pub(crate) mod dao_trait;
pub(crate) mod game_state;
pub(crate) mod generation_result;
pub(crate) mod image_reference;
pub(crate) mod progress;
pub(crate) mod published_story;
pub(crate) mod scene;
pub(crate) mod story_config;

#[cfg(test)]
pub(crate) mod mock;

pub(crate) use dao_impl::PgDao;
pub(crate) use dao_trait::{OrchestratorDao, SceneOutcome};
