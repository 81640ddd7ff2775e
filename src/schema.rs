//! Typed shapes of AI worker outputs.
//!
//! Decoding is strict: the content extractor has already normalized fencing
//! and braces, so anything that fails here is treated as malformed output and
//! routes the target entity to its error state.

pub mod characters;
pub mod moderation;
pub mod narrator;
pub mod planner;
pub mod scene;
pub mod setup;

use serde::Deserialize;
use thiserror::Error;

/// Wrapper some workers put around a single text result.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultEnvelope {
    pub result: String,
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("field {0:?} is missing or empty")]
    EmptyField(&'static str),
    #[error("scene is missing a non-empty \"ch\" choices array")]
    MissingChoices,
    #[error("character batch is empty")]
    EmptyBatch,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::json::decode_strict;

    #[test]
    fn result_envelope_decodes() {
        let envelope: ResultEnvelope =
            decode_strict("{\"result\": \"reach the lighthouse\"}").unwrap();
        assert_eq!(envelope.result, "reach the lighthouse");
    }

    #[test]
    fn result_envelope_rejects_missing_field() {
        assert!(decode_strict::<ResultEnvelope>("{\"res\": \"x\"}").is_err());
    }
}
