//! Content-moderation verdict.

use serde::Deserialize;

use crate::util::json::LenientBool;

#[derive(Debug, Clone, Deserialize)]
pub struct ModerationVerdict {
    /// Adult-content flag; models encode it as bool, 0/1, or a string.
    pub ac: LenientBool,
    #[serde(default)]
    pub reasons: Option<Vec<String>>,
}

impl ModerationVerdict {
    pub fn is_adult(&self) -> bool {
        self.ac.into()
    }
}
