//! Narrator output: the enriched draft config.

use serde::Deserialize;
use serde_json::Value;

use super::SchemaError;

/// Mandatory draft fields the narrator must produce. The optional enrichment
/// fields (`p_desc`, `pp.th` themes, `pp.wl` world lore) are not modeled:
/// the full object is merged into the stored config blob as-is.
#[derive(Debug, Clone, Deserialize)]
pub struct NarratorDraft {
    /// Title.
    pub t: String,
    /// Short description.
    pub sd: String,
}

impl NarratorDraft {
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.t.trim().is_empty() {
            return Err(SchemaError::EmptyField("t"));
        }
        if self.sd.trim().is_empty() {
            return Err(SchemaError::EmptyField("sd"));
        }
        Ok(())
    }
}

/// Shallow-merge the narrator object into the existing config blob.
pub fn merge_into_config(existing: &Value, draft_object: &Value) -> Value {
    let mut merged = existing.as_object().cloned().unwrap_or_default();
    if let Some(fields) = draft_object.as_object() {
        for (key, value) in fields {
            merged.insert(key.clone(), value.clone());
        }
    }
    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::json::decode_strict;
    use serde_json::json;

    #[test]
    fn decodes_full_draft_and_merge_keeps_enrichment_fields() {
        let object = json!({
            "t": "The Hollow Crown",
            "sd": "A usurper's bargain",
            "p_desc": "A disgraced herald",
            "pp": {"th": ["betrayal", "loyalty"], "wl": "The old kingdom"}
        });

        let draft: NarratorDraft = decode_strict(&object.to_string()).unwrap();
        draft.validate().unwrap();
        assert_eq!(draft.t, "The Hollow Crown");

        let merged = merge_into_config(&json!({"genre": "mystery"}), &object);
        assert_eq!(merged["pp"]["th"][0], "betrayal");
        assert_eq!(merged["p_desc"], "A disgraced herald");
    }

    #[test]
    fn missing_title_fails_validation() {
        let draft: NarratorDraft =
            decode_strict(&json!({"t": "  ", "sd": "x"}).to_string()).unwrap();
        assert!(matches!(
            draft.validate(),
            Err(SchemaError::EmptyField("t"))
        ));
    }

    #[test]
    fn missing_mandatory_field_fails_decode() {
        assert!(decode_strict::<NarratorDraft>(&json!({"sd": "x"}).to_string()).is_err());
    }

    #[test]
    fn merge_overrides_existing_keys_and_keeps_others() {
        let existing = json!({"genre": "mystery", "t": "old title"});
        let draft = json!({"t": "new title", "sd": "short"});
        let merged = merge_into_config(&existing, &draft);
        assert_eq!(merged["genre"], "mystery");
        assert_eq!(merged["t"], "new title");
        assert_eq!(merged["sd"], "short");
    }
}
