//! Normalization and strict decoding of AI-produced JSON payloads.
//!
//! Generation workers return quasi-JSON: the document is frequently wrapped in
//! a fenced code block and occasionally truncated mid-object. All tolerance
//! lives here; everything downstream consumes strictly validated JSON.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde::de::{self, DeserializeOwned};
use serde_json::Value;

/// Strip a fenced code-block wrapper and balance curly braces.
///
/// Best-effort normalizer: the result is not guaranteed to parse. Callers must
/// follow up with [`validate_json`] or [`decode_strict`].
pub fn extract_json_content(raw: &str) -> String {
    let trimmed = raw.trim();

    if let Some(inner) = fenced_block(trimmed) {
        return balance_braces(inner.trim());
    }

    // No complete fence matched; shave stray markers off either end.
    let mut body = trimmed;
    if let Some(rest) = body.strip_prefix("```") {
        // Drop the optional language tag up to the first newline.
        body = match rest.find('\n') {
            Some(idx) => &rest[idx + 1..],
            None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
        };
    }
    if let Some(rest) = body.trim_end().strip_suffix("```") {
        body = rest;
    }

    balance_braces(body.trim())
}

/// Locate the first complete ``` ... ``` block and return its inner content.
fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_marker = &text[open + 3..];

    // The opening marker may carry a language tag terminated by a newline.
    let content_start = after_marker.find('\n').map(|idx| idx + 1).unwrap_or(0);
    let content = &after_marker[content_start..];

    let close = content.find("```")?;
    Some(&content[..close])
}

/// Append missing closing braces or trim excess trailing ones.
///
/// The count is naive (string literals containing braces skew it), which
/// matches the tolerance contract: strict validation decides acceptability.
fn balance_braces(text: &str) -> String {
    let opens = text.chars().filter(|c| *c == '{').count();
    let closes = text.chars().filter(|c| *c == '}').count();

    if opens > closes {
        let mut balanced = text.to_string();
        balanced.extend(std::iter::repeat_n('}', opens - closes));
        return balanced;
    }

    if closes > opens {
        let mut excess = closes - opens;
        let mut balanced = text.trim_end();
        while excess > 0 {
            let Some(rest) = balanced.strip_suffix('}') else {
                break;
            };
            balanced = rest.trim_end();
            excess -= 1;
        }
        return balanced.to_string();
    }

    text.to_string()
}

/// Strict syntactic check without retaining the parsed document.
pub fn validate_json(raw: &str) -> Result<()> {
    serde_json::from_str::<de::IgnoredAny>(raw).context("payload is not valid JSON")?;
    Ok(())
}

/// Strict syntactic check followed by a typed decode.
pub fn decode_strict<T: DeserializeOwned>(raw: &str) -> Result<T> {
    validate_json(raw)?;
    serde_json::from_str(raw).context("payload does not match the expected shape")
}

/// Parse a raw payload into a generic JSON document.
pub fn parse_value(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).context("payload is not valid JSON")
}

/// Boolean field that generation models encode inconsistently.
///
/// Accepts `true`/`false`, integer and float `0`/`1`, and the strings
/// `"0"`, `"1"`, `"true"`, `"false"` (case-insensitive). Everything else is a
/// decode error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LenientBool(pub bool);

impl From<LenientBool> for bool {
    fn from(value: LenientBool) -> Self {
        value.0
    }
}

impl<'de> Deserialize<'de> for LenientBool {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        struct LenientBoolVisitor;

        impl de::Visitor<'_> for LenientBoolVisitor {
            type Value = LenientBool;

            fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                formatter.write_str("a boolean, 0/1 number, or \"true\"/\"false\"/\"0\"/\"1\"")
            }

            fn visit_bool<E: de::Error>(self, value: bool) -> Result<Self::Value, E> {
                Ok(LenientBool(value))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
                match value {
                    0 => Ok(LenientBool(false)),
                    1 => Ok(LenientBool(true)),
                    other => Err(E::custom(format!("integer {other} is not a boolean"))),
                }
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
                match value {
                    0 => Ok(LenientBool(false)),
                    1 => Ok(LenientBool(true)),
                    other => Err(E::custom(format!("integer {other} is not a boolean"))),
                }
            }

            #[allow(clippy::float_cmp)]
            fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
                if value == 0.0 {
                    Ok(LenientBool(false))
                } else if value == 1.0 {
                    Ok(LenientBool(true))
                } else {
                    Err(E::custom(format!("float {value} is not a boolean")))
                }
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
                if value.eq_ignore_ascii_case("true") || value == "1" {
                    Ok(LenientBool(true))
                } else if value.eq_ignore_ascii_case("false") || value == "0" {
                    Ok(LenientBool(false))
                } else {
                    Err(E::custom(format!("string {value:?} is not a boolean")))
                }
            }
        }

        deserializer.deserialize_any(LenientBoolVisitor)
    }
}
