//! Small text helpers for logging.

/// Safe prefix of a string for log output.
///
/// Truncates on character boundaries and appends an ASCII ellipsis when the
/// input was cut.
pub fn string_short(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let mut prefix: String = text.chars().take(max_chars).collect();
    prefix.push_str("...");
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_input_is_unchanged() {
        assert_eq!(string_short("hello", 10), "hello");
    }

    #[test]
    fn long_input_is_truncated_with_ellipsis() {
        assert_eq!(string_short("hello world", 5), "hello...");
    }

    #[test]
    fn truncation_respects_multibyte_boundaries() {
        let text = "caféteria";
        assert_eq!(string_short(text, 4), "café...");
    }
}
