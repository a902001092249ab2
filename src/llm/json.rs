//! Extracts a JSON object from an LLM response that may be wrapped in a
//! markdown code fence or preceded by prose, grounded on the cleanup step
//! the teacher's extractor used before calling `serde_json::from_str`.

use crate::error::{ClassificationError, Result};
use serde::de::DeserializeOwned;

/// Strips a leading/trailing ```json fence (or bare ```) and surrounding
/// whitespace, then finds the outermost `{...}` span and parses it.
pub fn parse_json_object<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let cleaned = strip_code_fence(raw);
    let object_span = extract_object_span(cleaned)
        .ok_or_else(|| ClassificationError::InvalidLlmResponse("no JSON object found".to_string()))?;
    serde_json::from_str(object_span)
        .map_err(|e| ClassificationError::InvalidLlmResponse(format!("{e}: {object_span}")))
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_lang = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_lang.strip_suffix("```").unwrap_or(without_lang).trim()
}

fn extract_object_span(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    for (i, c) in s[start..].char_indices() {
        if escape {
            escape = false;
            continue;
        }
        match c {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        family_code: String,
        confidence: f64,
    }

    #[test]
    fn parses_bare_json() {
        let raw = r#"{"family_code": "601", "confidence": 0.92}"#;
        let parsed: Sample = parse_json_object(raw).unwrap();
        assert_eq!(
            parsed,
            Sample {
                family_code: "601".to_string(),
                confidence: 0.92
            }
        );
    }

    #[test]
    fn parses_fenced_json_with_prose() {
        let raw = "Here is the classification:\n```json\n{\"family_code\": \"601\", \"confidence\": 0.5}\n```\nLet me know if you need more.";
        let parsed: Sample = parse_json_object(raw).unwrap();
        assert_eq!(parsed.family_code, "601");
    }

    #[test]
    fn rejects_no_object() {
        let raw = "I cannot classify this invoice.";
        assert!(parse_json_object::<Sample>(raw).is_err());
    }

    #[test]
    fn handles_nested_braces_in_strings() {
        let raw = r#"{"family_code": "{weird}", "confidence": 1.0}"#;
        let parsed: Sample = parse_json_object(raw).unwrap();
        assert_eq!(parsed.family_code, "{weird}");
    }
}
