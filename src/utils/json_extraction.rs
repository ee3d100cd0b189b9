//! JSON object extraction from free-form oracle responses.
//!
//! Judges often wrap their verdict in a markdown fence or write reasoning
//! before it. Extraction tries, in order:
//! 1. A ```` ```json ```` fence, then any other fence
//! 2. The whole response, if it is an object
//! 3. The largest balanced object in the text that parses
//!
//! When an object was started but never closed, the result reports
//! truncation so callers can tell a cut-off response from a missing one.

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum JsonExtractionError {
    #[error("JSON appears truncated ({unclosed_braces} unclosed brace(s)): {partial_preview}...")]
    Truncated {
        partial_preview: String,
        unclosed_braces: usize,
    },
    #[error("No JSON object found in response starting with: '{content_preview}'")]
    NotFound { content_preview: String },
}

/// Bodies of every fenced code block, tagged with their language.
fn code_fences(content: &str) -> Vec<(String, String)> {
    let Some(re) = Regex::new(r"(?s)```([A-Za-z0-9_-]*)[ \t]*\r?\n(.*?)```").ok() else {
        return Vec::new();
    };
    re.captures_iter(content)
        .map(|c| (c[1].to_lowercase(), c[2].trim().to_string()))
        .collect()
}

/// Extracts the judge's JSON object from `content`.
pub fn extract_json_object(content: &str) -> Result<Map<String, Value>, JsonExtractionError> {
    let trimmed = content.trim();

    let fences = code_fences(trimmed);
    let tagged = fences.iter().filter(|(lang, _)| lang == "json");
    let untagged = fences.iter().filter(|(lang, _)| lang != "json");
    for (_, body) in tagged.chain(untagged) {
        if let Some(object) = parse_object(body) {
            return Ok(object);
        }
    }

    if let Some(object) = parse_object(trimmed) {
        return Ok(object);
    }

    if let Some(object) = largest_balanced_object(trimmed) {
        return Ok(object);
    }

    if let Some(start) = trimmed.find('{') {
        let unclosed = unclosed_braces(&trimmed[start..]);
        if unclosed > 0 {
            return Err(JsonExtractionError::Truncated {
                partial_preview: preview(&trimmed[start..], 100),
                unclosed_braces: unclosed,
            });
        }
    }

    Err(JsonExtractionError::NotFound {
        content_preview: preview(trimmed, 50),
    })
}

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Largest balanced object in `text` that parses, later ones winning ties.
///
/// Reasoning before the verdict may contain small JSON-like fragments; the
/// verdict itself is normally the biggest object.
fn largest_balanced_object(text: &str) -> Option<Map<String, Value>> {
    text.match_indices('{')
        .filter_map(|(start, _)| {
            let end = find_matching_brace(&text[start..])?;
            let object = parse_object(&text[start..=start + end])?;
            Some((end + 1, start, object))
        })
        .max_by(|(len_a, pos_a, _), (len_b, pos_b, _)| len_a.cmp(len_b).then(pos_a.cmp(pos_b)))
        .map(|(_, _, object)| object)
}

/// Index of the brace closing the object that `s` starts with.
///
/// Braces inside string literals (including escaped quotes) are ignored.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn unclosed_braces(s: &str) -> usize {
    let mut depth: isize = 0;
    let mut in_string = false;
    let mut escape_next = false;
    for c in s.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => depth -= 1,
            _ => {}
        }
    }
    depth.max(0) as usize
}

fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_object() {
        let obj = extract_json_object(r#"{"overall": 4}"#).unwrap();
        assert_eq!(obj["overall"], 4);
    }

    #[test]
    fn test_json_fence_preferred() {
        let response = "Here is my assessment.\n```text\nnot json\n```\n```json\n{\"overall\": 3}\n```";
        let obj = extract_json_object(response).unwrap();
        assert_eq!(obj["overall"], 3);
    }

    #[test]
    fn test_untagged_fence() {
        let obj = extract_json_object("```\n{\"overall\": 5}\n```").unwrap();
        assert_eq!(obj["overall"], 5);
    }

    #[test]
    fn test_reasoning_before_object() {
        let response = r#"The code uses {braces} in prose. Final verdict:
{"overall": 2, "dimensions": {"readability": 3}, "justification": "uses } in text"}"#;
        let obj = extract_json_object(response).unwrap();
        assert_eq!(obj["overall"], 2);
        assert_eq!(obj["dimensions"]["readability"], 3);
    }

    #[test]
    fn test_truncated_object() {
        let err = extract_json_object(r#"{"overall": 4, "dimensions": {"a": 1"#).unwrap_err();
        match err {
            JsonExtractionError::Truncated {
                unclosed_braces, ..
            } => assert_eq!(unclosed_braces, 2),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn test_not_found() {
        let err = extract_json_object("I cannot score this.").unwrap_err();
        assert!(matches!(err, JsonExtractionError::NotFound { .. }));
    }

    #[test]
    fn test_array_is_not_an_object() {
        let err = extract_json_object("[1, 2, 3]").unwrap_err();
        assert!(matches!(err, JsonExtractionError::NotFound { .. }));
    }

    #[test]
    fn test_find_matching_brace_ignores_strings() {
        let s = r#"{"a": "}\"{", "b": {}} trailing"#;
        let end = find_matching_brace(s).unwrap();
        assert_eq!(&s[..=end], r#"{"a": "}\"{", "b": {}}"#);
        assert_eq!(find_matching_brace("{ unclosed"), None);
    }
}
