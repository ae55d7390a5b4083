//! Markdown fence stripping and lenient JSON extraction.

use serde_json::Value;

const FENCE: &str = "```";

/// Removes one surrounding markdown code fence, if the whole text is wrapped
/// in one. The opening fence may carry an info string (` ```json `).
/// Text without a complete surrounding fence is returned trimmed, otherwise
/// unchanged.
pub fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(after_open) = trimmed.strip_prefix(FENCE) else {
        return trimmed;
    };
    let Some(inner) = after_open.strip_suffix(FENCE) else {
        return trimmed;
    };
    let body = match inner.split_once('\n') {
        // The first line is the info string; it never contains JSON syntax.
        Some((info, rest)) if is_info_string(info) => rest,
        _ => inner,
    };
    body.trim()
}

fn is_info_string(line: &str) -> bool {
    line.trim()
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+' | '.'))
}

/// Finds the first balanced `{ ... }` object in `text`, honouring string
/// literals and escapes.
pub fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parses JSON that may be fenced or surrounded by prose.
///
/// Tries the fence-stripped text first, then the first balanced object in
/// it. Returns the first parse error when both fail.
pub fn parse_json_lenient(text: &str) -> Result<Value, String> {
    let body = strip_fence(text);
    match serde_json::from_str(body) {
        Ok(value) => Ok(value),
        Err(first_error) => first_json_object(body)
            .filter(|candidate| candidate.len() < body.len())
            .and_then(|candidate| serde_json::from_str(candidate).ok())
            .ok_or_else(|| first_error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_strip_fence_with_language() {
        assert_eq!(strip_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
    }

    #[test]
    fn test_strip_fence_without_language() {
        assert_eq!(strip_fence("```\n[1, 2]\n```\n"), "[1, 2]");
    }

    #[test]
    fn test_strip_fence_single_line() {
        assert_eq!(strip_fence("```{\"a\": 1}```"), "{\"a\": 1}");
    }

    #[test]
    fn test_unfenced_text_is_only_trimmed() {
        assert_eq!(strip_fence("  {\"a\": 1}\n"), "{\"a\": 1}");
    }

    #[test]
    fn test_unterminated_fence_is_left_alone() {
        assert_eq!(strip_fence("```json\n{\"a\": 1}"), "```json\n{\"a\": 1}");
    }

    #[test]
    fn test_only_one_fence_pair_removed() {
        let inner = "```css\nbody {}\n```";
        let wrapped = format!("```markdown\n{inner}\n```");
        assert_eq!(strip_fence(&wrapped), inner);
    }

    #[test]
    fn test_first_json_object_skips_prose_and_braces_in_strings() {
        let text = r#"Here you go: {"title": "Use {braces}", "n": {"x": "\"}"}} trailing"#;
        assert_eq!(
            first_json_object(text),
            Some(r#"{"title": "Use {braces}", "n": {"x": "\"}"}}"#)
        );
        assert_eq!(first_json_object("no object {"), None);
    }

    #[test]
    fn test_parse_json_lenient_falls_back_to_embedded_object() {
        let text = "Sure! Here is the result:\n{\"articles\": []}\nLet me know.";
        assert_eq!(parse_json_lenient(text).unwrap(), json!({"articles": []}));
    }

    #[test]
    fn test_parse_json_lenient_reports_error() {
        assert!(parse_json_lenient("not json at all").is_err());
        assert!(parse_json_lenient("{\"broken\": ").is_err());
    }

    fn json_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(|n| json!(n)),
            "[a-zA-Z0-9 `{}\\[\\]\"\\\\]{0,16}".prop_map(Value::String),
        ]
    }

    fn json_value() -> impl Strategy<Value = Value> {
        json_leaf().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_fenced_and_bare_parse_identically(
            value in json_value(),
            info in prop_oneof![Just(""), Just("json"), Just("JSON")],
            pretty in any::<bool>(),
        ) {
            let raw = if pretty {
                serde_json::to_string_pretty(&value).unwrap()
            } else {
                serde_json::to_string(&value).unwrap()
            };
            let fenced = format!("```{info}\n{raw}\n```");
            prop_assert_eq!(parse_json_lenient(&fenced).unwrap(), value.clone());
            prop_assert_eq!(parse_json_lenient(&raw).unwrap(), value);
        }
    }
}
