//! Local repair passes for malformed structured output.
//!
//! Models frequently wrap JSON in Markdown code fences or pad it with
//! prose. These passes operate on the already-obtained text only — repair
//! never re-issues a request. Two passes are tried in order, and the first
//! candidate that parses wins:
//!
//! 1. strip leading/trailing fenced-code delimiters
//! 2. extract the first top-level `{...}` or `[...]` span

use serde_json::Value;

/// Re-parse `raw` after applying the repair passes in order.
pub fn reparse_with_repairs(raw: &str) -> Option<Value> {
    let candidates = [strip_code_fences(raw), extract_bracketed_span(raw)];
    for candidate in candidates.into_iter().flatten() {
        if let Ok(value) = serde_json::from_str(&candidate) {
            return Some(value);
        }
    }
    None
}

/// Strip a surrounding fenced code block, returning the inner text.
///
/// Handles both bare ```` ``` ```` fences and language-tagged ones such as
/// ```` ```json ````. Returns `None` when no opening fence is present.
pub fn strip_code_fences(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let start = trimmed.find("```")?;
    let after_fence = &trimmed[start + 3..];

    // Skip the language tag (rest of the fence line)
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];

    let inner = match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    };

    let inner = inner.trim();
    if inner.is_empty() {
        None
    } else {
        Some(inner.to_string())
    }
}

/// Extract the first balanced top-level `{...}` or `[...]` span.
///
/// Tracks string literals and escapes so braces inside quoted values do not
/// confuse the balance count. Returns `None` when no opening bracket exists
/// or the span never closes.
pub fn extract_bracketed_span(raw: &str) -> Option<String> {
    let bytes = raw.as_bytes();
    let start = raw.find(['{', '['])?;
    let open = bytes[start];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            _ if in_string => {}
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(raw[start..=i].to_string());
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
    use serde_json::json;

    #[test]
    fn test_strip_tagged_fence() {
        let raw = "```json\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_code_fences(raw).unwrap(), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_bare_fence() {
        let raw = "```\n[1, 2, 3]\n```";
        assert_eq!(strip_code_fences(raw).unwrap(), "[1, 2, 3]");
    }

    #[test]
    fn test_strip_fence_with_leading_prose() {
        let raw = "Here is the result:\n```json\n{\"a\": 1}\n```\nHope that helps!";
        assert_eq!(strip_code_fences(raw).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn test_strip_no_fence_returns_none() {
        assert!(strip_code_fences("{\"a\": 1}").is_none());
    }

    #[test]
    fn test_extract_object_span() {
        let raw = "The answer is {\"a\": {\"b\": 2}} as requested.";
        assert_eq!(extract_bracketed_span(raw).unwrap(), "{\"a\": {\"b\": 2}}");
    }

    #[test]
    fn test_extract_array_span() {
        let raw = "sure: [1, [2, 3], 4] done";
        assert_eq!(extract_bracketed_span(raw).unwrap(), "[1, [2, 3], 4]");
    }

    #[test]
    fn test_extract_ignores_braces_inside_strings() {
        let raw = "x {\"text\": \"closing } inside\", \"n\": 1} y";
        assert_eq!(
            extract_bracketed_span(raw).unwrap(),
            "{\"text\": \"closing } inside\", \"n\": 1}"
        );
    }

    #[test]
    fn test_extract_unclosed_returns_none() {
        assert!(extract_bracketed_span("{\"a\": 1").is_none());
    }

    #[test]
    fn test_reparse_prefers_fence_pass() {
        let raw = "```json\n{\"winner\": \"fence\"}\n```";
        assert_eq!(
            reparse_with_repairs(raw).unwrap(),
            json!({"winner": "fence"})
        );
    }

    #[test]
    fn test_reparse_falls_back_to_span_pass() {
        let raw = "no fences here, just {\"winner\": \"span\"} in prose";
        assert_eq!(reparse_with_repairs(raw).unwrap(), json!({"winner": "span"}));
    }

    #[test]
    fn test_reparse_gives_up_on_hopeless_input() {
        assert!(reparse_with_repairs("not structured at all").is_none());
    }
}
