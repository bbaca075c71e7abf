//! Reading JSON out of model completions
//!
//! Strict parsing takes the completion as-is. Relaxed parsing also strips
//! Markdown code fences and falls back to the outermost `{...}` or `[...]`
//! span when the model wrapped its JSON in prose.

use serde::de::DeserializeOwned;

/// Parse the whole completion (surrounding whitespace allowed)
pub fn parse_strict<T: DeserializeOwned>(text: &str) -> Result<T, String> {
    serde_json::from_str(text.trim()).map_err(|e| e.to_string())
}

/// Parse the first JSON span in the completion that deserializes as `T`
pub fn parse_relaxed<T: DeserializeOwned>(text: &str) -> Result<T, String> {
    let body = strip_code_fences(text);
    let mut last_error = String::from("no JSON found in response");

    let spans = [
        Some(body),
        extract_outermost(body, '{', '}'),
        extract_outermost(body, '[', ']'),
    ];
    for span in spans.into_iter().flatten() {
        match serde_json::from_str::<T>(span) {
            Ok(value) => return Ok(value),
            Err(e) => last_error = e.to_string(),
        }
    }

    Err(last_error)
}

/// Remove a surrounding Markdown code fence (with or without a `json` tag)
pub fn strip_code_fences(text: &str) -> &str {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```") {
        // Drop the info string ("json") up to the first newline
        body = match rest.find('\n') {
            Some(newline) => &rest[newline + 1..],
            None => rest.trim_start_matches("json"),
        };
    }
    if let Some(rest) = body.trim_end().strip_suffix("```") {
        body = rest;
    }
    body.trim()
}

/// Span from the first `open` to the last `close`, inclusive
pub fn extract_outermost(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n[1, 2]\n```"), "[1, 2]");
        assert_eq!(strip_code_fences("```\n{\"a\": 1}\n```  "), "{\"a\": 1}");
        assert_eq!(strip_code_fences("  [3]  "), "[3]");
    }

    #[test]
    fn test_extract_outermost() {
        assert_eq!(
            extract_outermost("Here you go: [1, [2]] thanks", '[', ']'),
            Some("[1, [2]]")
        );
        assert_eq!(extract_outermost("] nothing [", '[', ']'), None);
        assert_eq!(extract_outermost("plain text", '{', '}'), None);
    }

    #[test]
    fn test_strict_rejects_prose() {
        assert!(parse_strict::<Value>(" {\"a\": 1} ").is_ok());
        assert!(parse_strict::<Value>("Sure! {\"a\": 1}").is_err());
    }

    #[test]
    fn test_relaxed_accepts_fences_and_prose() {
        let v: Value = parse_relaxed("```json\n{\"codes\": []}\n```").unwrap();
        assert_eq!(v["codes"], Value::Array(vec![]));

        let v: Vec<u32> = parse_relaxed("The answer is [1, 2, 3].").unwrap();
        assert_eq!(v, vec![1, 2, 3]);

        assert!(parse_relaxed::<Value>("no json here").is_err());
    }
}
