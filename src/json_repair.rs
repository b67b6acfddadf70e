//! Tolerant JSON parsing for LLM output (C3, spec.md §4.3).
//!
//! Strips surrounding code-fence markers, attempts a strict parse, and on
//! failure runs a small repair pass for the defects LLMs actually produce:
//! trailing commas, unclosed braces/brackets, unbalanced quotes, and stray
//! prose appended after the JSON payload.

use anyhow::{anyhow, Result};

/// Strip a leading/trailing ```json ... ``` or ``` ... ``` fence, if present.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        rest.trim().strip_suffix("```").unwrap_or(rest).trim()
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest.trim().strip_suffix("```").unwrap_or(rest).trim()
    } else {
        trimmed
    }
}

/// Parse `raw_text` as JSON, tolerating code fences and common malformations
/// (spec.md §4.3). Returns an error only when strict parse and the repair
/// pass both fail.
pub fn parse_json_tolerant(raw_text: &str) -> Result<serde_json::Value> {
    let stripped = strip_code_fence(raw_text);

    if let Ok(value) = serde_json::from_str(stripped) {
        return Ok(value);
    }

    let repaired = repair(stripped);
    serde_json::from_str(&repaired).map_err(|e| {
        anyhow!(
            "JSON parse failed after repair: {} (excerpt: {})",
            e,
            bounded_excerpt(stripped)
        )
    })
}

/// First 500 + last 500 chars of `text`, for bounded log excerpts
/// (spec.md §7 "log a bounded excerpt").
pub fn bounded_excerpt(text: &str) -> String {
    const HALF: usize = 500;
    let len = text.chars().count();
    if len <= HALF * 2 {
        return text.to_string();
    }
    let head: String = text.chars().take(HALF).collect();
    let tail: String = text.chars().skip(len - HALF).collect();
    format!("{head}...<truncated>...{tail}")
}

/// Best-effort repair of common LLM JSON defects.
fn repair(input: &str) -> String {
    let mut s = input.trim().to_string();

    // Drop stray prose after the final closing brace/bracket.
    if let Some(last_brace) = s.rfind(['}', ']']) {
        s.truncate(last_brace + 1);
    }

    // Remove trailing commas before a closing brace/bracket.
    s = remove_trailing_commas(&s);

    // Balance unclosed braces/brackets by appending the missing closers.
    s = balance_delimiters(&s);

    s
}

fn remove_trailing_commas(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }
        result.push(chars[i]);
        i += 1;
    }
    result
}

fn balance_delimiters(input: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escape = false;
    let mut quote_unbalanced = false;

    for c in input.chars() {
        if escape {
            escape = false;
            continue;
        }
        match c {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '{' if !in_string => stack.push('}'),
            '[' if !in_string => stack.push(']'),
            '}' | ']' if !in_string => {
                stack.pop();
            }
            _ => {}
        }
    }
    if in_string {
        quote_unbalanced = true;
    }

    let mut result = input.to_string();
    if quote_unbalanced {
        result.push('"');
    }
    while let Some(closer) = stack.pop() {
        result.push(closer);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_code_fence() {
        let raw = "```json\n{\"bridges\":[]}\n```";
        assert_eq!(strip_code_fence(raw), "{\"bridges\":[]}");
    }

    #[test]
    fn strips_bare_code_fence() {
        let raw = "```\n{\"bridges\":[]}\n```";
        assert_eq!(strip_code_fence(raw), "{\"bridges\":[]}");
    }

    #[test]
    fn parses_clean_json_directly() {
        let value = parse_json_tolerant(r#"{"bridges":[]}"#).unwrap();
        assert!(value.get("bridges").is_some());
    }

    #[test]
    fn repairs_trailing_comma_inside_fence() {
        // spec.md §8 scenario 6.
        let raw = r#"```json
{"bridges":[{"targetIndex":0,"bridgeType":"conceptual","strength":0.82,"explanation":"x","bridgeConcepts":["x","y"],}]}
```"#;
        let value = parse_json_tolerant(raw).unwrap();
        let bridges = value["bridges"].as_array().unwrap();
        assert_eq!(bridges.len(), 1);
        assert_eq!(bridges[0]["strength"], 0.82);
    }

    #[test]
    fn repairs_unclosed_brace() {
        let raw = r#"{"bridges":[{"targetIndex":0"#;
        let value = parse_json_tolerant(raw);
        assert!(value.is_ok());
    }

    #[test]
    fn drops_stray_prose_suffix() {
        let raw = r#"{"bridges":[]} Hope that helps!"#;
        let value = parse_json_tolerant(raw).unwrap();
        assert!(value.get("bridges").is_some());
    }

    #[test]
    fn unrecoverable_garbage_errors() {
        let raw = "not json at all, just prose with no braces";
        assert!(parse_json_tolerant(raw).is_err());
    }

    #[test]
    fn bounded_excerpt_truncates_long_text() {
        let long = "a".repeat(2000);
        let excerpt = bounded_excerpt(&long);
        assert!(excerpt.contains("<truncated>"));
        assert!(excerpt.len() < long.len());
    }

    #[test]
    fn bounded_excerpt_passes_through_short_text() {
        assert_eq!(bounded_excerpt("short"), "short");
    }
}
