//! Defensive JSON extraction from model output.
//!
//! Models are asked for bare JSON but routinely wrap it in markdown fences
//! or append commentary. Parsing tries the raw text first, then a
//! fence-stripped view, then the outermost balanced JSON object or array.

use serde::de::DeserializeOwned;

/// Parse model output as `T`, tolerating fences and trailing prose.
pub fn parse_lenient<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(text.trim())
        .or_else(|e| match strip_fences(text) {
            Some(inner) => serde_json::from_str(inner),
            None => Err(e),
        })
        .or_else(|e| match outermost_json(text) {
            Some(slice) => serde_json::from_str(slice),
            None => Err(e),
        })
}

/// Strip a markdown code fence, returning the fenced body.
fn strip_fences(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let rest = trimmed.strip_prefix("```")?;
    // Language tag on the opening fence ("```json")
    let rest = match rest.split_once('\n') {
        Some((_tag, body)) => body,
        None => rest,
    };
    let end = rest.rfind("```")?;
    Some(rest[..end].trim())
}

/// Locate the outermost balanced `{...}` or `[...]` in free text.
///
/// Brace counting skips string literals and escapes, so commentary with
/// stray braces before or after the payload does not confuse it.
pub fn outermost_json(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let bytes = text.as_bytes();
    let open = bytes[start];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Build a repair prompt carrying the malformed output and the expected
/// shape, for the single retry the pipeline allows.
pub fn repair_prompt(expected_shape: &str, malformed: &str) -> String {
    format!(
        "Your previous response could not be parsed as JSON.\n\n\
         Previous response:\n{malformed}\n\n\
         Respond again with ONLY a valid JSON value of this shape, with no \
         markdown fences and no commentary:\n{expected_shape}"
    )
}
