//! Pull structured JSON out of free-form model output.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Find the JSON object in model output.
///
/// Tries a ```json fence, then any fence containing an object, then the first
/// balanced `{...}` span.
pub fn extract_json(output: &str) -> Option<String> {
    if let Some(start) = output.find("```json") {
        let after_marker = &output[start + 7..];
        if let Some(end) = after_marker.find("```") {
            return Some(after_marker[..end].trim().to_string());
        }
    }

    if let Some(start) = output.find("```") {
        let after_marker = &output[start + 3..];
        if let Some(end) = after_marker.find("```")
            && let Some(json_start) = after_marker[..end].find(['{', '['])
        {
            let content = after_marker[json_start..end].trim();
            if !content.is_empty() {
                return Some(content.to_string());
            }
        }
    }

    let start = output.find('{')?;
    let mut depth = 0;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in output[start..].char_indices() {
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
                    return Some(output[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse model output into a JSON value, accepting bare JSON or JSON
/// embedded in prose.
pub fn parse_value(output: &str) -> Result<Value, String> {
    let trimmed = output.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed)
        && (value.is_object() || value.is_array())
    {
        return Ok(value);
    }
    let candidate = extract_json(output).ok_or_else(|| "no JSON found in output".to_string())?;
    serde_json::from_str(&candidate).map_err(|e| format!("invalid JSON: {}", e))
}

/// Parse model output into a typed value.
pub fn parse_json<T: DeserializeOwned>(output: &str) -> Result<T, String> {
    let value = parse_value(output)?;
    serde_json::from_value(value).map_err(|e| format!("unexpected JSON shape: {}", e))
}

/// Parse model output that must be a single JSON object.
pub fn parse_object<T: DeserializeOwned>(output: &str) -> Result<T, String> {
    let value = parse_value(output)?;
    if !value.is_object() {
        return Err("expected a JSON object".to_string());
    }
    serde_json::from_value(value).map_err(|e| format!("unexpected JSON shape: {}", e))
}
