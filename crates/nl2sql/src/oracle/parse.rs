use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use super::OracleError;

fn fenced_block_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").expect("fence regex should compile")
    })
}

/// Pulls the single JSON object out of a model reply. Accepts a bare object,
/// an object wrapped in a ```json fence, or an object surrounded by prose.
pub fn extract_json_object(content: &str) -> Result<Value, OracleError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(OracleError::EmptyResponse);
    }

    let mut candidates = Vec::with_capacity(3);
    candidates.push(trimmed);
    if let Some(captures) = fenced_block_regex().captures(trimmed)
        && let Some(body) = captures.get(1)
    {
        candidates.push(body.as_str().trim());
    }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && start < end
    {
        candidates.push(&trimmed[start..=end]);
    }

    let mut last_error = String::from("no JSON object found");
    for candidate in candidates {
        match serde_json::from_str::<Value>(candidate) {
            Ok(value @ Value::Object(_)) => return Ok(value),
            Ok(other) => last_error = format!("expected a JSON object, got {}", kind_of(&other)),
            Err(error) => last_error = error.to_string(),
        }
    }

    Err(OracleError::MalformedOutput(last_error))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
