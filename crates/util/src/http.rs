//! # HTTP Utilities
//!
//! Response-handling helpers shared by the provider client and the engine.

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Return a user-friendly hint for common HTTP status codes.
///
/// # Example
/// ```rust
/// use signflow_util::status_error_message;
///
/// let hint = status_error_message(401).unwrap();
/// assert!(hint.contains("Unauthorized"));
/// assert!(status_error_message(404).is_none());
/// ```
pub fn status_error_message(status_code: u16) -> Option<String> {
    match status_code {
        400 => Some("Bad Request (400). Hint: check that the integration key has been granted consent for impersonation".into()),
        401 => Some("Unauthorized (401). Hint: the access token expired or the assertion was rejected".into()),
        403 => Some("Forbidden (403). Hint: check the principal's account membership and permission profile".into()),
        429 => Some("Too Many Requests (429). Hint: the provider's hourly API quota was exceeded".into()),
        _ => None,
    }
}

/// Parse HTTP response text into JSON, providing detailed errors on failure.
///
/// The error carries the originating status and a whitespace-collapsed preview
/// of at most 200 characters of the body.
pub fn parse_response_json_strict(text: &str, status: Option<StatusCode>) -> Result<Value, JsonParseError> {
    serde_json::from_str::<Value>(text).map_err(|error| {
        let status_note = status
            .map(|code| format!("status {code}"))
            .unwrap_or_else(|| "unknown status".to_string());
        let preview = truncate_response_preview(text, 200);

        JsonParseError::new(status_note, error, preview)
    })
}

/// Collapse whitespace and truncate a response body for error messages.
pub fn truncate_response_preview(text: &str, limit: usize) -> String {
    if text.trim().is_empty() {
        return "<empty>".to_string();
    }

    let mut preview = String::new();
    for ch in text.chars() {
        if preview.len() >= limit {
            preview.push_str("...");
            break;
        }
        match ch {
            '\n' | '\r' | '\t' => {
                if !preview.ends_with(' ') {
                    preview.push(' ');
                }
            }
            _ => preview.push(ch),
        }
    }

    preview.trim().to_string()
}

/// Error returned when strict JSON parsing of an HTTP response fails.
#[derive(Debug, Error)]
#[error("failed to parse JSON response ({status_note}): {source}. body preview: {body_preview}")]
pub struct JsonParseError {
    status_note: String,
    #[source]
    source: serde_json::Error,
    body_preview: String,
}

impl JsonParseError {
    pub fn new(status_note: String, source: serde_json::Error, body_preview: String) -> Self {
        Self {
            status_note,
            source,
            body_preview,
        }
    }

    pub fn body_preview(&self) -> &str {
        &self.body_preview
    }
}
