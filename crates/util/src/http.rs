//! HTTP helpers: management-endpoint path building and strict JSON response
//! parsing with diagnostics for truncated or malformed payloads.

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde_json::Value;
use thiserror::Error;

/// Characters percent-encoded inside a single path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'<').add(b'>').add(b'`').add(b'#').add(b'?').add(b'{').add(b'}').add(b'/').add(b'%');

/// Build the request path for a management command.
///
/// The endpoint shape is `/{commandName}` with optional `/{urlParam}` path
/// segments appended; each segment is percent-encoded individually.
pub fn build_command_path(command_name: &str, url_params: &[String]) -> String {
    let mut path = format!("/{}", utf8_percent_encode(command_name, PATH_SEGMENT));
    for segment in url_params {
        path.push('/');
        path.push_str(&utf8_percent_encode(segment, PATH_SEGMENT).to_string());
    }
    path
}

/// Parse HTTP response text into JSON, providing detailed errors on failure.
///
/// The error message carries the HTTP status and a whitespace-collapsed
/// preview of the body, capped at 200 characters, to aid debugging truncated
/// or non-JSON payloads.
pub fn parse_response_json_strict(text: &str, status: u16) -> Result<Value, JsonParseError> {
    serde_json::from_str::<Value>(text).map_err(|error| {
        let preview = truncate_response_preview(text, 200);
        JsonParseError {
            status,
            source: error,
            body_preview: preview,
        }
    })
}

fn truncate_response_preview(text: &str, limit: usize) -> String {
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
#[error("failed to parse JSON response (status {status}): {source}. body preview: {body_preview}")]
pub struct JsonParseError {
    status: u16,
    #[source]
    source: serde_json::Error,
    body_preview: String,
}

impl JsonParseError {
    /// The truncated response preview captured during parsing.
    pub fn body_preview(&self) -> &str {
        &self.body_preview
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_plain_command_path() {
        assert_eq!(build_command_path("getRoutes", &[]), "/getRoutes");
    }

    #[test]
    fn appends_url_params_as_segments() {
        let params = vec!["page".to_string(), "home".to_string(), "showIds".to_string()];
        assert_eq!(build_command_path("getStructure", &params), "/getStructure/page/home/showIds");
    }

    #[test]
    fn encodes_reserved_characters_in_segments() {
        let params = vec!["a b/c".to_string()];
        assert_eq!(build_command_path("getTranslation", &params), "/getTranslation/a%20b%2Fc");
    }

    #[test]
    fn strict_parse_returns_value() {
        let value = parse_response_json_strict(r#"{"status": 200}"#, 200).expect("valid JSON");
        assert_eq!(value["status"], 200);
    }

    #[test]
    fn strict_parse_error_includes_preview() {
        let error = parse_response_json_strict("<html>Fatal error\nline 2</html>", 500).expect_err("not JSON");
        assert!(error.body_preview().contains("<html>Fatal error line 2"));
        let message = error.to_string();
        assert!(message.contains("status 500"), "unexpected message: {message}");
    }

    #[test]
    fn strict_parse_empty_body_preview() {
        let error = parse_response_json_strict("   ", 204).expect_err("empty body is not JSON");
        assert_eq!(error.body_preview(), "<empty>");
    }
}
