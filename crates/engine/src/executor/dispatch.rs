//! Command dispatch: the seam between the executor's sequencing logic and
//! the wire.
//!
//! The executor only ever sees a [`DispatchOutcome`]; whether it came from a
//! real HTTP call or a test double is invisible to it. [`HttpDispatcher`] is
//! the production implementation and owns the body-normalization ladder the
//! admin console used: 204 and empty bodies become synthetic success objects,
//! non-JSON bodies become synthetic protocol errors with a short excerpt.

use std::str::FromStr;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::future::{AbortHandle, abortable};
use serde_json::{Value, json};
use tracing::{debug, warn};

use quicksite_api::{ManagementClient, RawResponse};
use quicksite_types::Command;
use quicksite_util::http::build_command_path;
use quicksite_util::truncate_chars;

/// Maximum characters of a non-JSON body quoted in the synthetic error.
const INVALID_JSON_EXCERPT_CHARS: usize = 100;

/// Transport-level outcome of dispatching one command.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// The request completed. `body` is the parsed response, or a synthetic
    /// object when the backend sent 204, an empty body, or non-JSON.
    Response { status: u16, body: Value },
    /// The request never produced a response.
    Transport(String),
    /// The user aborted the in-flight call; the command is incomplete, not
    /// failed.
    Aborted,
}

/// Execute a single command against the remote system.
///
/// Implementations must not retry: retry policy belongs to the caller, and
/// the executor's contract is one dispatch per queued command.
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    async fn dispatch(&self, command: &Command) -> DispatchOutcome;
}

/// HTTP dispatcher backed by [`ManagementClient`].
pub struct HttpDispatcher {
    client: ManagementClient,
    in_flight: Mutex<Option<AbortHandle>>,
}

impl HttpDispatcher {
    pub fn new(client: ManagementClient) -> Self {
        Self {
            client,
            in_flight: Mutex::new(None),
        }
    }

    /// Abort the current in-flight request, if any.
    ///
    /// Only the network call is cancelled; side effects of previously
    /// completed commands are not rolled back.
    pub fn abort_in_flight(&self) {
        if let Ok(guard) = self.in_flight.lock()
            && let Some(handle) = guard.as_ref()
        {
            handle.abort();
        }
    }

    fn normalize_reply(command_name: &str, raw: RawResponse) -> DispatchOutcome {
        if raw.status == 204 {
            return DispatchOutcome::Response {
                status: 204,
                body: json!({
                    "status": 204,
                    "code": "operation.success",
                    "message": "Operation completed successfully"
                }),
            };
        }

        if raw.body.trim().is_empty() {
            return DispatchOutcome::Response {
                status: raw.status,
                body: json!({"status": raw.status, "message": "No response body"}),
            };
        }

        match serde_json::from_str::<Value>(&raw.body) {
            Ok(body) => DispatchOutcome::Response { status: raw.status, body },
            Err(parse_error) => {
                warn!(command = %command_name, status = raw.status, %parse_error, "response body is not valid JSON");
                DispatchOutcome::Response {
                    status: raw.status,
                    body: json!({
                        "status": 500,
                        "message": format!("Invalid JSON response: {}", truncate_chars(&raw.body, INVALID_JSON_EXCERPT_CHARS)),
                    }),
                }
            }
        }
    }
}

#[async_trait]
impl CommandDispatcher for HttpDispatcher {
    async fn dispatch(&self, command: &Command) -> DispatchOutcome {
        let method = command.effective_method();
        let path = build_command_path(&command.name, &command.url_params);
        let body = if method.has_body() && !command.params.is_empty() {
            Some(Value::Object(command.params.clone()))
        } else {
            None
        };
        debug!(command = %command.name, %method, %path, has_body = body.is_some(), "dispatching command");

        let reqwest_method = reqwest::Method::from_str(method.as_str()).unwrap_or(reqwest::Method::POST);
        let (request, handle) = abortable(self.client.send(reqwest_method, &path, body.as_ref()));
        if let Ok(mut guard) = self.in_flight.lock() {
            *guard = Some(handle);
        }
        let outcome = request.await;
        if let Ok(mut guard) = self.in_flight.lock() {
            *guard = None;
        }

        match outcome {
            Err(_aborted) => DispatchOutcome::Aborted,
            Ok(Err(client_error)) => DispatchOutcome::Transport(client_error.to_string()),
            Ok(Ok(raw)) => Self::normalize_reply(&command.name, raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_reply_passes_through_json() {
        let outcome = HttpDispatcher::normalize_reply(
            "getRoutes",
            RawResponse {
                status: 200,
                body: r#"{"status": 200, "data": {"flat_routes": []}}"#.into(),
            },
        );
        match outcome {
            DispatchOutcome::Response { status, body } => {
                assert_eq!(status, 200);
                assert_eq!(body["data"]["flat_routes"], json!([]));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn normalize_reply_synthesizes_204() {
        let outcome = HttpDispatcher::normalize_reply(
            "deleteRoute",
            RawResponse {
                status: 204,
                body: String::new(),
            },
        );
        match outcome {
            DispatchOutcome::Response { status, body } => {
                assert_eq!(status, 204);
                assert_eq!(body["code"], "operation.success");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn normalize_reply_flags_empty_body() {
        let outcome = HttpDispatcher::normalize_reply(
            "getStyles",
            RawResponse {
                status: 502,
                body: "  ".into(),
            },
        );
        match outcome {
            DispatchOutcome::Response { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body["message"], "No response body");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn normalize_reply_excerpts_invalid_json() {
        let html = format!("<html>{}</html>", "x".repeat(300));
        let outcome = HttpDispatcher::normalize_reply("getStyles", RawResponse { status: 200, body: html });
        match outcome {
            DispatchOutcome::Response { status, body } => {
                assert_eq!(status, 200);
                let message = body["message"].as_str().expect("message string");
                assert!(message.starts_with("Invalid JSON response: <html>"));
                assert!(message.len() < 150, "excerpt must be truncated: {}", message.len());
                assert_eq!(body["status"], 500);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
