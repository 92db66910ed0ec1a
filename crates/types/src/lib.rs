//! Shared type definitions for the QuickSite command pipeline.
//!
//! The management API speaks JSON, and the field names here follow its wire
//! format (`command`, `urlParams`, `abortOnFail`) so that batch documents
//! produced by the admin console load without translation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub mod batch;

pub use batch::{AbortInfo, BatchReport, BatchState, ExecutionBatch, PhaseOutcome, PostCommandTemplate, PrePhaseOutcome};

/// HTTP method used when dispatching a command.
///
/// The wire format is the uppercase method name; lowercase is accepted on
/// input because hand-written batch documents use both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    #[serde(rename = "GET", alias = "get")]
    Get,
    #[serde(rename = "POST", alias = "post")]
    Post,
    #[serde(rename = "PUT", alias = "put")]
    Put,
    #[serde(rename = "PATCH", alias = "patch")]
    Patch,
    #[serde(rename = "DELETE", alias = "delete")]
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Whether requests with this method carry the params map as a JSON body.
    pub fn has_body(&self) -> bool {
        !matches!(self, Method::Get)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named remote operation plus its parameters.
///
/// Commands are opaque to the executor: `name` identifies an operation on the
/// management API and `params` is forwarded verbatim as the request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Remote operation identifier, e.g. `addRoute` or `editStructure`.
    #[serde(rename = "command")]
    pub name: String,
    /// JSON parameter bag sent as the request body (may be empty).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
    /// Ordered path segments appended to the endpoint.
    #[serde(default, rename = "urlParams", skip_serializing_if = "Vec::is_empty")]
    pub url_params: Vec<String>,
    /// Explicit method override; inferred from `params` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<Method>,
    /// Pre-phase only: whether a failure halts the remaining batch.
    /// Unset means true. Main-phase commands ignore this field.
    #[serde(default, rename = "abortOnFail", skip_serializing_if = "Option::is_none")]
    pub abort_on_fail: Option<bool>,
}

impl Command {
    /// Build a command with no parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Map::new(),
            url_params: Vec::new(),
            method: None,
            abort_on_fail: None,
        }
    }

    /// Build a command with a parameter map.
    pub fn with_params(name: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            params,
            ..Self::new(name)
        }
    }

    /// Effective HTTP method: the explicit override when present, otherwise
    /// GET for parameterless commands and POST for everything else.
    pub fn effective_method(&self) -> Method {
        self.method.unwrap_or(if self.params.is_empty() { Method::Get } else { Method::Post })
    }

    /// Effective abort policy for the pre-phase; defaults to true.
    pub fn aborts_on_fail(&self) -> bool {
        self.abort_on_fail.unwrap_or(true)
    }
}

/// Which part of a batch run produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Destructive-reset prefix generated from current remote state.
    Reset,
    /// Must-succeed provisioning commands.
    Pre,
    /// The user/AI-specified payload.
    Main,
    /// Lazily resolved follow-up commands.
    Post,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Reset => "reset",
            Phase::Pre => "pre",
            Phase::Main => "main",
            Phase::Post => "post",
        };
        f.write_str(label)
    }
}

/// Outcome of running one command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// The command name that was executed.
    pub command: String,
    /// Transport success and an acceptable status or explicit success flag.
    pub success: bool,
    /// True when a 404 during the reset prefix was treated as "already
    /// absent" rather than a failure.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
    /// Parsed response body, or a synthetic error object for transport and
    /// protocol failures.
    pub data: Value,
    /// Wall-clock time for the single call.
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
    /// Phase that issued the command.
    pub phase: Phase,
}

impl ExecutionResult {
    /// Human-oriented one-line message extracted from the response body.
    pub fn message(&self) -> String {
        if self.skipped {
            return "Skipped (not found)".into();
        }
        for key in ["error", "message"] {
            if let Some(text) = self.data.get(key).and_then(Value::as_str) {
                return text.to_string();
            }
        }
        if self.success { "Success".into() } else { "Failed".into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_round_trip_minimal() {
        let json = r#"{"command": "getRoutes"}"#;
        let cmd: Command = serde_json::from_str(json).expect("deserialize Command");
        assert_eq!(cmd.name, "getRoutes");
        assert!(cmd.params.is_empty());
        assert!(cmd.url_params.is_empty());
        assert_eq!(cmd.effective_method(), Method::Get);
        assert!(cmd.aborts_on_fail());

        let back = serde_json::to_string(&cmd).expect("serialize Command");
        assert_eq!(back, r#"{"command":"getRoutes"}"#);
    }

    #[test]
    fn command_infers_post_when_params_present() {
        let cmd: Command = serde_json::from_str(r#"{"command": "addRoute", "params": {"route": "blog"}}"#).expect("deserialize");
        assert_eq!(cmd.effective_method(), Method::Post);
    }

    #[test]
    fn explicit_method_overrides_inference() {
        let cmd: Command =
            serde_json::from_str(r#"{"command": "deleteRoute", "params": {"route": "blog"}, "method": "delete"}"#).expect("deserialize");
        assert_eq!(cmd.effective_method(), Method::Delete);
    }

    #[test]
    fn abort_on_fail_reads_wire_field() {
        let cmd: Command = serde_json::from_str(r#"{"command": "addRoute", "abortOnFail": false}"#).expect("deserialize");
        assert!(!cmd.aborts_on_fail());
    }

    #[test]
    fn command_without_name_is_rejected() {
        let result = serde_json::from_str::<Command>(r#"{"params": {"route": "blog"}}"#);
        assert!(result.is_err(), "entries missing the command field must not deserialize");
    }

    #[test]
    fn execution_result_message_prefers_error_field() {
        let result = ExecutionResult {
            command: "addRoute".into(),
            success: false,
            skipped: false,
            data: json!({"error": "Route already exists", "message": "conflict"}),
            duration_ms: 12,
            phase: Phase::Pre,
        };
        assert_eq!(result.message(), "Route already exists");
    }

    #[test]
    fn skipped_result_message_is_fixed() {
        let result = ExecutionResult {
            command: "deleteLang".into(),
            success: true,
            skipped: true,
            data: json!({"status": 404}),
            duration_ms: 3,
            phase: Phase::Reset,
        };
        assert_eq!(result.message(), "Skipped (not found)");
    }
}
