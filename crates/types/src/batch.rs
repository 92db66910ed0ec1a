//! Batch-level types: the three-phase payload, per-run report, and the
//! state machine a run moves through.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Command, ExecutionResult};

/// An unresolved post-command template.
///
/// Post-commands cannot be finalized before the main phase runs: their
/// parameters reference configuration values the main commands may have just
/// changed. The optional `condition` is a boolean expression deciding whether
/// the entry applies at all; it is evaluated against freshly read remote
/// configuration at resolution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostCommandTemplate {
    #[serde(rename = "command")]
    pub name: String,
    /// Parameter template; string values may contain `{{ var }}` placeholders.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
    /// Boolean expression guarding the entry, e.g. `multilingual == true`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// The full payload for one executor run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionBatch {
    /// Provisioning commands that must succeed before the main phase runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_commands: Vec<Command>,
    /// The user/AI-specified payload, always fully attempted.
    #[serde(default)]
    pub main_commands: Vec<Command>,
    /// Templates resolved only after the main phase completes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_commands_raw: Vec<PostCommandTemplate>,
    /// Variables forwarded to post-command resolution alongside fresh
    /// remote configuration.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub user_params: Map<String, Value>,
    /// Prepend a destructive-reset prefix generated from current remote state.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fresh_start: bool,
}

impl ExecutionBatch {
    /// A batch consisting only of a main phase.
    pub fn from_main(main_commands: Vec<Command>) -> Self {
        Self {
            main_commands,
            ..Self::default()
        }
    }
}

/// The pre-phase command that stopped a run, plus why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbortInfo {
    pub error: String,
    #[serde(rename = "failedCommand")]
    pub failed_command: Command,
}

/// Outcome of the pre-phase as a whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrePhaseOutcome {
    /// False when an abort-on-fail command failed and halted the phase.
    pub success: bool,
    /// Set only on abort.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<AbortInfo>,
    /// True when the user cancelled the in-flight call. The interrupted
    /// command is incomplete, not failed, and has no result.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
    /// Results recorded up to and including the failing command.
    pub results: Vec<ExecutionResult>,
}

impl PrePhaseOutcome {
    pub fn succeeded(results: Vec<ExecutionResult>) -> Self {
        Self {
            success: true,
            aborted: None,
            cancelled: false,
            results,
        }
    }

    pub fn aborted(error: String, failed_command: Command, results: Vec<ExecutionResult>) -> Self {
        Self {
            success: false,
            aborted: Some(AbortInfo { error, failed_command }),
            cancelled: false,
            results,
        }
    }

    pub fn cancelled(results: Vec<ExecutionResult>) -> Self {
        Self {
            success: false,
            aborted: None,
            cancelled: true,
            results,
        }
    }
}

/// Results of a main or post phase run.
///
/// The result set always covers every command that was attempted, in order;
/// `cancelled` marks a run the user cut short.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseOutcome {
    pub results: Vec<ExecutionResult>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
}

/// Everything a completed (or aborted) run produced, in execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// Per-command outcomes across all phases that ran.
    pub results: Vec<ExecutionResult>,
    /// Set when an abort-on-fail pre-command halted the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<AbortInfo>,
    /// Set when the user cancelled the in-flight call; the interrupted
    /// command has no result and nothing was rolled back.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
    #[serde(rename = "completedAt")]
    pub completed_at: DateTime<Utc>,
}

impl BatchReport {
    pub fn succeeded_count(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }
}

/// Progress of one batch run.
///
/// `RunningPre` is skipped when there are no pre-commands, and the post
/// states are skipped when there are no post-command templates. `Aborted`
/// and `Complete` are terminal; a retry is a new batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchState {
    Idle,
    RunningPre,
    Aborted,
    PreDone,
    RunningMain,
    MainDone,
    ResolvingPost,
    RunningPost,
    Complete,
}

impl BatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchState::Aborted | BatchState::Complete)
    }
}
