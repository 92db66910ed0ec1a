//! Batch execution engine: runs the pre, main, and post phases of an
//! [`ExecutionBatch`] strictly sequentially against a remote command API and
//! records a per-command outcome for every call that was attempted.
//!
//! - Exactly one command is in flight at a time; later commands may depend
//!   on side effects of earlier ones.
//! - Pre-phase failures abort the run unless the command opted out; main and
//!   post phases always continue past individual failures.
//! - Failures are captured as data (`ExecutionResult`), never thrown out of
//!   the executor.
//! - Settle and inter-command delays are timed waits, the only consistency
//!   mechanism the filesystem-backed backend offers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use quicksite_types::{
    AbortInfo, BatchReport, BatchState, Command, ExecutionBatch, ExecutionResult, Phase, PhaseOutcome, PrePhaseOutcome,
};

use crate::config::{DEFAULT_INTER_COMMAND_DELAY_MS, DEFAULT_SETTLE_DELAY_MS, ExecutorConfig};
use crate::reset;
use crate::resolve::{EndpointResolver, PostCommandResolver};

pub mod dispatch;
pub use dispatch::{CommandDispatcher, DispatchOutcome, HttpDispatcher};

/// Receives phase transitions and per-command results as a run progresses.
///
/// A host UI subscribes here instead of driving the executor through
/// callbacks; all methods have empty defaults.
pub trait BatchObserver: Send + Sync {
    fn on_state_change(&self, state: BatchState) {
        let _ = state;
    }
    fn on_result(&self, command: &Command, result: &ExecutionResult) {
        let _ = (command, result);
    }
}

/// Observer that ignores everything.
pub struct NoopObserver;
impl BatchObserver for NoopObserver {}

/// How a phase loop ended.
enum PhaseEnd {
    Completed,
    Cancelled,
    Aborted(AbortInfo),
}

/// Sequential batch executor over a [`CommandDispatcher`].
pub struct BatchExecutor {
    dispatcher: Arc<dyn CommandDispatcher>,
    resolver: Option<Arc<dyn PostCommandResolver>>,
    settle_delay: Duration,
    inter_command_delay: Duration,
}

impl BatchExecutor {
    /// Build an executor over an explicit dispatcher with default delays.
    pub fn new(dispatcher: Arc<dyn CommandDispatcher>) -> Self {
        Self {
            dispatcher,
            resolver: None,
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
            inter_command_delay: Duration::from_millis(DEFAULT_INTER_COMMAND_DELAY_MS),
        }
    }

    /// Build the production executor: HTTP dispatcher plus endpoint-backed
    /// post-command resolver, delays from the config.
    pub fn from_config(config: &ExecutorConfig) -> anyhow::Result<Self> {
        let client = config.client()?;
        let dispatcher: Arc<dyn CommandDispatcher> = Arc::new(HttpDispatcher::new(client.clone()));
        let resolver: Arc<dyn PostCommandResolver> = Arc::new(EndpointResolver::new(client));
        Ok(Self {
            dispatcher,
            resolver: Some(resolver),
            settle_delay: config.settle_delay(),
            inter_command_delay: config.inter_command_delay(),
        })
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn PostCommandResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_delays(mut self, settle_delay: Duration, inter_command_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self.inter_command_delay = inter_command_delay;
        self
    }

    pub fn dispatcher(&self) -> &Arc<dyn CommandDispatcher> {
        &self.dispatcher
    }

    /// Run the provisioning commands that must precede the main payload.
    ///
    /// Success for a pre-command is `transport ok AND status < 400`. A
    /// failing command with `abortOnFail` true (or unset) halts the phase
    /// immediately; with `abortOnFail: false` the failure is recorded and
    /// execution continues. After a fully successful non-empty phase the
    /// executor sleeps the settle delay so the backend's filesystem state
    /// becomes consistent before anything reads it back.
    pub async fn run_pre_phase(&self, pre_commands: &[Command]) -> PrePhaseOutcome {
        let (results, end) = self.run_sequence(pre_commands, Phase::Pre, 0, &NoopObserver).await;
        match end {
            PhaseEnd::Aborted(info) => PrePhaseOutcome::aborted(info.error.clone(), info.failed_command.clone(), results),
            PhaseEnd::Cancelled => PrePhaseOutcome::cancelled(results),
            PhaseEnd::Completed => {
                if !pre_commands.is_empty() {
                    debug!(delay_ms = self.settle_delay.as_millis() as u64, "pre-phase complete, settling");
                    tokio::time::sleep(self.settle_delay).await;
                }
                PrePhaseOutcome::succeeded(results)
            }
        }
    }

    /// Run the main payload; never aborts early on failure.
    ///
    /// `reset_prefix_len` marks how many leading commands belong to a
    /// destructive-reset prefix: those record `Phase::Reset`, classify 404 as
    /// an acceptable skip, and are separated from the payload by a settle
    /// delay.
    pub async fn run_main_phase(&self, commands: &[Command], reset_prefix_len: usize) -> PhaseOutcome {
        let (results, end) = self.run_sequence(commands, Phase::Main, reset_prefix_len, &NoopObserver).await;
        PhaseOutcome {
            results,
            cancelled: matches!(end, PhaseEnd::Cancelled),
        }
    }

    /// Run resolved post-commands; identical policy to the main phase.
    pub async fn run_post_phase(&self, commands: &[Command]) -> PhaseOutcome {
        let (results, end) = self.run_sequence(commands, Phase::Post, 0, &NoopObserver).await;
        PhaseOutcome {
            results,
            cancelled: matches!(end, PhaseEnd::Cancelled),
        }
    }

    /// Resolve post-command templates against freshly read remote state.
    ///
    /// Must only be called after the main phase has fully completed: the
    /// templates reference configuration the main commands may have just
    /// changed. An empty result means no conditions matched and is not an
    /// error.
    pub async fn resolve_post_commands(
        &self,
        templates: &[quicksite_types::PostCommandTemplate],
        user_params: &serde_json::Map<String, Value>,
    ) -> anyhow::Result<Vec<Command>> {
        let resolver = self
            .resolver
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no post-command resolver configured"))?;
        resolver.resolve(templates, user_params).await
    }

    /// Drive a full batch through the state machine:
    /// `Idle -> RunningPre -> (Aborted | PreDone) -> RunningMain -> MainDone
    /// -> ResolvingPost -> RunningPost -> Complete`.
    pub async fn run_batch(&self, batch: &ExecutionBatch, observer: &dyn BatchObserver) -> BatchReport {
        let mut results = Vec::new();

        // Pre-phase (skipped straight to the main phase when empty).
        if !batch.pre_commands.is_empty() {
            observer.on_state_change(BatchState::RunningPre);
            let (pre_results, end) = self.run_sequence(&batch.pre_commands, Phase::Pre, 0, observer).await;
            results.extend(pre_results);
            match end {
                PhaseEnd::Aborted(info) => {
                    observer.on_state_change(BatchState::Aborted);
                    warn!(command = %info.failed_command.name, error = %info.error, "pre-command failed, batch aborted");
                    return BatchReport {
                        results,
                        aborted: Some(info),
                        cancelled: false,
                        completed_at: Utc::now(),
                    };
                }
                PhaseEnd::Cancelled => {
                    return BatchReport {
                        results,
                        aborted: None,
                        cancelled: true,
                        completed_at: Utc::now(),
                    };
                }
                PhaseEnd::Completed => {
                    observer.on_state_change(BatchState::PreDone);
                    tokio::time::sleep(self.settle_delay).await;
                }
            }
        }

        // Optional destructive-reset prefix, generated from current remote
        // state immediately before the main phase runs.
        let mut main_commands = Vec::new();
        let mut reset_prefix_len = 0;
        if batch.fresh_start {
            let reset_commands = reset::generate_reset_commands(self.dispatcher.as_ref()).await;
            info!(count = reset_commands.len(), "fresh start enabled, prepending reset commands");
            reset_prefix_len = reset_commands.len();
            main_commands.extend(reset_commands);
        }
        main_commands.extend(batch.main_commands.iter().cloned());

        observer.on_state_change(BatchState::RunningMain);
        let (main_results, end) = self.run_sequence(&main_commands, Phase::Main, reset_prefix_len, observer).await;
        results.extend(main_results);
        if matches!(end, PhaseEnd::Cancelled) {
            return BatchReport {
                results,
                aborted: None,
                cancelled: true,
                completed_at: Utc::now(),
            };
        }
        observer.on_state_change(BatchState::MainDone);

        // Post phase, only when templates exist.
        if !batch.post_commands_raw.is_empty() {
            tokio::time::sleep(self.settle_delay).await;
            observer.on_state_change(BatchState::ResolvingPost);

            let resolved = match self.resolve_post_commands(&batch.post_commands_raw, &batch.user_params).await {
                Ok(commands) => commands,
                Err(error) => {
                    warn!(%error, "post-command resolution failed; skipping post phase");
                    Vec::new()
                }
            };

            if resolved.is_empty() {
                info!("no post-commands to execute");
            } else {
                observer.on_state_change(BatchState::RunningPost);
                let (post_results, end) = self.run_sequence(&resolved, Phase::Post, 0, observer).await;
                results.extend(post_results);
                if matches!(end, PhaseEnd::Cancelled) {
                    return BatchReport {
                        results,
                        aborted: None,
                        cancelled: true,
                        completed_at: Utc::now(),
                    };
                }
            }
        }

        observer.on_state_change(BatchState::Complete);
        BatchReport {
            results,
            aborted: None,
            cancelled: false,
            completed_at: Utc::now(),
        }
    }

    /// The sequential loop shared by every phase. One command in flight at a
    /// time; the next dispatch only starts after the previous response (or
    /// transport failure) has been recorded.
    async fn run_sequence(
        &self,
        commands: &[Command],
        phase: Phase,
        reset_prefix_len: usize,
        observer: &dyn BatchObserver,
    ) -> (Vec<ExecutionResult>, PhaseEnd) {
        let mut results = Vec::with_capacity(commands.len());

        for (index, command) in commands.iter().enumerate() {
            let in_reset_prefix = phase == Phase::Main && index < reset_prefix_len;

            if phase != Phase::Pre && index > 0 {
                if reset_prefix_len > 0 && index == reset_prefix_len {
                    // Reset prefix just finished mutating config; give the
                    // backend time to sync before the payload reads it.
                    debug!(delay_ms = self.settle_delay.as_millis() as u64, "reset prefix complete, settling");
                    tokio::time::sleep(self.settle_delay).await;
                } else {
                    tokio::time::sleep(self.inter_command_delay).await;
                }
            }

            let started = Instant::now();
            let outcome = self.dispatcher.dispatch(command).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let result = match outcome {
                DispatchOutcome::Aborted => {
                    info!(command = %command.name, "in-flight call cancelled by user");
                    return (results, PhaseEnd::Cancelled);
                }
                DispatchOutcome::Transport(message) => ExecutionResult {
                    command: command.name.clone(),
                    success: false,
                    skipped: false,
                    data: Value::String(message),
                    duration_ms,
                    phase: if in_reset_prefix { Phase::Reset } else { phase },
                },
                DispatchOutcome::Response { status, body } => {
                    classify_response(command, phase, in_reset_prefix, status, body, duration_ms)
                }
            };

            debug!(
                command = %result.command,
                success = result.success,
                skipped = result.skipped,
                duration_ms = result.duration_ms,
                "command executed"
            );
            observer.on_result(command, &result);
            let failed = !result.success;
            results.push(result);

            if phase == Phase::Pre && failed && command.aborts_on_fail() {
                let recorded = results.last().map(|r| r.data.clone()).unwrap_or(Value::Null);
                let error = failure_message(&recorded, &command.name);
                return (results, PhaseEnd::Aborted(AbortInfo {
                    error,
                    failed_command: command.clone(),
                }));
            }
        }

        (results, PhaseEnd::Completed)
    }
}

/// The backend mirrors its status code in the response body; prefer that
/// over the HTTP status line when present so both framings classify the
/// same way.
pub(crate) fn effective_status(http_status: u16, body: &Value) -> u16 {
    body.get("status")
        .and_then(Value::as_u64)
        .map(|status| status as u16)
        .unwrap_or(http_status)
}

/// Whether a response body carries an explicit `success: true` flag. The
/// backend may report success with non-2xx framing.
pub(crate) fn body_reports_success(body: &Value) -> bool {
    body.get("success").and_then(Value::as_bool).unwrap_or(false)
}

/// Main-phase success rule, shared by reset generation and resolvers.
pub(crate) fn response_indicates_success(http_status: u16, body: &Value) -> bool {
    let status = effective_status(http_status, body);
    (200..300).contains(&status) || body_reports_success(body)
}

fn classify_response(command: &Command, phase: Phase, in_reset_prefix: bool, status: u16, body: Value, duration_ms: u64) -> ExecutionResult {
    let effective = effective_status(status, &body);

    let (success, skipped) = if in_reset_prefix && effective == 404 {
        // Deleting something that is already absent is the desired end state.
        (true, true)
    } else if phase == Phase::Pre {
        // Pre-commands demand agreement: the HTTP framing and the
        // body-mirrored status must both be acceptable.
        (status < 400 && effective < 400, false)
    } else {
        ((200..300).contains(&effective) || body_reports_success(&body), false)
    };

    ExecutionResult {
        command: command.name.clone(),
        success,
        skipped,
        data: body,
        duration_ms,
        phase: if in_reset_prefix { Phase::Reset } else { phase },
    }
}

fn failure_message(data: &Value, command_name: &str) -> String {
    for key in ["message", "error"] {
        if let Some(text) = data.get(key).and_then(Value::as_str) {
            return text.to_string();
        }
    }
    if let Value::String(text) = data {
        return text.clone();
    }
    format!("Command {command_name} failed")
}
