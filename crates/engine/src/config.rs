//! Executor configuration.
//!
//! All ambient inputs — base URL, token, delays — are collected into one
//! struct injected at construction, instead of being read from globals at
//! each call site.

use std::time::Duration;

use quicksite_api::{ClientError, ManagementClient};

/// Settle delay applied after mutating phases, in milliseconds.
///
/// The management backend persists to flat files and offers no
/// read-after-write consistency signal; a fixed wait after a burst of
/// mutations is the only mechanism it supports.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 1500;

/// Pause between consecutive commands within a phase, in milliseconds.
pub const DEFAULT_INTER_COMMAND_DELAY_MS: u64 = 50;

/// Per-request client timeout, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Explicit configuration for the batch executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Management API base URL, e.g. `https://mysite.example/management`.
    pub endpoint_base: String,
    /// Bearer token forwarded on every request.
    pub auth_token: String,
    /// Wait after a successful pre-phase, after a reset prefix, and before
    /// post-command resolution.
    pub settle_delay_ms: u64,
    /// Wait between consecutive commands in the main and post phases.
    pub inter_command_delay_ms: u64,
    /// Timeout applied to each individual request.
    pub request_timeout_secs: u64,
}

impl ExecutorConfig {
    pub fn new(endpoint_base: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            endpoint_base: endpoint_base.into(),
            auth_token: auth_token.into(),
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            inter_command_delay_ms: DEFAULT_INTER_COMMAND_DELAY_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn inter_command_delay(&self) -> Duration {
        Duration::from_millis(self.inter_command_delay_ms)
    }

    /// Build the HTTP client this configuration describes.
    pub fn client(&self) -> Result<ManagementClient, ClientError> {
        ManagementClient::new(&self.endpoint_base, &self.auth_token, Duration::from_secs(self.request_timeout_secs))
    }
}
