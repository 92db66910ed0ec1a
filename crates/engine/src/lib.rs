//! # QuickSite Engine
//!
//! Sequential batch execution against a QuickSite management API. The engine
//! runs an [`ExecutionBatch`](quicksite_types::ExecutionBatch) — pre-phase
//! provisioning, the main payload (optionally prefixed by a destructive
//! reset), and lazily resolved post-commands — one command at a time, and
//! records a per-command outcome for everything that was attempted.
//!
//! ## Guarantees
//!
//! - **Ordering**: commands execute in array order; a dispatch starts only
//!   after the previous response (or transport failure) has been recorded.
//! - **Partial failure**: pre-phase failures abort the run unless the
//!   command opted out; main and post phases always continue. Failures are
//!   data, not panics or errors.
//! - **Fresh post-resolution**: post-command templates are resolved only
//!   after the main phase completes, against configuration re-read at that
//!   moment.
//!
//! ## Architecture
//!
//! - **`executor`**: the phase loops, failure classification, and the
//!   [`CommandDispatcher`] seam to the wire
//! - **`condition`**: the boolean expression AST guarding post-commands
//! - **`resolve`**: endpoint-backed and local post-command resolvers
//! - **`reset`**: destructive-reset ("fresh start") command generation
//! - **`queue`**: the validated, persisted command queue
//! - **`catalog`**: `help` endpoint introspection
//!
//! ## Usage
//!
//! ```no_run
//! use quicksite_engine::{BatchExecutor, ExecutorConfig, NoopObserver};
//! use quicksite_types::{Command, ExecutionBatch};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = ExecutorConfig::new("https://mysite.example/management", "token");
//! let executor = BatchExecutor::from_config(&config)?;
//!
//! let batch = ExecutionBatch::from_main(vec![Command::new("getRoutes")]);
//! let report = executor.run_batch(&batch, &NoopObserver).await;
//! println!("{} succeeded, {} failed", report.succeeded_count(), report.failed_count());
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod condition;
pub mod config;
pub mod executor;
pub mod queue;
pub mod reset;
pub mod resolve;

pub use catalog::{CommandCatalog, fetch_catalog};
pub use condition::{ConditionError, ConditionExpr};
pub use config::ExecutorConfig;
pub use executor::{BatchExecutor, BatchObserver, CommandDispatcher, DispatchOutcome, HttpDispatcher, NoopObserver};
pub use queue::{CommandQueue, QueueError, QueueStore};
pub use reset::generate_reset_commands;
pub use resolve::{EndpointResolver, LocalResolver, PostCommandResolver};
