//! Command catalog introspection.
//!
//! The management API's `help` endpoint describes every available command
//! and its parameter schema. The catalog is advisory: the CLI uses it to
//! list commands and warn about unknown queued names, but the executor never
//! consults it — commands are opaque remote operations.

use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use quicksite_types::Command;

use crate::executor::dispatch::{CommandDispatcher, DispatchOutcome};
use crate::executor::response_indicates_success;

/// One catalog entry as described by the help endpoint. The parameter schema
/// is kept opaque; only UIs interpret it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogEntry {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub method: Option<String>,
}

/// The remote command catalogue, in the server's listing order.
#[derive(Debug, Clone, Default)]
pub struct CommandCatalog {
    pub commands: IndexMap<String, CatalogEntry>,
}

impl CommandCatalog {
    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Names in the queue that the catalogue does not know.
    pub fn unknown_commands<'a>(&self, commands: &'a [Command]) -> Vec<&'a str> {
        commands
            .iter()
            .map(|command| command.name.as_str())
            .filter(|name| !self.contains(name))
            .collect()
    }
}

/// Fetch the catalogue via the `help` command.
pub async fn fetch_catalog(dispatcher: &dyn CommandDispatcher) -> Result<CommandCatalog> {
    let outcome = dispatcher.dispatch(&Command::new("help")).await;
    let body = match outcome {
        DispatchOutcome::Response { status, body } if response_indicates_success(status, &body) => body,
        DispatchOutcome::Response { status, .. } => bail!("help endpoint returned status {status}"),
        DispatchOutcome::Transport(error) => bail!("help endpoint unreachable: {error}"),
        DispatchOutcome::Aborted => bail!("help request was cancelled"),
    };

    let commands: IndexMap<String, CatalogEntry> = match body.pointer("/data/commands") {
        Some(value) => serde_json::from_value(value.clone()).context("help payload has an unexpected shape")?,
        None => IndexMap::new(),
    };
    debug!(count = commands.len(), "command catalog loaded");
    Ok(CommandCatalog { commands })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct HelpDispatcher;

    #[async_trait]
    impl CommandDispatcher for HelpDispatcher {
        async fn dispatch(&self, command: &Command) -> DispatchOutcome {
            assert_eq!(command.name, "help");
            DispatchOutcome::Response {
                status: 200,
                body: json!({
                    "status": 200,
                    "data": {
                        "commands": {
                            "getRoutes": {"description": "List routes"},
                            "addRoute": {"description": "Create a route", "params": {"route": {"type": "string", "required": true}}}
                        }
                    }
                }),
            }
        }
    }

    #[tokio::test]
    async fn fetch_preserves_server_order() {
        let catalog = fetch_catalog(&HelpDispatcher).await.expect("fetch");
        let names: Vec<&str> = catalog.names().collect();
        assert_eq!(names, vec!["getRoutes", "addRoute"]);
        assert!(catalog.contains("addRoute"));
        assert!(!catalog.contains("deleteEverything"));
    }

    #[tokio::test]
    async fn unknown_commands_are_reported() {
        let catalog = fetch_catalog(&HelpDispatcher).await.expect("fetch");
        let queued = vec![Command::new("addRoute"), Command::new("mistyped")];
        assert_eq!(catalog.unknown_commands(&queued), vec!["mistyped"]);
    }

    struct BrokenHelpDispatcher;

    #[async_trait]
    impl CommandDispatcher for BrokenHelpDispatcher {
        async fn dispatch(&self, _command: &Command) -> DispatchOutcome {
            DispatchOutcome::Response {
                status: 500,
                body: json!({"status": 500, "message": "nope"}),
            }
        }
    }

    #[tokio::test]
    async fn failed_help_is_an_error() {
        let error = fetch_catalog(&BrokenHelpDispatcher).await.expect_err("must fail");
        assert!(error.to_string().contains("status 500"));
    }
}
