//! Post-command resolution.
//!
//! Post-command templates cannot be finalized before the main phase runs:
//! their parameters and conditions reference configuration the main commands
//! may have just changed. Resolution therefore happens against *fresh* remote
//! state, never against state captured when the batch was assembled.
//!
//! Two resolvers implement the same contract:
//! - [`EndpointResolver`] forwards templates to the admin resolution
//!   endpoint, which expands them server-side.
//! - [`LocalResolver`] re-reads configuration through the dispatcher and
//!   expands templates in-process: conditions are evaluated with the parsed
//!   expression AST and `{{ var }}` placeholders are substituted from the
//!   variable map.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use quicksite_api::ManagementClient;
use quicksite_types::{Command, PostCommandTemplate};
use quicksite_util::http::parse_response_json_strict;

use crate::condition::{ConditionExpr, canonical, lookup_path};
use crate::executor::dispatch::{CommandDispatcher, DispatchOutcome};
use crate::executor::response_indicates_success;

/// Resolve raw post-command templates into concrete, ready-to-run commands.
///
/// Entries whose condition evaluates false are dropped. An empty result is
/// not an error; it means nothing qualified.
#[async_trait]
pub trait PostCommandResolver: Send + Sync {
    async fn resolve(&self, templates: &[PostCommandTemplate], user_params: &Map<String, Value>) -> Result<Vec<Command>>;
}

/// Resolver backed by the admin resolution endpoint.
pub struct EndpointResolver {
    client: ManagementClient,
    path: String,
}

impl EndpointResolver {
    pub fn new(client: ManagementClient) -> Self {
        Self {
            client,
            path: "/resolvePostCommands".into(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }
}

#[async_trait]
impl PostCommandResolver for EndpointResolver {
    async fn resolve(&self, templates: &[PostCommandTemplate], user_params: &Map<String, Value>) -> Result<Vec<Command>> {
        let payload = json!({
            "postCommandsRaw": templates,
            "userParams": user_params,
        });
        let raw = self
            .client
            .send(reqwest::Method::POST, &self.path, Some(&payload))
            .await
            .context("post-command resolution request failed")?;

        let body = parse_response_json_strict(&raw.body, raw.status).context("post-command resolution returned a non-JSON body")?;

        if !body.get("success").and_then(Value::as_bool).unwrap_or(false) {
            let message = body
                .get("error")
                .or_else(|| body.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("resolution endpoint reported failure");
            bail!("post-command resolution failed: {message}");
        }

        let commands = match body.pointer("/data/commands") {
            Some(value) => serde_json::from_value(value.clone()).context("resolved command list has an unexpected shape")?,
            None => Vec::new(),
        };
        debug!(resolved = commands.len(), submitted = templates.len(), "post-commands resolved remotely");
        Ok(commands)
    }
}

/// Resolver that expands templates locally against freshly read
/// configuration.
///
/// The variable map is the `data` object of the configuration command's
/// response, overlaid with the caller's user params (user params win).
pub struct LocalResolver {
    dispatcher: std::sync::Arc<dyn CommandDispatcher>,
    config_command: Command,
}

impl LocalResolver {
    pub fn new(dispatcher: std::sync::Arc<dyn CommandDispatcher>) -> Self {
        Self {
            dispatcher,
            config_command: Command::new("getConfig"),
        }
    }

    pub fn with_config_command(mut self, command: Command) -> Self {
        self.config_command = command;
        self
    }

    async fn fresh_variables(&self, user_params: &Map<String, Value>) -> Map<String, Value> {
        let mut vars = Map::new();
        match self.dispatcher.dispatch(&self.config_command).await {
            DispatchOutcome::Response { status, body } if response_indicates_success(status, &body) => {
                if let Some(Value::Object(config)) = body.get("data") {
                    vars.extend(config.clone());
                }
            }
            DispatchOutcome::Response { status, .. } => {
                warn!(command = %self.config_command.name, status, "could not read fresh configuration");
            }
            DispatchOutcome::Transport(error) => {
                warn!(command = %self.config_command.name, %error, "could not read fresh configuration");
            }
            DispatchOutcome::Aborted => {}
        }
        vars.extend(user_params.clone());
        vars
    }
}

#[async_trait]
impl PostCommandResolver for LocalResolver {
    async fn resolve(&self, templates: &[PostCommandTemplate], user_params: &Map<String, Value>) -> Result<Vec<Command>> {
        if templates.is_empty() {
            return Ok(Vec::new());
        }

        let vars = self.fresh_variables(user_params).await;
        let mut commands = Vec::new();

        for template in templates {
            if let Some(condition) = &template.condition {
                let expr = ConditionExpr::parse(condition)
                    .with_context(|| format!("invalid condition on post-command '{}'", template.name))?;
                if !expr.eval(&vars) {
                    debug!(command = %template.name, %condition, "post-command dropped, condition false");
                    continue;
                }
            }

            commands.push(Command {
                name: template.name.clone(),
                params: match interpolate_value(&Value::Object(template.params.clone()), &vars) {
                    Value::Object(params) => params,
                    _ => template.params.clone(),
                },
                url_params: Vec::new(),
                method: None,
                abort_on_fail: None,
            });
        }

        debug!(resolved = commands.len(), submitted = templates.len(), "post-commands resolved locally");
        Ok(commands)
    }
}

/// Recursively substitute `{{ var }}` placeholders in a JSON value.
///
/// A string consisting of a single placeholder keeps the variable's JSON
/// type; placeholders embedded in longer text substitute the value's string
/// form. Unknown variables are left in place so the failure is visible in
/// the dispatched params rather than silently becoming an empty string.
pub fn interpolate_value(value: &Value, vars: &Map<String, Value>) -> Value {
    match value {
        Value::String(text) => interpolate_string(text, vars),
        Value::Array(items) => Value::Array(items.iter().map(|item| interpolate_value(item, vars)).collect()),
        Value::Object(map) => {
            let mut interpolated = Map::new();
            for (key, entry) in map {
                interpolated.insert(key.clone(), interpolate_value(entry, vars));
            }
            Value::Object(interpolated)
        }
        other => other.clone(),
    }
}

fn interpolate_string(input: &str, vars: &Map<String, Value>) -> Value {
    let trimmed = input.trim();
    if let Some(inner) = trimmed.strip_prefix("{{").and_then(|rest| rest.strip_suffix("}}")) {
        let key = inner.trim();
        if !key.is_empty() && !key.contains("{{") {
            if let Some(resolved) = lookup_path(vars, key) {
                return resolved;
            }
            return Value::String(input.to_string());
        }
    }

    let mut output = String::new();
    let mut rest = input;
    while let Some(start) = rest.find("{{") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                match lookup_path(vars, key) {
                    Some(resolved) => output.push_str(&canonical(&resolved)),
                    None => {
                        output.push_str("{{");
                        output.push_str(&after[..end]);
                        output.push_str("}}");
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                output.push_str(&rest[start..]);
                rest = "";
                break;
            }
        }
    }
    output.push_str(rest);
    Value::String(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct ConfigDispatcher {
        config: Value,
    }

    #[async_trait]
    impl CommandDispatcher for ConfigDispatcher {
        async fn dispatch(&self, command: &Command) -> DispatchOutcome {
            assert_eq!(command.name, "getConfig");
            DispatchOutcome::Response {
                status: 200,
                body: json!({"status": 200, "data": self.config}),
            }
        }
    }

    fn template(name: &str, condition: Option<&str>, params: Value) -> PostCommandTemplate {
        PostCommandTemplate {
            name: name.into(),
            params: params.as_object().cloned().unwrap_or_default(),
            condition: condition.map(String::from),
        }
    }

    #[tokio::test]
    async fn local_resolver_drops_entries_with_false_conditions() {
        let resolver = LocalResolver::new(Arc::new(ConfigDispatcher {
            config: json!({"MULTILINGUAL": false}),
        }));
        let templates = vec![template("setTranslationKeys", Some("multilingual === true"), json!({}))];
        let mut user_params = Map::new();
        user_params.insert("multilingual".into(), json!(false));

        let resolved = resolver.resolve(&templates, &user_params).await.expect("resolve");
        assert!(resolved.is_empty(), "condition false means the entry is dropped, not an error");
    }

    #[tokio::test]
    async fn local_resolver_reads_fresh_configuration() {
        // The condition references a value only present in the freshly read
        // config, not in the user params.
        let resolver = LocalResolver::new(Arc::new(ConfigDispatcher {
            config: json!({"LANGUAGES_NAME": ["en", "fr"], "MULTILINGUAL": true}),
        }));
        let templates = vec![template(
            "setTranslationKeys",
            Some("MULTILINGUAL == true"),
            json!({"languages": "{{ LANGUAGES_NAME }}"}),
        )];

        let resolved = resolver.resolve(&templates, &Map::new()).await.expect("resolve");
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].params["languages"], json!(["en", "fr"]));
    }

    #[tokio::test]
    async fn user_params_override_remote_configuration() {
        let resolver = LocalResolver::new(Arc::new(ConfigDispatcher {
            config: json!({"theme": "light"}),
        }));
        let templates = vec![template("applyTheme", Some("theme == \"dark\""), json!({"name": "{{ theme }}"}))];
        let mut user_params = Map::new();
        user_params.insert("theme".into(), json!("dark"));

        let resolved = resolver.resolve(&templates, &user_params).await.expect("resolve");
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].params["name"], json!("dark"));
    }

    #[tokio::test]
    async fn local_resolver_rejects_unparsable_conditions() {
        let resolver = LocalResolver::new(Arc::new(ConfigDispatcher { config: json!({}) }));
        let templates = vec![template("x", Some("a >= 2"), json!({}))];
        let error = resolver.resolve(&templates, &Map::new()).await.expect_err("bad condition");
        assert!(error.to_string().contains("invalid condition"), "unexpected error: {error}");
    }

    #[test]
    fn whole_string_placeholder_keeps_type() {
        let mut vars = Map::new();
        vars.insert("count".into(), json!(3));
        let value = interpolate_value(&json!({"n": "{{ count }}"}), &vars);
        assert_eq!(value["n"], json!(3));
    }

    #[test]
    fn embedded_placeholder_substitutes_text() {
        let mut vars = Map::new();
        vars.insert("lang".into(), json!("fr"));
        let value = interpolate_value(&json!("keys for {{ lang }} only"), &vars);
        assert_eq!(value, json!("keys for fr only"));
    }

    #[test]
    fn unknown_placeholder_is_left_in_place() {
        let value = interpolate_value(&json!("{{ nope }}"), &Map::new());
        assert_eq!(value, json!("{{ nope }}"));

        let embedded = interpolate_value(&json!("x {{ nope }} y"), &Map::new());
        assert_eq!(embedded, json!("x {{ nope }} y"));
    }

    #[test]
    fn interpolation_recurses_into_arrays_and_objects() {
        let mut vars = Map::new();
        vars.insert("page".into(), json!("blog"));
        let value = interpolate_value(&json!({"targets": [{"name": "{{ page }}"}]}), &vars);
        assert_eq!(value["targets"][0]["name"], json!("blog"));
    }
}
