//! Destructive-reset ("fresh start") command generation.
//!
//! Queries the current remote state and produces the ordered deletion
//! sequence that reduces a project to a minimal baseline: one language, the
//! protected `404`/`home` routes, no assets, no components, no stray
//! translation keys, empty structures, empty stylesheet. Generation itself
//! performs only reads; the returned commands are prepended to the main
//! phase and executed there, where a 404 counts as "already absent".

use serde_json::{Value, json};
use tracing::{debug, warn};

use quicksite_types::Command;

use crate::executor::dispatch::{CommandDispatcher, DispatchOutcome};
use crate::executor::response_indicates_success;

/// Routes that survive a fresh start.
const PROTECTED_ROUTES: &[&str] = &["404", "home"];

/// Fallback default language when the language list cannot be read.
const FALLBACK_DEFAULT_LANG: &str = "en";

/// Generate the reset prefix from current remote state.
///
/// A state query that fails contributes no commands; the reset degrades to
/// the portions that could be computed rather than failing the batch.
pub async fn generate_reset_commands(dispatcher: &dyn CommandDispatcher) -> Vec<Command> {
    let mut commands = Vec::new();

    // Languages: delete everything except the default, then force
    // monolingual mode.
    let mut default_lang = FALLBACK_DEFAULT_LANG.to_string();
    if let Some(data) = query_state(dispatcher, "getLangList").await {
        if let Some(lang) = data.get("default_language").and_then(Value::as_str) {
            default_lang = lang.to_string();
        }
        let languages = data.get("languages").and_then(Value::as_array).cloned().unwrap_or_default();
        for language in languages.iter().filter_map(Value::as_str).filter(|code| *code != default_lang) {
            commands.push(Command::with_params("deleteLang", params(&[("code", json!(language))])));
        }
    }
    commands.push(Command::with_params("setMultilingual", params(&[("enabled", json!(false))])));

    // Routes: everything except the protected set. Longest first, so child
    // routes are deleted before their parents.
    if let Some(data) = query_state(dispatcher, "getRoutes").await {
        let mut routes: Vec<String> = data
            .get("flat_routes")
            .and_then(Value::as_array)
            .map(|list| list.iter().filter_map(Value::as_str).map(String::from).collect())
            .unwrap_or_default();
        routes.retain(|route| !PROTECTED_ROUTES.contains(&route.as_str()));
        routes.sort_by(|a, b| b.len().cmp(&a.len()));
        for route in routes {
            commands.push(Command::with_params("deleteRoute", params(&[("route", json!(route))])));
        }
    }

    // Assets: every file in every category.
    if let Some(data) = query_state(dispatcher, "listAssets").await {
        if let Some(categories) = data.get("assets").and_then(Value::as_object) {
            for (category, files) in categories {
                let files = files.as_array().cloned().unwrap_or_default();
                for file in files {
                    if let Some(filename) = file.get("filename").and_then(Value::as_str) {
                        commands.push(Command::with_params(
                            "deleteAsset",
                            params(&[("category", json!(category)), ("filename", json!(filename))]),
                        ));
                    }
                }
            }
        }
    }

    // Components: cleared by writing an empty structure.
    if let Some(data) = query_state(dispatcher, "listComponents").await {
        let components = data.get("components").and_then(Value::as_array).cloned().unwrap_or_default();
        debug!(count = components.len(), "components scheduled for removal");
        for component in components {
            if let Some(name) = component.get("name").and_then(Value::as_str) {
                commands.push(Command::with_params(
                    "editStructure",
                    params(&[("type", json!("component")), ("name", json!(name)), ("structure", json!([]))]),
                ));
            }
        }
    }

    // Translation keys for the default language only, keeping the 404 tree.
    if let Some(data) = query_state(dispatcher, "getTranslations").await {
        if let Some(keys) = data.pointer(&format!("/translations/{default_lang}")).and_then(Value::as_object) {
            let top_level: Vec<String> = keys.keys().filter(|key| key.as_str() != "404").cloned().collect();
            if !top_level.is_empty() {
                commands.push(Command::with_params(
                    "deleteTranslationKeys",
                    params(&[("language", json!(default_lang)), ("keys", json!(top_level))]),
                ));
            }
        }
    }

    // Structures: clear menu, footer, and the home page.
    commands.push(Command::with_params(
        "editStructure",
        params(&[("type", json!("menu")), ("structure", json!([]))]),
    ));
    commands.push(Command::with_params(
        "editStructure",
        params(&[("type", json!("footer")), ("structure", json!([]))]),
    ));
    commands.push(Command::with_params(
        "editStructure",
        params(&[("type", json!("page")), ("name", json!("home")), ("structure", json!([]))]),
    ));

    // Minimize the 404 page rather than deleting it.
    commands.push(Command::with_params(
        "editStructure",
        params(&[
            ("type", json!("page")),
            ("name", json!("404")),
            (
                "structure",
                json!([
                    { "tag": "section", "params": { "class": "error-page" }, "children": [
                        { "tag": "h1", "children": [{ "textKey": "404.pageNotFound" }] },
                        { "tag": "p", "children": [{ "textKey": "404.message" }] }
                    ]}
                ]),
            ),
        ]),
    ));

    // Clear the stylesheet last.
    commands.push(Command::with_params(
        "editStyles",
        params(&[("content", json!("/* Fresh Start - CSS cleared */\n"))]),
    ));

    commands
}

async fn query_state(dispatcher: &dyn CommandDispatcher, command_name: &str) -> Option<Value> {
    match dispatcher.dispatch(&Command::new(command_name)).await {
        DispatchOutcome::Response { status, body } if response_indicates_success(status, &body) => body.get("data").cloned(),
        DispatchOutcome::Response { status, .. } => {
            warn!(command = %command_name, status, "state query failed, skipping its reset commands");
            None
        }
        DispatchOutcome::Transport(error) => {
            warn!(command = %command_name, %error, "state query failed, skipping its reset commands");
            None
        }
        DispatchOutcome::Aborted => None,
    }
}

fn params(pairs: &[(&str, Value)]) -> serde_json::Map<String, Value> {
    pairs.iter().map(|(key, value)| (key.to_string(), value.clone())).collect()
}
