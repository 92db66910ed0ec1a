//! End-to-end pipeline tests against a fake management backend.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use quicksite_engine::resolve::LocalResolver;
use quicksite_engine::{BatchExecutor, CommandDispatcher, DispatchOutcome, NoopObserver};
use quicksite_types::{Command, ExecutionBatch, Phase, PostCommandTemplate};

/// Fake backend: serves state queries from a project snapshot, scripted
/// responses for specific commands, and a 200 for everything else. Records
/// every dispatched command name in order.
struct FakeBackend {
    snapshot: Value,
    scripted: Mutex<Vec<(String, DispatchOutcome)>>,
    calls: Mutex<Vec<String>>,
}

impl FakeBackend {
    fn new(scripted: Vec<(&str, DispatchOutcome)>) -> Self {
        Self {
            snapshot: json!({
                "getLangList": {"default_language": "en", "languages": ["en", "fr"]},
                "getRoutes": {"flat_routes": ["home", "404", "about"]},
                "listAssets": {"assets": {}},
                "listComponents": {"components": []},
                "getTranslations": {"translations": {"en": {"404": {}}}},
                "getConfig": {"MULTILINGUAL": false},
            }),
            scripted: Mutex::new(scripted.into_iter().map(|(name, outcome)| (name.to_string(), outcome)).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn status(status: u16, message: &str) -> DispatchOutcome {
        DispatchOutcome::Response {
            status,
            body: json!({"status": status, "message": message}),
        }
    }
}

#[async_trait]
impl CommandDispatcher for FakeBackend {
    async fn dispatch(&self, command: &Command) -> DispatchOutcome {
        self.calls.lock().expect("calls lock").push(command.name.clone());

        {
            let mut scripted = self.scripted.lock().expect("script lock");
            if let Some(position) = scripted.iter().position(|(name, _)| name == &command.name) {
                return scripted.remove(position).1;
            }
        }

        if let Some(data) = self.snapshot.get(&command.name) {
            return DispatchOutcome::Response {
                status: 200,
                body: json!({"status": 200, "data": data}),
            };
        }

        Self::status(200, "ok")
    }
}

fn executor(backend: Arc<FakeBackend>) -> BatchExecutor {
    let resolver = Arc::new(LocalResolver::new(backend.clone()));
    BatchExecutor::new(backend)
        .with_resolver(resolver)
        .with_delays(Duration::ZERO, Duration::ZERO)
}

fn command(name: &str, params: Value) -> Command {
    Command::with_params(name, params.as_object().cloned().unwrap_or_default())
}

#[tokio::test]
async fn two_successful_main_commands_yield_two_ordered_results() {
    let backend = Arc::new(FakeBackend::new(vec![]));
    let batch = ExecutionBatch::from_main(vec![
        command("addRoute", json!({"name": "blog"})),
        command("editStructure", json!({"type": "page", "name": "blog", "structure": []})),
    ]);

    let report = executor(backend.clone()).run_batch(&batch, &NoopObserver).await;

    assert_eq!(report.results.len(), 2);
    assert!(report.results.iter().all(|result| result.success));
    assert_eq!(report.results[0].command, "addRoute");
    assert_eq!(report.results[1].command, "editStructure");
    assert!(report.aborted.is_none());
    assert!(!report.cancelled);
}

#[tokio::test]
async fn conflicting_pre_command_aborts_before_the_main_phase() {
    let backend = Arc::new(FakeBackend::new(vec![(
        "addRoute",
        DispatchOutcome::Response {
            status: 409,
            body: json!({"status": 409, "message": "Route 'about' already exists"}),
        },
    )]));
    let batch = ExecutionBatch {
        pre_commands: vec![command("addRoute", json!({"name": "about"}))],
        main_commands: vec![command("editStructure", json!({"type": "page", "name": "about", "structure": []}))],
        ..Default::default()
    };

    let report = executor(backend.clone()).run_batch(&batch, &NoopObserver).await;

    let aborted = report.aborted.expect("batch must abort");
    assert!(aborted.error.contains("already exists"));
    assert_eq!(aborted.failed_command.name, "addRoute");
    assert_eq!(report.results.len(), 1, "no main-phase results were recorded");
    assert_eq!(backend.calls(), vec!["addRoute"], "the main phase never ran");
}

#[tokio::test]
async fn unmet_post_condition_executes_zero_post_commands() {
    let backend = Arc::new(FakeBackend::new(vec![]));
    let mut user_params = Map::new();
    user_params.insert("multilingual".into(), json!(false));
    let batch = ExecutionBatch {
        main_commands: vec![command("editStyles", json!({"content": "body {}"}))],
        post_commands_raw: vec![PostCommandTemplate {
            name: "setTranslationKeys".into(),
            params: Map::new(),
            condition: Some("multilingual === true".into()),
        }],
        user_params,
        ..Default::default()
    };

    let report = executor(backend.clone()).run_batch(&batch, &NoopObserver).await;

    assert_eq!(report.results.len(), 1, "only the main command ran");
    assert!(
        !backend.calls().iter().any(|name| name == "setTranslationKeys"),
        "the post-command must not execute when its condition is false"
    );
}

#[tokio::test]
async fn met_post_condition_runs_after_all_main_commands() {
    let backend = Arc::new(FakeBackend::new(vec![]));
    let mut user_params = Map::new();
    user_params.insert("multilingual".into(), json!(true));
    let batch = ExecutionBatch {
        main_commands: vec![
            command("editStructure", json!({"type": "page", "name": "home", "structure": []})),
            command("editStyles", json!({"content": "body {}"})),
        ],
        post_commands_raw: vec![PostCommandTemplate {
            name: "setTranslationKeys".into(),
            params: Map::new(),
            condition: Some("multilingual === true".into()),
        }],
        user_params,
        ..Default::default()
    };

    let report = executor(backend.clone()).run_batch(&batch, &NoopObserver).await;

    assert_eq!(report.results.len(), 3);
    assert_eq!(report.results[2].command, "setTranslationKeys");
    assert_eq!(report.results[2].phase, Phase::Post);

    let calls = backend.calls();
    let post_position = calls.iter().position(|name| name == "setTranslationKeys").expect("post ran");
    let config_position = calls.iter().position(|name| name == "getConfig").expect("fresh config read");
    let last_main_position = calls.iter().position(|name| name == "editStyles").expect("main ran");
    assert!(
        last_main_position < config_position && config_position < post_position,
        "resolution reads fresh state only after the main phase: {calls:?}"
    );
}

#[tokio::test]
async fn fresh_start_treats_404_as_skip_but_main_phase_does_not() {
    let missing = || DispatchOutcome::Response {
        status: 404,
        body: json!({"status": 404, "message": "Language not found"}),
    };
    // First deleteLang comes from the generated reset prefix, second from
    // the user payload.
    let backend = Arc::new(FakeBackend::new(vec![("deleteLang", missing()), ("deleteLang", missing())]));
    let batch = ExecutionBatch {
        main_commands: vec![command("deleteLang", json!({"code": "fr"}))],
        fresh_start: true,
        ..Default::default()
    };

    let report = executor(backend.clone()).run_batch(&batch, &NoopObserver).await;

    let reset_delete = report
        .results
        .iter()
        .find(|result| result.command == "deleteLang" && result.phase == Phase::Reset)
        .expect("reset prefix contains deleteLang for the extra language");
    assert!(reset_delete.success, "404 during the reset prefix is an acceptable skip");
    assert!(reset_delete.skipped);

    let main_delete = report
        .results
        .iter()
        .find(|result| result.command == "deleteLang" && result.phase == Phase::Main)
        .expect("payload deleteLang result");
    assert!(!main_delete.success, "the same 404 in the main phase is a failure");
    assert!(!main_delete.skipped);
}

#[tokio::test]
async fn fresh_start_prefix_precedes_the_payload() {
    let backend = Arc::new(FakeBackend::new(vec![]));
    let batch = ExecutionBatch {
        main_commands: vec![command("addRoute", json!({"name": "blog"}))],
        fresh_start: true,
        ..Default::default()
    };

    let report = executor(backend.clone()).run_batch(&batch, &NoopObserver).await;

    let payload_index = report
        .results
        .iter()
        .position(|result| result.command == "addRoute")
        .expect("payload ran");
    assert_eq!(payload_index, report.results.len() - 1, "payload runs after the whole reset prefix");
    assert!(
        report.results[..payload_index].iter().all(|result| result.phase == Phase::Reset),
        "everything before the payload belongs to the reset prefix"
    );
    // fr is the only non-default language in the snapshot; about is the only
    // unprotected route.
    assert!(report.results.iter().any(|r| r.command == "deleteRoute"));
    assert!(report.results.iter().any(|r| r.command == "setMultilingual"));
}
