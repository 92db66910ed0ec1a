use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::Level;

use quicksite_engine::queue::QueueStore;
use quicksite_engine::{
    BatchExecutor, BatchObserver, EndpointResolver, ExecutorConfig, HttpDispatcher, fetch_catalog, generate_reset_commands,
};
use quicksite_types::{BatchReport, BatchState, Command, ExecutionBatch, ExecutionResult, Phase};
use quicksite_util::{redact_sensitive, truncate_chars};

#[derive(Parser)]
#[command(name = "quicksite", version, about = "QuickSite management batch runner")]
struct Cli {
    /// Management API base URL, e.g. https://mysite.example/management
    #[arg(long, env = "QUICKSITE_API_BASE", global = true)]
    api_base: Option<String>,

    /// Bearer token for the management API
    #[arg(long, env = "QUICKSITE_API_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// Queue file location (defaults to the user config dir)
    #[arg(long, global = true)]
    queue_path: Option<PathBuf>,

    /// Print exact parameters and raw responses for every command
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Manage the persisted command queue
    Queue {
        #[command(subcommand)]
        action: QueueCmd,
    },
    /// Execute a batch document, or the persisted queue when no file is given
    Run {
        /// Batch JSON file matching the admin-console wire shape
        file: Option<PathBuf>,
        /// Prepend a destructive reset generated from current remote state
        #[arg(long)]
        fresh_start: bool,
        /// Keep the queue after the run instead of clearing it
        #[arg(long)]
        keep_queue: bool,
        /// Override the settle delay in milliseconds
        #[arg(long)]
        settle_delay_ms: Option<u64>,
        /// Override the inter-command delay in milliseconds
        #[arg(long)]
        inter_command_delay_ms: Option<u64>,
    },
    /// Preview or execute a destructive project reset
    Reset {
        /// Only print the generated commands
        #[arg(long)]
        dry_run: bool,
        /// Confirm execution; without this flag nothing is deleted
        #[arg(long)]
        yes: bool,
    },
    /// List the commands the management API exposes
    Catalog,
}

#[derive(Subcommand)]
enum QueueCmd {
    /// Append a command; PARAMS is a JSON object
    Add {
        command: String,
        #[arg(default_value = "{}")]
        params: String,
    },
    /// Remove an entry by id
    Remove { id: u64 },
    /// Show the queue in execution order
    List,
    /// Drop every queued entry
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match &cli.command {
        Cmd::Queue { action } => run_queue_cmd(&cli, action),
        Cmd::Run {
            file,
            fresh_start,
            keep_queue,
            settle_delay_ms,
            inter_command_delay_ms,
        } => {
            run_batch_cmd(
                &cli,
                file.as_deref(),
                *fresh_start,
                *keep_queue,
                *settle_delay_ms,
                *inter_command_delay_ms,
            )
            .await
        }
        Cmd::Reset { dry_run, yes } => run_reset_cmd(&cli, *dry_run, *yes).await,
        Cmd::Catalog => run_catalog_cmd(&cli).await,
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .try_init();
}

fn executor_config(cli: &Cli) -> Result<ExecutorConfig> {
    let api_base = cli
        .api_base
        .clone()
        .context("no management API base URL; pass --api-base or set QUICKSITE_API_BASE")?;
    let token = cli
        .token
        .clone()
        .context("no authentication token; pass --token or set QUICKSITE_API_TOKEN")?;
    Ok(ExecutorConfig::new(api_base, token))
}

fn queue_store(cli: &Cli) -> QueueStore {
    match &cli.queue_path {
        Some(path) => QueueStore::new(path.clone()),
        None => QueueStore::default_location(),
    }
}

fn run_queue_cmd(cli: &Cli, action: &QueueCmd) -> Result<()> {
    let store = queue_store(cli);
    let mut queue = store.load().with_context(|| format!("could not load queue from {}", store.path().display()))?;

    match action {
        QueueCmd::Add { command, params } => {
            let params: serde_json::Map<String, serde_json::Value> =
                serde_json::from_str(params).context("PARAMS must be a JSON object")?;
            let id = queue.add(Command::with_params(command.clone(), params));
            store.save(&queue)?;
            println!("queued {} (id {})", command, id);
        }
        QueueCmd::Remove { id } => {
            if !queue.remove(*id) {
                bail!("no queue entry with id {id}");
            }
            store.save(&queue)?;
            println!("removed {id}");
        }
        QueueCmd::List => {
            if queue.is_empty() {
                println!("queue is empty");
            }
            for (position, entry) in queue.entries().iter().enumerate() {
                let params = if entry.command.params.is_empty() {
                    "(none)".to_string()
                } else {
                    serde_json::to_string(&entry.command.params)?
                };
                println!(
                    "{:>3}. [{}] {} {} {}",
                    position + 1,
                    entry.id,
                    entry.command.effective_method(),
                    entry.command.name,
                    truncate_chars(&params, 80)
                );
            }
        }
        QueueCmd::Clear => {
            let count = queue.len();
            queue.clear();
            store.save(&queue)?;
            println!("cleared {count} entries");
        }
    }
    Ok(())
}

async fn run_batch_cmd(
    cli: &Cli,
    file: Option<&std::path::Path>,
    fresh_start: bool,
    keep_queue: bool,
    settle_delay_ms: Option<u64>,
    inter_command_delay_ms: Option<u64>,
) -> Result<()> {
    let mut config = executor_config(cli)?;
    if let Some(settle) = settle_delay_ms {
        config.settle_delay_ms = settle;
    }
    if let Some(inter) = inter_command_delay_ms {
        config.inter_command_delay_ms = inter;
    }
    let client = config.client()?;
    let dispatcher = Arc::new(HttpDispatcher::new(client.clone()));
    let executor = BatchExecutor::new(dispatcher.clone())
        .with_resolver(Arc::new(EndpointResolver::new(client)))
        .with_delays(config.settle_delay(), config.inter_command_delay());
    spawn_cancel_handler(dispatcher);

    let (mut batch, from_queue) = match file {
        Some(path) => {
            let content = std::fs::read_to_string(path).with_context(|| format!("could not read {}", path.display()))?;
            let batch: ExecutionBatch = serde_json::from_str(&content).with_context(|| format!("{} is not a valid batch document", path.display()))?;
            (batch, false)
        }
        None => {
            let store = queue_store(cli);
            let queue = store.load().with_context(|| format!("could not load queue from {}", store.path().display()))?;
            if queue.is_empty() {
                bail!("queue is empty; add commands with `quicksite queue add` or pass a batch file");
            }
            (ExecutionBatch::from_main(queue.main_commands()), true)
        }
    };
    if fresh_start {
        batch.fresh_start = true;
    }

    let observer = ConsoleObserver { verbose: cli.verbose };
    let report = executor.run_batch(&batch, &observer).await;
    print_summary(&report);

    if from_queue && !keep_queue && report.aborted.is_none() && !report.cancelled {
        let store = queue_store(cli);
        store.save(&quicksite_engine::CommandQueue::default())?;
        println!("queue cleared");
    }

    if let Some(aborted) = &report.aborted {
        bail!("batch aborted at '{}': {}", aborted.failed_command.name, aborted.error);
    }
    if report.failed_count() > 0 {
        bail!("{} command(s) failed", report.failed_count());
    }
    Ok(())
}

async fn run_reset_cmd(cli: &Cli, dry_run: bool, yes: bool) -> Result<()> {
    let config = executor_config(cli)?;
    let client = config.client()?;
    let dispatcher = Arc::new(HttpDispatcher::new(client));

    println!("analyzing project state...");
    let commands = generate_reset_commands(dispatcher.as_ref()).await;
    println!("{} reset commands generated", commands.len());

    if dry_run || !yes {
        for command in &commands {
            let params = serde_json::to_string(&command.params)?;
            println!("  {} {}", command.name, truncate_chars(&params, 100));
        }
        if !dry_run {
            println!("pass --yes to execute this reset; it cannot be undone");
        }
        return Ok(());
    }

    let executor = BatchExecutor::new(dispatcher.clone()).with_delays(config.settle_delay(), config.inter_command_delay());
    spawn_cancel_handler(dispatcher);
    let observer = ConsoleObserver { verbose: cli.verbose };
    let outcome = executor.run_main_phase(&commands, commands.len()).await;
    for (command, result) in commands.iter().zip(&outcome.results) {
        observer.on_result(command, result);
    }
    let failed = outcome.results.iter().filter(|result| !result.success).count();
    if failed > 0 {
        bail!("{failed} reset command(s) failed");
    }
    println!("project reset to baseline");
    Ok(())
}

async fn run_catalog_cmd(cli: &Cli) -> Result<()> {
    let config = executor_config(cli)?;
    let dispatcher = HttpDispatcher::new(config.client()?);
    let catalog = fetch_catalog(&dispatcher).await?;

    for (name, entry) in &catalog.commands {
        if entry.description.is_empty() {
            println!("{name}");
        } else {
            println!("{name} — {}", entry.description);
        }
    }
    println!("{} commands", catalog.len());

    let queued = queue_store(cli).load().map(|queue| queue.main_commands()).unwrap_or_default();
    let unknown = catalog.unknown_commands(&queued);
    if !unknown.is_empty() {
        println!("warning: queued commands not in the catalog: {}", unknown.join(", "));
    }
    Ok(())
}

/// First Ctrl-C aborts the request currently on the wire; the running phase
/// then stops without recording a result for it. Completed commands are not
/// rolled back.
fn spawn_cancel_handler(dispatcher: Arc<HttpDispatcher>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("cancelling in-flight request...");
            dispatcher.abort_in_flight();
        }
    });
}

/// Prints per-command outcomes as they arrive, mirroring the admin console's
/// result list: icon, name, duration, one-line message, and the exact
/// parameters/response when verbose.
struct ConsoleObserver {
    verbose: bool,
}

impl BatchObserver for ConsoleObserver {
    fn on_state_change(&self, state: BatchState) {
        match state {
            BatchState::RunningPre => println!("executing pre-commands..."),
            BatchState::RunningMain => println!("executing commands..."),
            BatchState::ResolvingPost => println!("resolving post-commands with fresh config..."),
            BatchState::RunningPost => println!("executing post-commands..."),
            _ => {}
        }
    }

    fn on_result(&self, command: &Command, result: &ExecutionResult) {
        let icon = if result.skipped {
            "⏭"
        } else if result.success {
            "✔"
        } else {
            "✘"
        };
        let phase_tag = match result.phase {
            Phase::Reset => "[reset] ",
            Phase::Post => "[post] ",
            _ => "",
        };
        println!(
            "{icon} {phase_tag}{} ({}ms) {}",
            result.command,
            result.duration_ms,
            truncate_chars(&result.message(), 120)
        );

        if self.verbose {
            if !command.params.is_empty() {
                let params = serde_json::to_string_pretty(&command.params)
                    .unwrap_or_else(|_| serde_json::Value::Object(command.params.clone()).to_string());
                println!("  params: {}", redact_sensitive(&params));
            }
            let response = serde_json::to_string_pretty(&result.data).unwrap_or_else(|_| result.data.to_string());
            println!("  response: {}", redact_sensitive(&response));
        }
    }
}

fn print_summary(report: &BatchReport) {
    if report.cancelled {
        println!("run cancelled; {} result(s) recorded, nothing rolled back", report.results.len());
        return;
    }
    println!(
        "batch complete: {} succeeded, {} failed",
        report.succeeded_count(),
        report.failed_count()
    );
}
