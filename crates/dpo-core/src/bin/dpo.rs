use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use dpo_agents::collaborators::{FsStorage, InMemoryTabular, PlainTextExtractor};
use dpo_agents::Collaborators;
use dpo_cache::CacheManager;
use dpo_core::{telemetry, DpoConfig, LogFormat, Orchestrator};
use dpo_sandbox::{CodeSnippet, PolicyValidator};
use dpo_types::{SessionId, TaskStatus, WorkflowResult, WorkflowStatus};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn cli() -> Command {
    Command::new("dpo")
        .version(dpo_core::VERSION)
        .about("Data pilot orchestration: plan and run data-analysis workflows")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .global(true)
                .default_value("text")
                .value_parser(value_parser!(LogFormat))
                .help("Log output format: text or json"),
        )
        .subcommand(
            Command::new("run")
                .about("Plan and run a request")
                .arg(Arg::new("request").required(true).help("What to do, in plain language"))
                .arg(
                    Arg::new("data")
                        .long("data")
                        .action(ArgAction::Append)
                        .help("Register a dataset from a JSON records file: name=path.json"),
                )
                .arg(
                    Arg::new("document")
                        .long("document")
                        .action(ArgAction::Append)
                        .help("Register a text document: name=path.txt"),
                )
                .arg(Arg::new("session").long("session").help("Session id (a fresh one by default)"))
                .arg(
                    Arg::new("export")
                        .long("export")
                        .help("Also store the workflow result under this key"),
                )
                .arg(
                    Arg::new("out")
                        .long("out")
                        .default_value("dpo-exports")
                        .value_parser(value_parser!(PathBuf))
                        .help("Directory for exported results"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the workflow result as JSON"),
                )
                .arg(
                    Arg::new("stats")
                        .long("stats")
                        .action(ArgAction::SetTrue)
                        .help("Print per-agent execution statistics after the run"),
                ),
        )
        .subcommand(
            Command::new("check")
                .about("Validate a snippet against the execution policy")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Snippet source file"),
                ),
        )
        .subcommand(
            Command::new("cache")
                .about("Inspect or clear the result cache")
                .subcommand_required(true)
                .subcommand(Command::new("stats").about("Print cache statistics"))
                .subcommand(Command::new("clear").about("Drop every cached result")),
        )
        .subcommand(Command::new("agents").about("List installed agents with their execution statistics"))
        .subcommand(Command::new("config").about("Print the effective configuration"))
}

/// Split a `name=path` argument
fn named_path(arg: &str) -> anyhow::Result<(&str, &Path)> {
    match arg.split_once('=') {
        Some((name, path)) if !name.trim().is_empty() && !path.trim().is_empty() => {
            Ok((name.trim(), Path::new(path.trim())))
        }
        _ => bail!("expected name=path, got {arg:?}"),
    }
}

fn values<'a>(args: &'a ArgMatches, id: &str) -> impl Iterator<Item = &'a String> {
    args.get_many::<String>(id).into_iter().flatten()
}

async fn run(config: DpoConfig, args: &ArgMatches) -> anyhow::Result<bool> {
    let request = args
        .get_one::<String>("request")
        .context("a request is required")?;

    let tabular = InMemoryTabular::new();
    for arg in values(args, "data") {
        let (name, path) = named_path(arg)?;
        let rows = tabular.load_json_file(name, path).await?;
        tracing::info!(dataset = name, rows, "dataset registered");
    }
    let documents = PlainTextExtractor::new();
    for arg in values(args, "document") {
        let (name, path) = named_path(arg)?;
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        documents.add_document(name, text);
    }
    let mut collaborators = Collaborators::in_memory()
        .with_tabular(Arc::new(tabular))
        .with_documents(Arc::new(documents));
    if let Some(out) = args.get_one::<PathBuf>("out") {
        collaborators = collaborators.with_storage(Arc::new(FsStorage::new(out)));
    }

    let memory_dir = config.memory.dir.clone();
    let orchestrator = Orchestrator::from_config(config, collaborators)?;
    if let Some(dir) = &memory_dir {
        orchestrator.memory().load_from(dir).await?;
    }

    let session = args
        .get_one::<String>("session")
        .map_or_else(SessionId::generate, |s| SessionId::new(s.as_str()));
    let result = orchestrator.handle_request(&session, request).await?;

    if let Some(key) = args.get_one::<String>("export") {
        orchestrator.export(&result, key).await?;
    }
    if let Some(dir) = &memory_dir {
        orchestrator.memory().save_to(dir).await?;
    }

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&session, &result);
    }
    if args.get_flag("stats") {
        println!("{}", serde_json::to_string_pretty(&orchestrator.agent_stats())?);
    }
    Ok(result.status == WorkflowStatus::Succeeded)
}

fn print_result(session: &SessionId, result: &WorkflowResult) {
    println!(
        "session {session}  workflow {}  {} in {} ms",
        result.workflow_id,
        result.status,
        result.duration.as_millis()
    );
    for r in &result.results {
        let detail = match r.status() {
            TaskStatus::Success => r.output().map(|v| v.summary()).unwrap_or_default(),
            TaskStatus::Failed => r.error().map(ToString::to_string).unwrap_or_default(),
            TaskStatus::Skipped => r.note().unwrap_or_default().to_string(),
        };
        let cached = if r.cache_hit() { " (cached)" } else { "" };
        println!("  {:<4} {:<8}{cached} {detail}", r.task_id(), r.status());
    }
    if let Some(output) = result.final_output() {
        println!();
        println!("{}", serde_json::to_string_pretty(&output.to_json()).unwrap_or_default());
    }
}

async fn check(config: &DpoConfig, file: &Path) -> anyhow::Result<bool> {
    let source = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    match PolicyValidator::new(config.policy.clone()).validate(&CodeSnippet::new(source)) {
        Ok(_) => {
            println!("ok: {} passes the execution policy", file.display());
            Ok(true)
        }
        Err(violation) => {
            println!("rejected: {violation}");
            Ok(false)
        }
    }
}

async fn cache(config: &DpoConfig, args: &ArgMatches) -> anyhow::Result<bool> {
    let cache = CacheManager::from_config(&config.cache);
    match args.subcommand_name() {
        Some("stats") => {
            let mut stats = serde_json::to_value(cache.stats())?;
            stats["durable_entries"] = cache.durable_entries().await?.into();
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Some("clear") => {
            cache.clear().await?;
            println!("cache cleared");
        }
        other => bail!("unknown cache command: {other:?}"),
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    let format = matches
        .get_one::<LogFormat>("log-format")
        .copied()
        .unwrap_or_default();
    telemetry::init(format);

    let config_path = matches.get_one::<PathBuf>("config").map(PathBuf::as_path);
    let config = DpoConfig::resolve(config_path)?;

    let ok = match matches.subcommand() {
        Some(("run", args)) => run(config, args).await?,
        Some(("check", args)) => {
            let file = args.get_one::<PathBuf>("file").context("a snippet file is required")?;
            check(&config, file).await?
        }
        Some(("cache", args)) => cache(&config, args).await?,
        Some(("agents", _)) => {
            let orchestrator = Orchestrator::from_config(config, Collaborators::in_memory())?;
            println!("{}", serde_json::to_string_pretty(&orchestrator.agent_stats())?);
            true
        }
        Some(("config", _)) => {
            print!("{}", config.to_toml()?);
            true
        }
        _ => bail!("no command given"),
    };
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
