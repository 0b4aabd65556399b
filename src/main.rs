use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::Value;

use graphflow::infrastructure::{
    InMemoryHumanInputFormRepository, InMemoryWorkflowExecutionRepository,
    InMemoryWorkflowNodeExecutionRepository,
};
use graphflow::{
    parse_graph_config, EngineConfig, FileRuntimeStateStore, GraphConfigFormat, GraphRunOutcome,
    NodeServices, PersistenceLayer, TracingLayer, WorkflowEntry, WorkflowNodeExecutionRepository,
};

/// Run a workflow graph and print its events as JSON lines.
#[derive(Parser)]
#[command(name = "graphflow")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Graph file (`.json`, `.yaml` or `.yml`)
    graph: PathBuf,

    /// Engine config in TOML
    #[arg(long)]
    config: Option<PathBuf>,

    /// User input as `name=value`; the value is parsed as JSON, falling back to a string
    #[arg(long = "input", short = 'i')]
    inputs: Vec<String>,

    /// Directory where a paused run's snapshot is written
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let content = std::fs::read_to_string(&cli.graph)
        .with_context(|| format!("reading {}", cli.graph.display()))?;
    let graph_config = parse_graph_config(&content, graph_format(&cli.graph)?)?;

    let engine_config = match &cli.config {
        Some(path) => {
            let toml = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            EngineConfig::from_toml_str(&toml)?
        }
        None => EngineConfig::default(),
    };

    let executions = Arc::new(InMemoryWorkflowExecutionRepository::new());
    let node_executions = Arc::new(InMemoryWorkflowNodeExecutionRepository::new());
    let services = NodeServices {
        form_repository: Some(Arc::new(InMemoryHumanInputFormRepository::new())),
        ..NodeServices::default()
    };

    let mut builder = WorkflowEntry::builder(graph_config)
        .services(services)
        .config(engine_config)
        .user_inputs(parse_inputs(&cli.inputs)?)
        .layer(Arc::new(TracingLayer::new()))
        .layer(Arc::new(PersistenceLayer::new(
            executions.clone(),
            node_executions.clone(),
        )));
    if let Some(dir) = &cli.snapshot_dir {
        builder = builder.snapshot_store(Arc::new(FileRuntimeStateStore::new(dir)?));
    }
    let entry = builder.build().await?;
    let execution_id = entry.execution_id().to_string();

    let mut handle = entry.run();
    while let Some(event) = handle.next_event().await {
        println!("{}", serde_json::to_string(&event)?);
    }
    let outcome = handle.wait().await?;

    let rows = node_executions.list_by_execution(&execution_id).await?;
    eprintln!("execution {}: {:?}, {} node executions", execution_id, outcome.status(), rows.len());
    match outcome {
        GraphRunOutcome::Succeeded { outputs } | GraphRunOutcome::PartialSucceeded { outputs, .. } => {
            println!("{}", serde_json::to_string_pretty(&outputs)?);
        }
        GraphRunOutcome::Paused { paused_nodes, .. } => {
            eprintln!("paused at {}", paused_nodes.join(", "));
        }
        GraphRunOutcome::Failed { error, .. } => bail!(error),
        GraphRunOutcome::Aborted { reason, .. } => {
            bail!("run aborted: {}", reason.unwrap_or_default())
        }
    }
    Ok(())
}

fn graph_format(path: &Path) -> Result<GraphConfigFormat> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => Ok(GraphConfigFormat::Json),
        Some("yaml") | Some("yml") => Ok(GraphConfigFormat::Yaml),
        Some("toml") => Ok(GraphConfigFormat::Toml),
        _ => bail!("unsupported graph file extension: {}", path.display()),
    }
}

fn parse_inputs(raw: &[String]) -> Result<HashMap<String, Value>> {
    raw.iter()
        .map(|pair| {
            let (name, value) = pair
                .split_once('=')
                .with_context(|| format!("input '{}' is not name=value", pair))?;
            let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.into()));
            Ok((name.to_string(), value))
        })
        .collect()
}
