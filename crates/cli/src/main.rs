//! `flow` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate` : check a process definition file.
//! - `inspect`  : print the node graph of a definition.
//! - `simulate` : run a definition to completion against an in-memory store,
//!   letting the first eligible actor complete every task.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use db::MemoryStore;
use engine::{EngineConfig, FlowActor, FlowEngine, ProcessRef};
use model::{validate_model, HandlerError, NodeContext, NodeModel, ProcessModel, TaskTrigger, Variables};

#[derive(Parser)]
#[command(name = "flow", about = "Approval workflow engine", version)]
struct Cli {
    /// Engine configuration (JSON).
    #[arg(long, global = true, env = "FLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Override the default vote-sign pass weight.
    #[arg(long, global = true, env = "FLOW_PASS_WEIGHT")]
    pass_weight: Option<u32>,

    /// Auto-complete approval nodes that resolve to no actors.
    #[arg(long, global = true)]
    skip_empty_approval: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a process definition JSON file.
    Validate {
        path: PathBuf,
    },
    /// Print every node of a process definition.
    Inspect {
        path: PathBuf,
    },
    /// Run a definition to completion in memory.
    Simulate {
        path: PathBuf,
        /// Extra definitions to deploy first, for call-process nodes.
        #[arg(long = "with")]
        with: Vec<PathBuf>,
        /// Initial variables as a JSON object.
        #[arg(long, default_value = "{}")]
        vars: String,
        /// Initiator id.
        #[arg(long, default_value = "initiator")]
        initiator: String,
        #[arg(long, default_value_t = 200)]
        max_steps: usize,
    },
}

/// Trigger used during simulation: logs the node and succeeds.
struct LogTrigger;

#[async_trait]
impl TaskTrigger for LogTrigger {
    async fn execute(&self, node: &NodeModel, ctx: &NodeContext) -> Result<(), HandlerError> {
        info!(node = %node.node_key, instance_id = %ctx.instance_id, "trigger fired");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => {
            let raw = read(path)?;
            serde_json::from_str::<EngineConfig>(&raw)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    if let Some(weight) = cli.pass_weight {
        config.default_pass_weight = weight;
    }
    config.skip_empty_approval |= cli.skip_empty_approval;

    match cli.command {
        Command::Validate { path } => {
            let model = load(&path)?;
            match validate_model(&model) {
                Ok(keys) => {
                    println!("'{}' is valid ({} nodes)", model.key, keys.len());
                    for node in model.unset_assignee_nodes() {
                        println!("  warning: node '{}' has no assignees", node.node_key);
                    }
                }
                Err(e) => {
                    eprintln!("validation failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Command::Inspect { path } => {
            let model = load(&path)?;
            println!("{} ({})", model.name, model.key);
            for node in model.all_nodes() {
                let parent = model.parent_of(&node.node_key).map(|p| p.node_key.as_str()).unwrap_or("-");
                println!(
                    "  {:<20} {:<18} parent={:<20} mode={}",
                    node.node_key,
                    node.kind.to_string(),
                    parent,
                    node.perform_type()
                );
            }
        }
        Command::Simulate { path, with, vars, initiator, max_steps } => {
            simulate(config, &path, &with, &vars, &initiator, max_steps).await?;
        }
    }
    Ok(())
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))
}

fn load(path: &Path) -> Result<ProcessModel> {
    let content = read(path)?;
    ProcessModel::parse(&content).with_context(|| format!("cannot parse {}", path.display()))
}

async fn simulate(
    config: EngineConfig,
    path: &Path,
    with: &[PathBuf],
    vars: &str,
    initiator: &str,
    max_steps: usize,
) -> Result<()> {
    let args: Variables = serde_json::from_str(vars).context("--vars must be a JSON object")?;
    let store = MemoryStore::new();
    let engine = FlowEngine::builder(Arc::new(store.clone()))
        .config(config)
        .default_trigger(Arc::new(LogTrigger))
        .build();
    let creator = FlowActor::new(initiator, initiator);

    for extra in with {
        engine.deploy(&read(extra)?, &creator, false).await?;
    }
    let process_id = engine.deploy(&read(path)?, &creator, false).await?;
    let instance = engine.start_instance(ProcessRef::Id(process_id), &creator, args).await?;
    info!(instance_id = %instance.id, "instance started");

    let mut steps = 0;
    loop {
        // Child instances hold their own tasks; take any live one.
        let Some(task) = store.snapshot().await.tasks.into_iter().next() else {
            break;
        };
        if steps == max_steps {
            bail!("instance still running after {max_steps} steps");
        }
        steps += 1;

        let actors = engine.task_actors(task.id).await?;
        match actors.first() {
            Some(row) => {
                let actor = FlowActor::new(row.actor_id.clone(), row.actor_name.clone());
                println!("step {steps:>3}: {:<20} by {}", task.task_key, actor.id);
                engine.execute_task(task.id, &actor, Variables::new()).await?;
            }
            None => {
                println!("step {steps:>3}: {:<20} (automatic)", task.task_key);
                engine.auto_complete_task(task.id, Variables::new()).await?;
            }
        }
    }

    let Some(finished) = engine.his_instance(instance.id).await? else {
        warn!(instance_id = %instance.id, "instance did not finish");
        bail!("instance {} did not finish", instance.id);
    };
    println!("\ninstance {} {} after {steps} steps", instance.id, finished.state);
    for his in engine.his_tasks(instance.id).await? {
        println!(
            "  {:<20} {:<14} {:<12} {}ms",
            his.task.task_key,
            his.state.to_string(),
            his.finish_by,
            his.duration_ms
        );
    }
    Ok(())
}
